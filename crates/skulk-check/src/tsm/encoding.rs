//! Column codecs for the non-float value types.
//!
//! | Type     | Encoding                                    |
//! |----------|---------------------------------------------|
//! | Integer  | zig-zag delta, LEB128 varint                |
//! | Unsigned | wrapping delta, zig-zag, LEB128 varint      |
//! | Boolean  | one bit per value, MSB first                |
//! | String   | `u32` length prefix + UTF-8 bytes per value |
//!
//! Raw (8 bytes little-endian per value) is also accepted for the fixed
//! width types. Float columns use [`super::gorilla`].

use bitvec::prelude::*;
use thiserror::Error;

/// Failure while decoding a single column.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The column ended before `count` values were read.
    #[error("column truncated")]
    Truncated,

    /// Bytes remain after the last value.
    #[error("{0} trailing bytes after last value")]
    TrailingBytes(usize),

    /// The bytes do not form a valid encoding.
    #[error("malformed column: {0}")]
    Malformed(String),
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn put_varint(output: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        output.push((value as u8) | 0x80);
        value >>= 7;
    }
    output.push(value as u8);
}

fn get_varint(data: &[u8], pos: &mut usize) -> Result<u64, CodecError> {
    let mut value: u64 = 0;
    for shift in (0..64).step_by(7) {
        let byte = *data.get(*pos).ok_or(CodecError::Truncated)?;
        *pos += 1;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::Malformed("varint longer than 10 bytes".to_string()))
}

fn no_trailing(data: &[u8], pos: usize) -> Result<(), CodecError> {
    match data.len() - pos {
        0 => Ok(()),
        extra => Err(CodecError::TrailingBytes(extra)),
    }
}

/// Encodes signed integers as zig-zag deltas.
pub fn encode_integers(values: &[i64]) -> Vec<u8> {
    let mut output = Vec::with_capacity(values.len() * 2);
    let mut prev = 0i64;
    for &value in values {
        put_varint(&mut output, zigzag(value.wrapping_sub(prev)));
        prev = value;
    }
    output
}

/// Decodes `count` signed integers.
pub fn decode_integers(data: &[u8], count: usize) -> Result<Vec<i64>, CodecError> {
    let mut pos = 0;
    let mut prev = 0i64;
    let mut values = Vec::with_capacity(count.min(data.len()));
    for _ in 0..count {
        prev = prev.wrapping_add(unzigzag(get_varint(data, &mut pos)?));
        values.push(prev);
    }
    no_trailing(data, pos)?;
    Ok(values)
}

/// Encodes unsigned integers as wrapping zig-zag deltas.
pub fn encode_unsigned(values: &[u64]) -> Vec<u8> {
    let mut output = Vec::with_capacity(values.len() * 2);
    let mut prev = 0u64;
    for &value in values {
        put_varint(&mut output, zigzag(value.wrapping_sub(prev) as i64));
        prev = value;
    }
    output
}

/// Decodes `count` unsigned integers.
pub fn decode_unsigned(data: &[u8], count: usize) -> Result<Vec<u64>, CodecError> {
    let mut pos = 0;
    let mut prev = 0u64;
    let mut values = Vec::with_capacity(count.min(data.len()));
    for _ in 0..count {
        prev = prev.wrapping_add(unzigzag(get_varint(data, &mut pos)?) as u64);
        values.push(prev);
    }
    no_trailing(data, pos)?;
    Ok(values)
}

/// Packs booleans one bit each.
pub fn encode_booleans(values: &[bool]) -> Vec<u8> {
    let mut bits = BitVec::<u8, Msb0>::with_capacity(values.len());
    bits.extend(values.iter().copied());
    bits.into_vec()
}

/// Unpacks `count` booleans.
pub fn decode_booleans(data: &[u8], count: usize) -> Result<Vec<bool>, CodecError> {
    let needed = count.div_ceil(8);
    if data.len() < needed {
        return Err(CodecError::Truncated);
    }
    no_trailing(data, needed)?;
    Ok(data.view_bits::<Msb0>()[..count].iter().by_vals().collect())
}

/// Writes each string with a `u32` length prefix.
pub fn encode_strings(values: &[String]) -> Vec<u8> {
    let mut output = Vec::new();
    for value in values {
        output.extend_from_slice(&(value.len() as u32).to_le_bytes());
        output.extend_from_slice(value.as_bytes());
    }
    output
}

/// Reads `count` length-prefixed strings.
pub fn decode_strings(data: &[u8], count: usize) -> Result<Vec<String>, CodecError> {
    let mut pos = 0;
    let mut values = Vec::with_capacity(count.min(data.len() / 4));
    for _ in 0..count {
        let len_bytes = data.get(pos..pos + 4).ok_or(CodecError::Truncated)?;
        let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        pos += 4;
        let bytes = data
            .get(pos..pos.saturating_add(len))
            .ok_or(CodecError::Truncated)?;
        let value = std::str::from_utf8(bytes)
            .map_err(|e| CodecError::Malformed(format!("Invalid UTF-8 in string value: {}", e)))?;
        values.push(value.to_string());
        pos += len;
    }
    no_trailing(data, pos)?;
    Ok(values)
}

/// Writes 8-byte little-endian words.
pub fn encode_raw_words(words: impl IntoIterator<Item = u64>) -> Vec<u8> {
    words.into_iter().flat_map(u64::to_le_bytes).collect()
}

/// Reads exactly `count` 8-byte little-endian words.
pub fn decode_raw_words(data: &[u8], count: usize) -> Result<Vec<u64>, CodecError> {
    let needed = count.checked_mul(8).ok_or(CodecError::Truncated)?;
    if data.len() < needed {
        return Err(CodecError::Truncated);
    }
    no_trailing(data, needed)?;
    Ok(data
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
        .collect())
}
