//! Gorilla compression for timestamps and float columns.
//!
//! # Timestamp Encoding (Delta-of-Delta)
//!
//! - First value: 64 bits raw
//! - Subsequent values use variable-length encoding based on delta-of-delta:
//!   - `0`: `'0'` (1 bit)
//!   - `[-63, 64]`: `'10'` + 7 bits
//!   - `[-255, 256]`: `'110'` + 9 bits
//!   - `[-2047, 2048]`: `'1110'` + 12 bits
//!   - else: `'1111'` + 32 bits
//!
//! Delta-of-deltas outside the 32-bit range cannot be represented; callers
//! check [`fits_delta_of_delta`] and fall back to raw encoding.
//!
//! # Value Encoding (XOR-based)
//!
//! - First value: 64 bits raw (IEEE 754)
//! - Subsequent values:
//!   - XOR = 0: `'0'` (1 bit)
//!   - Same window: `'10'` + meaningful bits
//!   - New window: `'11'` + 5 bits leading + 6 bits length + meaningful bits
//!
//! Decoders never index past the end of their input: a truncated stream is
//! reported as [`CodecError::Truncated`].

use super::encoding::CodecError;
use bitvec::prelude::*;

/// Cursor over a bit stream that fails instead of reading past the end.
struct BitReader<'a> {
    data: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a BitSlice<u8, Msb0>) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bit(&mut self) -> Result<bool, CodecError> {
        let bit = *self.data.get(self.pos).ok_or(CodecError::Truncated)?;
        self.pos += 1;
        Ok(bit)
    }

    fn read_bits(&mut self, n: u32) -> Result<u64, CodecError> {
        let n = n as usize;
        if self.pos + n > self.data.len() {
            return Err(CodecError::Truncated);
        }
        let mut value: u64 = 0;
        for bit in &self.data[self.pos..self.pos + n] {
            value = (value << 1) | u64::from(*bit);
        }
        self.pos += n;
        Ok(value)
    }
}

fn push_bits(output: &mut BitVec<u8, Msb0>, value: u64, n: u32) {
    for i in (0..n).rev() {
        output.push((value >> i) & 1 == 1);
    }
}

/// Returns true if every delta-of-delta of `timestamps` fits in 32 bits.
pub fn fits_delta_of_delta(timestamps: &[i64]) -> bool {
    let mut prev_delta: i64 = 0;
    for pair in timestamps.windows(2) {
        let Some(delta) = pair[1].checked_sub(pair[0]) else {
            return false;
        };
        match delta.checked_sub(prev_delta) {
            Some(dod) if i32::try_from(dod).is_ok() => {}
            _ => return false,
        }
        prev_delta = delta;
    }
    true
}

/// Encoder for timestamps using delta-of-delta encoding.
#[derive(Debug, Default)]
pub struct TimestampEncoder {
    started: bool,
    prev_ts: i64,
    prev_delta: i64,
}

impl TimestampEncoder {
    /// Creates a new timestamp encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a timestamp into the output bit vector.
    ///
    /// Delta-of-deltas wider than 32 bits are truncated; see
    /// [`fits_delta_of_delta`].
    pub fn encode(&mut self, timestamp: i64, output: &mut BitVec<u8, Msb0>) {
        if !self.started {
            self.started = true;
            self.prev_ts = timestamp;
            self.prev_delta = 0;
            push_bits(output, timestamp as u64, 64);
            return;
        }

        let delta = timestamp.wrapping_sub(self.prev_ts);
        let delta_of_delta = delta.wrapping_sub(self.prev_delta);

        if delta_of_delta == 0 {
            output.push(false);
        } else if (-63..=64).contains(&delta_of_delta) {
            push_bits(output, 0b10, 2);
            push_bits(output, (delta_of_delta + 63) as u64, 7);
        } else if (-255..=256).contains(&delta_of_delta) {
            push_bits(output, 0b110, 3);
            push_bits(output, (delta_of_delta + 255) as u64, 9);
        } else if (-2047..=2048).contains(&delta_of_delta) {
            push_bits(output, 0b1110, 4);
            push_bits(output, (delta_of_delta + 2047) as u64, 12);
        } else {
            push_bits(output, 0b1111, 4);
            push_bits(output, u64::from(delta_of_delta as i32 as u32), 32);
        }

        self.prev_delta = delta;
        self.prev_ts = timestamp;
    }
}

/// Decoder for delta-of-delta encoded timestamps.
pub struct TimestampDecoder<'a> {
    reader: BitReader<'a>,
    started: bool,
    prev_ts: i64,
    prev_delta: i64,
}

impl<'a> TimestampDecoder<'a> {
    /// Creates a new timestamp decoder.
    pub fn new(data: &'a BitSlice<u8, Msb0>) -> Self {
        Self {
            reader: BitReader::new(data),
            started: false,
            prev_ts: 0,
            prev_delta: 0,
        }
    }

    /// Decodes the next timestamp from the bit stream.
    pub fn decode_next(&mut self) -> Result<i64, CodecError> {
        if !self.started {
            let ts = self.reader.read_bits(64)? as i64;
            self.started = true;
            self.prev_ts = ts;
            self.prev_delta = 0;
            return Ok(ts);
        }

        let delta_of_delta = if !self.reader.read_bit()? {
            0
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(7)? as i64 - 63
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(9)? as i64 - 255
        } else if !self.reader.read_bit()? {
            self.reader.read_bits(12)? as i64 - 2047
        } else {
            i64::from(self.reader.read_bits(32)? as u32 as i32)
        };

        let delta = self.prev_delta.wrapping_add(delta_of_delta);
        let ts = self.prev_ts.wrapping_add(delta);
        self.prev_delta = delta;
        self.prev_ts = ts;

        Ok(ts)
    }
}

/// Encoder for float values using XOR compression.
#[derive(Debug, Default)]
pub struct ValueEncoder {
    started: bool,
    prev_value: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl ValueEncoder {
    /// Creates a new value encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a float value into the output bit vector.
    pub fn encode(&mut self, value: f64, output: &mut BitVec<u8, Msb0>) {
        let bits = value.to_bits();

        if !self.started {
            self.started = true;
            self.prev_value = bits;
            push_bits(output, bits, 64);
            return;
        }

        let xor = bits ^ self.prev_value;

        if xor == 0 {
            output.push(false);
        } else {
            let leading = xor.leading_zeros().min(31);
            let trailing = xor.trailing_zeros();

            if leading >= self.prev_leading && trailing >= self.prev_trailing {
                // Reuse the previous window.
                push_bits(output, 0b10, 2);
                let meaningful_bits = 64 - self.prev_leading - self.prev_trailing;
                push_bits(output, xor >> self.prev_trailing, meaningful_bits);
            } else {
                push_bits(output, 0b11, 2);
                push_bits(output, u64::from(leading), 5);
                let meaningful_bits = 64 - leading - trailing;
                push_bits(output, u64::from(meaningful_bits - 1), 6);
                push_bits(output, xor >> trailing, meaningful_bits);

                self.prev_leading = leading;
                self.prev_trailing = trailing;
            }
        }

        self.prev_value = bits;
    }
}

/// Decoder for XOR-encoded float values.
pub struct ValueDecoder<'a> {
    reader: BitReader<'a>,
    started: bool,
    prev_value: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl<'a> ValueDecoder<'a> {
    /// Creates a new value decoder.
    pub fn new(data: &'a BitSlice<u8, Msb0>) -> Self {
        Self {
            reader: BitReader::new(data),
            started: false,
            prev_value: 0,
            prev_leading: 0,
            prev_trailing: 0,
        }
    }

    /// Decodes the next float value from the bit stream.
    pub fn decode_next(&mut self) -> Result<f64, CodecError> {
        if !self.started {
            let bits = self.reader.read_bits(64)?;
            self.started = true;
            self.prev_value = bits;
            return Ok(f64::from_bits(bits));
        }

        let xor = if !self.reader.read_bit()? {
            0
        } else if !self.reader.read_bit()? {
            let meaningful_bits = 64 - self.prev_leading - self.prev_trailing;
            self.reader.read_bits(meaningful_bits)? << self.prev_trailing
        } else {
            let leading = self.reader.read_bits(5)? as u32;
            let meaningful_bits = self.reader.read_bits(6)? as u32 + 1;
            let trailing = 64u32
                .checked_sub(leading + meaningful_bits)
                .ok_or_else(|| CodecError::Malformed("XOR window wider than 64 bits".to_string()))?;
            let value = self.reader.read_bits(meaningful_bits)?;

            self.prev_leading = leading;
            self.prev_trailing = trailing;

            value << trailing
        };

        let bits = self.prev_value ^ xor;
        self.prev_value = bits;

        Ok(f64::from_bits(bits))
    }
}

/// Encodes a timestamp column.
pub fn encode_timestamps(timestamps: &[i64]) -> Vec<u8> {
    let mut output = BitVec::<u8, Msb0>::new();
    let mut encoder = TimestampEncoder::new();
    for &ts in timestamps {
        encoder.encode(ts, &mut output);
    }
    output.into_vec()
}

/// Decodes `count` timestamps.
pub fn decode_timestamps(data: &[u8], count: usize) -> Result<Vec<i64>, CodecError> {
    let mut decoder = TimestampDecoder::new(data.view_bits::<Msb0>());
    (0..count).map(|_| decoder.decode_next()).collect()
}

/// Encodes a float column.
pub fn encode_floats(values: &[f64]) -> Vec<u8> {
    let mut output = BitVec::<u8, Msb0>::new();
    let mut encoder = ValueEncoder::new();
    for &value in values {
        encoder.encode(value, &mut output);
    }
    output.into_vec()
}

/// Decodes `count` float values.
pub fn decode_floats(data: &[u8], count: usize) -> Result<Vec<f64>, CodecError> {
    let mut decoder = ValueDecoder::new(data.view_bits::<Msb0>());
    (0..count).map(|_| decoder.decode_next()).collect()
}
