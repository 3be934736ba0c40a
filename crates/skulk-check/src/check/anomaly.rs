//! Structured records of invariant violations found during a scan.
//!
//! Anomalies are data, not errors: they are collected into an
//! [`super::IntegrityReport`] and never abort the walk.

use crate::tsm::{SeriesKey, TimeBounds, Timestamp};
use std::fmt;

/// Classification of an [`Anomaly`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyKind {
    /// An index entry regresses relative to the previous entry of its key.
    Ordering,
    /// Decoded bounds differ from declared bounds.
    BoundsMismatch,
    /// Decoded timestamps decrease inside a block.
    Monotonicity,
    /// A block's last timestamp is below its first.
    InvertedSpan,
    /// A block could not be decoded, or decoded empty.
    BlockDecode,
    /// The whole-file checksum does not match.
    ChecksumMismatch,
}

impl AnomalyKind {
    /// Every kind, in reporting order.
    pub const ALL: [AnomalyKind; 6] = [
        AnomalyKind::Ordering,
        AnomalyKind::BoundsMismatch,
        AnomalyKind::Monotonicity,
        AnomalyKind::InvertedSpan,
        AnomalyKind::BlockDecode,
        AnomalyKind::ChecksumMismatch,
    ];

    /// Returns a short name for logs.
    pub fn name(self) -> &'static str {
        match self {
            AnomalyKind::Ordering => "ordering",
            AnomalyKind::BoundsMismatch => "bounds_mismatch",
            AnomalyKind::Monotonicity => "monotonicity",
            AnomalyKind::InvertedSpan => "inverted_span",
            AnomalyKind::BlockDecode => "block_decode",
            AnomalyKind::ChecksumMismatch => "checksum_mismatch",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which declared bound a [`Anomaly::BoundsMismatch`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// The minimum (first) timestamp.
    Min,
    /// The maximum (last) timestamp.
    Max,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Min => f.write_str("min"),
            Bound::Max => f.write_str("max"),
        }
    }
}

/// Where an anomaly was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The file as a whole.
    File,
    /// One block of one key.
    Block {
        /// Series key owning the block.
        key: SeriesKey,
        /// File offset of the block.
        offset: u64,
    },
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::File => f.write_str("file"),
            Scope::Block { key, offset } => write!(f, "[block {} of {}]", offset, key),
        }
    }
}

/// Predicates an index entry broke relative to its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderingViolations {
    /// `min_time` is below the previous entry's `min_time`.
    pub min_before_previous_min: bool,
    /// `min_time` is below the previous entry's `max_time`.
    pub min_before_previous_max: bool,
    /// `max_time` is below the previous entry's `max_time`.
    pub max_before_previous_max: bool,
}

impl OrderingViolations {
    /// Evaluates every predicate for `entry` following `previous`.
    ///
    /// Equal bounds are not a violation.
    pub fn between(previous: TimeBounds, entry: TimeBounds) -> Self {
        Self {
            min_before_previous_min: entry.min < previous.min,
            min_before_previous_max: entry.min < previous.max,
            max_before_previous_max: entry.max < previous.max,
        }
    }

    /// Returns true if any predicate was broken.
    pub fn any(&self) -> bool {
        self.min_before_previous_min || self.min_before_previous_max || self.max_before_previous_max
    }
}

/// One recorded deviation from a structural invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// An index entry regresses relative to the previous entry of its key.
    Ordering {
        /// Series key.
        key: SeriesKey,
        /// Offset of the offending (later) entry.
        offset: u64,
        /// Declared bounds of the offending entry.
        entry: TimeBounds,
        /// Declared bounds of the previous entry.
        previous: TimeBounds,
        /// Predicates that were broken.
        violations: OrderingViolations,
    },

    /// A decoded bound differs from the declared one.
    BoundsMismatch {
        /// Block or file the bounds belong to.
        scope: Scope,
        /// Which bound differs.
        bound: Bound,
        /// Decoded value.
        observed: Timestamp,
        /// Declared or advertised value.
        expected: Timestamp,
    },

    /// A decoded timestamp is below its predecessor.
    Monotonicity {
        /// Series key.
        key: SeriesKey,
        /// Offset of the block.
        offset: u64,
        /// Zero-based position of the regressing sample.
        position: usize,
        /// Timestamp at `position`.
        value: Timestamp,
        /// Timestamp at `position - 1`.
        previous: Timestamp,
    },

    /// The last decoded timestamp is below the first.
    InvertedSpan {
        /// Series key.
        key: SeriesKey,
        /// Offset of the block.
        offset: u64,
        /// First decoded timestamp.
        first: Timestamp,
        /// Last decoded timestamp.
        last: Timestamp,
    },

    /// A block was skipped because it could not be decoded.
    BlockDecode {
        /// Series key.
        key: SeriesKey,
        /// Offset of the block.
        offset: u64,
        /// Cause reported by the decoder.
        reason: String,
    },

    /// The whole-file checksum does not match the footer.
    ChecksumMismatch {
        /// Checksum stored in the footer.
        expected: u32,
        /// Checksum computed over the file.
        actual: u32,
    },
}

impl Anomaly {
    /// Returns the anomaly's classification.
    pub fn kind(&self) -> AnomalyKind {
        match self {
            Anomaly::Ordering { .. } => AnomalyKind::Ordering,
            Anomaly::BoundsMismatch { .. } => AnomalyKind::BoundsMismatch,
            Anomaly::Monotonicity { .. } => AnomalyKind::Monotonicity,
            Anomaly::InvertedSpan { .. } => AnomalyKind::InvertedSpan,
            Anomaly::BlockDecode { .. } => AnomalyKind::BlockDecode,
            Anomaly::ChecksumMismatch { .. } => AnomalyKind::ChecksumMismatch,
        }
    }

    /// Returns the series key, unless the anomaly is file scoped.
    pub fn key(&self) -> Option<&SeriesKey> {
        match self {
            Anomaly::Ordering { key, .. }
            | Anomaly::Monotonicity { key, .. }
            | Anomaly::InvertedSpan { key, .. }
            | Anomaly::BlockDecode { key, .. } => Some(key),
            Anomaly::BoundsMismatch {
                scope: Scope::Block { key, .. },
                ..
            } => Some(key),
            Anomaly::BoundsMismatch { .. } | Anomaly::ChecksumMismatch { .. } => None,
        }
    }

    /// Returns the block offset, unless the anomaly is file scoped.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Anomaly::Ordering { offset, .. }
            | Anomaly::Monotonicity { offset, .. }
            | Anomaly::InvertedSpan { offset, .. }
            | Anomaly::BlockDecode { offset, .. } => Some(*offset),
            Anomaly::BoundsMismatch {
                scope: Scope::Block { offset, .. },
                ..
            } => Some(*offset),
            Anomaly::BoundsMismatch { .. } | Anomaly::ChecksumMismatch { .. } => None,
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::Ordering {
                key,
                offset,
                entry,
                previous,
                violations,
            } => {
                write!(
                    f,
                    "[block {} of {}] entry [{}, {}] regresses after [{}, {}]:",
                    offset, key, entry.min, entry.max, previous.min, previous.max
                )?;
                if violations.min_before_previous_min {
                    f.write_str(" min < previous min")?;
                }
                if violations.min_before_previous_max {
                    f.write_str(" min < previous max")?;
                }
                if violations.max_before_previous_max {
                    f.write_str(" max < previous max")?;
                }
                Ok(())
            }
            Anomaly::BoundsMismatch {
                scope,
                bound,
                observed,
                expected,
            } => write!(
                f,
                "{} decoded {} {} != declared {}",
                scope, bound, observed, expected
            ),
            Anomaly::Monotonicity {
                key,
                offset,
                position,
                value,
                previous,
            } => write!(
                f,
                "[block {} of {}] timestamp {} at position {} < previous {}",
                offset, key, value, position, previous
            ),
            Anomaly::InvertedSpan {
                key,
                offset,
                first,
                last,
            } => write!(
                f,
                "[block {} of {}] block max {} < block min {}",
                offset, key, last, first
            ),
            Anomaly::BlockDecode { key, offset, reason } => {
                write!(f, "[block {} of {}] skipped: {}", offset, key, reason)
            }
            Anomaly::ChecksumMismatch { expected, actual } => write!(
                f,
                "file checksum mismatch: footer {:#010x}, computed {:#010x}",
                expected, actual
            ),
        }
    }
}

/// Number of anomalies per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnomalyCounts {
    /// Ordering anomalies.
    pub ordering: usize,
    /// Bounds mismatches, block and file scope.
    pub bounds_mismatch: usize,
    /// Monotonicity anomalies.
    pub monotonicity: usize,
    /// Inverted span anomalies.
    pub inverted_span: usize,
    /// Skipped blocks.
    pub block_decode: usize,
    /// File checksum mismatches.
    pub checksum_mismatch: usize,
}

impl AnomalyCounts {
    /// Tallies `anomalies` by kind.
    pub fn tally<'a>(anomalies: impl IntoIterator<Item = &'a Anomaly>) -> Self {
        let mut counts = Self::default();
        for anomaly in anomalies {
            *counts.slot(anomaly.kind()) += 1;
        }
        counts
    }

    fn slot(&mut self, kind: AnomalyKind) -> &mut usize {
        match kind {
            AnomalyKind::Ordering => &mut self.ordering,
            AnomalyKind::BoundsMismatch => &mut self.bounds_mismatch,
            AnomalyKind::Monotonicity => &mut self.monotonicity,
            AnomalyKind::InvertedSpan => &mut self.inverted_span,
            AnomalyKind::BlockDecode => &mut self.block_decode,
            AnomalyKind::ChecksumMismatch => &mut self.checksum_mismatch,
        }
    }

    /// Returns the count for `kind`.
    pub fn get(&self, kind: AnomalyKind) -> usize {
        match kind {
            AnomalyKind::Ordering => self.ordering,
            AnomalyKind::BoundsMismatch => self.bounds_mismatch,
            AnomalyKind::Monotonicity => self.monotonicity,
            AnomalyKind::InvertedSpan => self.inverted_span,
            AnomalyKind::BlockDecode => self.block_decode,
            AnomalyKind::ChecksumMismatch => self.checksum_mismatch,
        }
    }

    /// Total across all kinds.
    pub fn total(&self) -> usize {
        AnomalyKind::ALL.iter().map(|&kind| self.get(kind)).sum()
    }
}

impl fmt::Display for AnomalyCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for kind in AnomalyKind::ALL {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}={}", kind, self.get(kind))?;
        }
        Ok(())
    }
}
