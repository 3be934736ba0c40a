//! Skulk Check - integrity verification for Alopex Skulk TSM files
//!
//! This crate maps TSM files into memory and proves that their key index and
//! their decoded blocks agree on time ordering and bounds.
//!
//! # Components
//!
//! - [`RegionManager`]: page-accounted memory mappings with reclaim hints
//! - [`TsmReader`] / [`TsmWriter`]: TSM file format I/O
//! - [`Verifier`]: per-file index and block integrity scan
//! - [`Locator`]: finds the blocks holding a timestamp
//!
//! # Example
//!
//! ```rust,ignore
//! use skulk_check::{CheckConfig, LocateQuery, Locator, Verifier};
//!
//! let verifier = Verifier::new(CheckConfig::new("/var/lib/skulk/data"));
//! let report = verifier.scan_file(path)?;
//! if !report.is_clean() {
//!     for anomaly in &report.anomalies {
//!         println!("{}", anomaly);
//!     }
//! }
//!
//! let matches = Locator::new().locate_file(path, &LocateQuery::new(1_541_675_791_068_000_000))?;
//! ```

#![deny(missing_docs)]

pub mod check;
pub mod error;
pub mod mmap;
pub mod tsm;

pub use check::{
    discover_files, Anomaly, AnomalyCounts, AnomalyKind, CancelToken, CheckConfig, FileOutcome,
    IntegrityReport, KeySummary, LocateMatch, LocateQuery, Locator, Verifier,
};
pub use error::{Result, TsmError};
pub use mmap::{Advice, ByteAccount, MappedRegion, RegionManager};
pub use tsm::{
    BlockIndexEntry, BlockSource, DecodedBlock, SeriesKey, TimeBounds, Timestamp, TsmReader,
    TsmWriter, ValueType, Values,
};
