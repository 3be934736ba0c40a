//! Structural integrity checks for TSM files.
//!
//! [`Verifier`] walks every key of a file, comparing each index entry with
//! its predecessor and each decoded block with its entry. [`Locator`] finds
//! the blocks that hold a given timestamp. Both work against any
//! [`crate::tsm::BlockSource`]; the `*_file` entry points open a
//! [`crate::tsm::TsmReader`] through a [`crate::mmap::RegionManager`].
//!
//! ```rust,ignore
//! use skulk_check::check::{CheckConfig, Verifier};
//!
//! let verifier = Verifier::new(CheckConfig::new("/var/lib/skulk/data"));
//! for outcome in verifier.scan_all()? {
//!     match outcome.result {
//!         Ok(report) => println!("{}: {}", outcome.path.display(), report.counts()),
//!         Err(e) => eprintln!("{}: {}", outcome.path.display(), e),
//!     }
//! }
//! ```

mod anomaly;
mod block;
mod cancel;
mod config;
mod discover;
mod locate;
mod verifier;

pub use anomaly::{Anomaly, AnomalyCounts, AnomalyKind, Bound, OrderingViolations, Scope};
pub use block::{BlockCheck, BlockChecker};
pub use cancel::CancelToken;
pub use config::{CheckConfig, DEFAULT_DATA_ROOT};
pub use discover::discover_files;
pub use locate::{LocateMatch, LocateQuery, Locator};
pub use verifier::{FileOutcome, IntegrityReport, KeySummary, Verifier};
