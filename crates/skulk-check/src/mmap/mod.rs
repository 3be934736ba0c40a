//! Memory-mapped regions with page-accounted reservations.
//!
//! A [`RegionManager`] maps files (read-only, shared) or anonymous memory
//! (private, writable) and charges every reservation, rounded up to whole
//! pages, to its [`ByteAccount`]. Each manager owns its own account so that
//! independent runs never observe each other's totals.
//!
//! ```rust,ignore
//! use skulk_check::mmap::{Advice, RegionManager};
//!
//! let manager = RegionManager::new();
//! let region = manager.map_file(path, 0)?;
//! let footer = &region.as_slice()[region.len() - 48..];
//! manager.advise(&region, Advice::ReclaimNow)?;
//! manager.unmap(region)?;
//! assert_eq!(manager.snapshot().total(), 0);
//! ```

mod account;
mod region;

pub use account::{AccountSnapshot, BackingKind, ByteAccount};
pub use region::{page_rounded, page_size, Advice, MappedRegion, RegionManager, DEFAULT_PAGE_SIZE};
