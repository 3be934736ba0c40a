//! Mapped regions and the manager that creates them.

use super::account::{AccountSnapshot, BackingKind, ByteAccount};
use crate::error::{Result, TsmError};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// Page size used when the platform cannot report one.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Returns the platform page size in bytes.
pub fn page_size() -> u64 {
    static PAGE_SIZE: OnceLock<u64> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        #[cfg(unix)]
        {
            // SAFETY: sysconf has no preconditions.
            let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if size > 0 {
                return size as u64;
            }
        }
        DEFAULT_PAGE_SIZE
    })
}

/// Rounds `len` up to a whole number of pages.
pub fn page_rounded(len: u64) -> u64 {
    let page = page_size();
    len.div_ceil(page) * page
}

/// Hints that can be issued for a mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Advice {
    /// The OS may drop the cached pages backing the region.
    #[default]
    ReclaimNow,
}

enum Backing {
    Empty,
    File(Mmap),
    Anonymous(MmapMut),
}

/// An owned virtual-memory range.
///
/// File-backed regions are read-only and shared; anonymous regions are
/// private and writable. A region is released exactly once, either through
/// [`RegionManager::unmap`] or when it is dropped.
pub struct MappedRegion {
    backing: Backing,
    len: usize,
    reserved: u64,
    account: Option<Arc<ByteAccount>>,
}

impl MappedRegion {
    /// Returns a region that maps nothing.
    pub fn empty() -> Self {
        Self {
            backing: Backing::Empty,
            len: 0,
            reserved: 0,
            account: None,
        }
    }

    /// Returns the backing kind, or `None` for an empty region.
    pub fn kind(&self) -> Option<BackingKind> {
        match self.backing {
            Backing::Empty => None,
            Backing::File(_) => Some(BackingKind::File),
            Backing::Anonymous(_) => Some(BackingKind::Anonymous),
        }
    }

    /// Returns true if the region maps at least one byte.
    pub fn is_valid(&self) -> bool {
        !matches!(self.backing, Backing::Empty)
    }

    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the region is zero bytes long.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Page-rounded length charged to the byte account.
    pub fn reserved_len(&self) -> u64 {
        self.reserved
    }

    /// Returns the mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            Backing::Empty => &[],
            Backing::File(map) => &map[..],
            Backing::Anonymous(map) => &map[..],
        }
    }

    /// Returns the mapped bytes for writing. Only anonymous regions are writable.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        match &mut self.backing {
            Backing::Anonymous(map) => Some(&mut map[..]),
            _ => None,
        }
    }

    fn release(&mut self) -> Result<()> {
        let Some(account) = self.account.take() else {
            return Ok(());
        };
        let Some(kind) = self.kind() else {
            return Ok(());
        };
        let remaining = account.release(kind, self.reserved)?;
        debug!(
            "unmapping {} bytes ({} KB), {:?} total now {} bytes",
            self.reserved,
            self.reserved / 1024,
            kind,
            remaining
        );
        Ok(())
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("kind", &self.kind())
            .field("len", &self.len)
            .field("reserved", &self.reserved)
            .finish()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release mapped region on drop: {:?}", e);
        }
    }
}

/// Creates and destroys mapped regions, charging them to one [`ByteAccount`].
///
/// Managers are cheap to clone; clones share the same account.
#[derive(Debug, Clone, Default)]
pub struct RegionManager {
    account: Arc<ByteAccount>,
}

impl RegionManager {
    /// Creates a manager with a fresh account.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager that charges an existing account.
    pub fn with_account(account: Arc<ByteAccount>) -> Self {
        Self { account }
    }

    /// Returns the account this manager charges.
    pub fn account(&self) -> &Arc<ByteAccount> {
        &self.account
    }

    /// Returns the current reservation totals.
    pub fn snapshot(&self) -> AccountSnapshot {
        self.account.snapshot()
    }

    /// Maps a file read-only.
    ///
    /// A `size_hint` of zero maps the whole file; larger hints are clamped
    /// to the file length. A zero-length file yields [`MappedRegion::empty`].
    ///
    /// # Errors
    ///
    /// Returns `TsmError::Open` if the file cannot be opened or stat-ed and
    /// `TsmError::Map` if the mapping itself fails.
    pub fn map_file(&self, path: &Path, size_hint: u64) -> Result<MappedRegion> {
        let open_err = |source| TsmError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        let file_len = file.metadata().map_err(open_err)?.len();

        if file_len == 0 {
            debug!("{} is empty, nothing to map", path.display());
            return Ok(MappedRegion::empty());
        }

        let len = if size_hint == 0 {
            file_len
        } else {
            size_hint.min(file_len)
        };
        let map_err = |source| TsmError::Map {
            path: path.to_path_buf(),
            source,
        };
        let map_len = usize::try_from(len).map_err(|_| {
            map_err(std::io::Error::other(format!(
                "length {} exceeds address space",
                len
            )))
        })?;

        // SAFETY: TSM files are immutable once written; the mapping is
        // read-only and nothing in this crate truncates mapped files.
        let map = unsafe { MmapOptions::new().len(map_len).map(&file) }.map_err(map_err)?;

        let reserved = page_rounded(len);
        let total = self.account.charge(BackingKind::File, reserved);
        debug!(
            "FILE allocating {} bytes ({} KB) for {}, FILE total {} bytes ({} KB)",
            reserved,
            reserved / 1024,
            path.display(),
            total,
            total / 1024
        );

        Ok(MappedRegion {
            backing: Backing::File(map),
            len: map_len,
            reserved,
            account: Some(Arc::clone(&self.account)),
        })
    }

    /// Maps `len` bytes of private, writable, zero-filled memory.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::Map` if the OS refuses the reservation.
    pub fn map_anonymous(&self, len: usize) -> Result<MappedRegion> {
        if len == 0 {
            return Ok(MappedRegion::empty());
        }

        let map = MmapOptions::new()
            .len(len)
            .map_anon()
            .map_err(|source| TsmError::Map {
                path: PathBuf::from("<anonymous>"),
                source,
            })?;

        let reserved = page_rounded(len as u64);
        let total = self.account.charge(BackingKind::Anonymous, reserved);
        debug!(
            "ANON allocating {} bytes ({} KB), ANON total {} bytes ({} KB)",
            reserved,
            reserved / 1024,
            total,
            total / 1024
        );

        Ok(MappedRegion {
            backing: Backing::Anonymous(map),
            len,
            reserved,
            account: Some(Arc::clone(&self.account)),
        })
    }

    /// Releases a region and subtracts its reservation.
    ///
    /// Unmapping an empty region always succeeds.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::Unmap` if the region was charged to a different
    /// account or the account would underflow. The region is still released
    /// against the account that charged it.
    pub fn unmap(&self, mut region: MappedRegion) -> Result<()> {
        if let Some(owner) = &region.account {
            if !Arc::ptr_eq(owner, &self.account) {
                return Err(TsmError::Unmap(
                    "region was mapped by a different manager".to_string(),
                ));
            }
        }
        region.release()
    }

    /// Issues a hint for the region without changing its contents or validity.
    ///
    /// File-backed pages can always be refetched from the file, so they are
    /// released with `MADV_DONTNEED`. Anonymous private pages would be zeroed
    /// by that advice and are left alone.
    ///
    /// # Errors
    ///
    /// Returns `TsmError::Advise` if the OS rejects the hint.
    pub fn advise(&self, region: &MappedRegion, advice: Advice) -> Result<()> {
        match (&region.backing, advice) {
            (Backing::File(map), Advice::ReclaimNow) => {
                trace!("reclaim hint for {} mapped bytes", region.len);
                reclaim_file_pages(map)
            }
            (Backing::Anonymous(_), Advice::ReclaimNow) | (Backing::Empty, _) => Ok(()),
        }
    }
}

#[cfg(unix)]
fn reclaim_file_pages(map: &Mmap) -> Result<()> {
    // SAFETY: the mapping is shared and read-only, so dropped pages are
    // repopulated from the file with identical contents on next access.
    unsafe { map.unchecked_advise(memmap2::UncheckedAdvice::DontNeed) }
        .map_err(TsmError::Advise)
}

#[cfg(not(unix))]
fn reclaim_file_pages(_map: &Mmap) -> Result<()> {
    Ok(())
}
