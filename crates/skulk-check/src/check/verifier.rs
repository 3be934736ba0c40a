//! Index and block integrity verification.
//!
//! For each key in ordinal order the verifier walks the key's index entries
//! in stored order, checks each entry against its predecessor and hands the
//! block to the [`BlockChecker`]. Decode failures are recorded and skipped;
//! failing to read the footer, a key or an entry list aborts the file.

use super::anomaly::{Anomaly, AnomalyCounts, Bound, OrderingViolations, Scope};
use super::block::BlockChecker;
use super::cancel::CancelToken;
use super::config::CheckConfig;
use super::discover::discover_files;
use crate::error::Result;
use crate::mmap::RegionManager;
use crate::tsm::{BlockSource, ChecksumStatus, SeriesKey, TimeBounds, TsmReader, ValueType};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-key totals, as reported after the key's walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySummary {
    /// Series key.
    pub key: SeriesKey,
    /// Declared value type.
    pub value_type: ValueType,
    /// Number of index entries.
    pub block_count: usize,
    /// Number of samples decoded from the key's blocks.
    pub point_count: usize,
    /// Smallest entry `min_time` and largest entry `max_time`.
    pub index_bounds: Option<TimeBounds>,
    /// Smallest and largest decoded timestamp.
    pub observed_bounds: Option<TimeBounds>,
}

/// Result of scanning one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    /// File that was scanned, if any.
    pub path: Option<PathBuf>,
    /// Time range advertised by the file.
    pub advertised: TimeBounds,
    /// Number of keys held by the file.
    pub key_count: usize,
    /// Summaries of the keys that were walked, in ordinal order.
    pub keys: Vec<KeySummary>,
    /// Anomalies in discovery order.
    pub anomalies: Vec<Anomaly>,
    /// Smallest and largest decoded timestamp over all walked blocks.
    pub observed: Option<TimeBounds>,
    /// Whole-file checksum result, if it was verified.
    pub checksum: Option<ChecksumStatus>,
    /// True if the scan stopped early on request.
    pub cancelled: bool,
}

impl IntegrityReport {
    fn new(advertised: TimeBounds, key_count: usize) -> Self {
        Self {
            path: None,
            advertised,
            key_count,
            keys: Vec::new(),
            anomalies: Vec::new(),
            observed: None,
            checksum: None,
            cancelled: false,
        }
    }

    /// Anomaly totals per kind.
    pub fn counts(&self) -> AnomalyCounts {
        AnomalyCounts::tally(&self.anomalies)
    }

    /// Returns true if the scan finished without anomalies.
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty() && !self.cancelled
    }

    /// Anomalies recorded for `key`.
    pub fn anomalies_for<'a>(&'a self, key: &'a SeriesKey) -> impl Iterator<Item = &'a Anomaly> + 'a {
        self.anomalies.iter().filter(move |a| a.key() == Some(key))
    }

    fn record(&mut self, anomaly: Anomaly) {
        warn!("{}", anomaly);
        self.anomalies.push(anomaly);
    }
}

/// Result of scanning one file during a multi-file run.
#[derive(Debug)]
pub struct FileOutcome {
    /// File that was scanned.
    pub path: PathBuf,
    /// The report, or the error that aborted this file.
    pub result: Result<IntegrityReport>,
}

/// Walks storage files and reports integrity anomalies.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    config: CheckConfig,
    manager: RegionManager,
    checker: BlockChecker,
    cancel: CancelToken,
}

impl Verifier {
    /// Creates a verifier with its own region manager.
    pub fn new(config: CheckConfig) -> Self {
        Self::with_manager(config, RegionManager::new())
    }

    /// Creates a verifier that maps files through `manager`.
    pub fn with_manager(config: CheckConfig, manager: RegionManager) -> Self {
        Self {
            config,
            manager,
            checker: BlockChecker::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Replaces the cancellation token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The verifier's configuration.
    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// The region manager files are mapped through.
    pub fn manager(&self) -> &RegionManager {
        &self.manager
    }

    /// Token that stops the scan between keys and between files.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Maps, verifies and unmaps the file at `path`.
    ///
    /// After the walk the mapping receives a reclaim hint so the pages of a
    /// large scan do not linger in memory.
    ///
    /// # Errors
    ///
    /// Returns the error that made the file unreadable; see
    /// [`crate::TsmError::is_fatal_for_file`].
    pub fn scan_file(&self, path: &Path) -> Result<IntegrityReport> {
        let reader = TsmReader::open(&self.manager, path)?;
        info!("Opened file: {}", path.display());

        let result = self.verify(&reader);
        if let Err(e) = reader.release_cache() {
            warn!("reclaim hint failed for {}: {}", path.display(), e);
        }
        reader.close()?;

        let mut report = result?;
        report.path = Some(path.to_path_buf());
        debug!(
            "Check complete for {}: {} keys, {}",
            path.display(),
            report.keys.len(),
            report.counts()
        );
        Ok(report)
    }

    /// Verifies an already opened source.
    ///
    /// # Errors
    ///
    /// Returns an error if a key or its entry list cannot be read, or if a
    /// block read fails in a way that is fatal for the file.
    pub fn verify<S: BlockSource + ?Sized>(&self, source: &S) -> Result<IntegrityReport> {
        let advertised = source.time_range();
        let key_count = source.key_count();
        let mut report = IntegrityReport::new(advertised, key_count);
        debug!(
            "File has {} keys. Min time: {}, Max time: {}",
            key_count, advertised.min, advertised.max
        );

        if self.config.verify_checksum {
            report.checksum = source.verify_file_checksum()?;
            if let Some(status) = report.checksum.filter(|status| !status.is_valid()) {
                report.record(Anomaly::ChecksumMismatch {
                    expected: status.expected,
                    actual: status.actual,
                });
            }
        }

        for ordinal in 0..key_count {
            if self.cancel.is_cancelled() {
                info!("scan cancelled after {} of {} keys", ordinal, key_count);
                report.cancelled = true;
                break;
            }

            let (key, value_type) = source.key_at(ordinal)?;
            if self
                .config
                .target_key
                .as_ref()
                .is_some_and(|target| *target != key)
            {
                continue;
            }

            let summary = self.verify_key(source, key, value_type, &mut report)?;
            if let Some(observed) = summary.observed_bounds {
                report.observed = Some(report.observed.map_or(observed, |o| o.merge(observed)));
            }
            report.keys.push(summary);
        }

        // A partial walk cannot speak for the whole file.
        if !report.cancelled && self.config.target_key.is_none() {
            if let Some(observed) = report.observed {
                for (bound, observed, expected) in [
                    (Bound::Min, observed.min, advertised.min),
                    (Bound::Max, observed.max, advertised.max),
                ] {
                    if observed != expected {
                        report.record(Anomaly::BoundsMismatch {
                            scope: Scope::File,
                            bound,
                            observed,
                            expected,
                        });
                    }
                }
            }
        }

        Ok(report)
    }

    fn verify_key<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        key: SeriesKey,
        value_type: ValueType,
        report: &mut IntegrityReport,
    ) -> Result<KeySummary> {
        let entries = source.entries(&key)?;
        debug!("Key {} has {} entries (blocks) in index", key, entries.len());

        let mut index_bounds: Option<TimeBounds> = None;
        let mut observed_bounds: Option<TimeBounds> = None;
        let mut point_count = 0;
        let mut previous: Option<TimeBounds> = None;

        for entry in &entries {
            let bounds = entry.bounds();
            if let Some(previous) = previous {
                let violations = OrderingViolations::between(previous, bounds);
                if violations.any() {
                    report.record(Anomaly::Ordering {
                        key: key.clone(),
                        offset: entry.offset,
                        entry: bounds,
                        previous,
                        violations,
                    });
                }
            }
            previous = Some(bounds);
            index_bounds = Some(index_bounds.map_or(bounds, |b| b.merge(bounds)));

            let check = self.checker.check(source, &key, value_type, entry)?;
            point_count += check.point_count;
            if let Some(observed) = check.observed {
                observed_bounds = Some(observed_bounds.map_or(observed, |b| b.merge(observed)));
            }
            for anomaly in check.anomalies {
                report.record(anomaly);
            }
        }

        if let Some(index) = index_bounds {
            debug!(
                "Scanned all blocks for {}. Index reports Min: {}, Max: {}",
                key, index.min, index.max
            );
        }

        Ok(KeySummary {
            key,
            value_type,
            block_count: entries.len(),
            point_count,
            index_bounds,
            observed_bounds,
        })
    }

    /// Scans every matching file under the configured data root.
    ///
    /// Each file gets its own outcome; an error in one file never stops the
    /// others. Cancellation is honoured between files.
    ///
    /// # Errors
    ///
    /// Returns an error only if the data root cannot be walked.
    pub fn scan_all(&self) -> Result<Vec<FileOutcome>> {
        let files = discover_files(&self.config.data_root, &self.config.extension)?;
        info!(
            "Found {} .{} files under {}",
            files.len(),
            self.config.extension,
            self.config.data_root.display()
        );

        let mut outcomes = Vec::with_capacity(files.len());
        for path in files {
            if self.cancel.is_cancelled() {
                info!("scan cancelled after {} files", outcomes.len());
                break;
            }
            let result = self.scan_file(&path);
            if let Err(e) = &result {
                warn!("Failed to scan {}: {}", path.display(), e);
            }
            outcomes.push(FileOutcome { path, result });
        }
        Ok(outcomes)
    }
}
