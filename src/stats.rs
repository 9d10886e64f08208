use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every worker of a scan run
#[derive(Default)]
pub struct ScanStats {
    pub archives_scanned: AtomicU64,
    pub corrupt_archives: AtomicU64,
    pub worker_errors: AtomicU64,
    pub entry_errors: AtomicU64,
    pub malformed_records: AtomicU64,
    pub assets_found: AtomicU64,
    pub tags_found: AtomicU64,
    pub recipes_found: AtomicU64,
    pub unresolved_references: AtomicU64,
    pub lines_written: AtomicU64,
}

/// Plain copy of [`ScanStats`] for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub archives_scanned: u64,
    pub corrupt_archives: u64,
    pub worker_errors: u64,
    pub entry_errors: u64,
    pub malformed_records: u64,
    pub assets_found: u64,
    pub tags_found: u64,
    pub recipes_found: u64,
    pub unresolved_references: u64,
    pub lines_written: u64,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_archives(&self) {
        self.archives_scanned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_corrupt(&self) {
        self.corrupt_archives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_worker_errors(&self) {
        self.worker_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_entry_errors(&self) {
        self.entry_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_malformed(&self) {
        self.malformed_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_assets(&self) {
        self.assets_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tags(&self) {
        self.tags_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_recipes(&self) {
        self.recipes_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_unresolved(&self, count: u64) {
        self.unresolved_references
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_lines(&self, count: u64) {
        self.lines_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn archives(&self) -> u64 {
        self.archives_scanned.load(Ordering::Relaxed)
    }

    pub fn corrupt(&self) -> u64 {
        self.corrupt_archives.load(Ordering::Relaxed)
    }

    pub fn worker_errors(&self) -> u64 {
        self.worker_errors.load(Ordering::Relaxed)
    }

    pub fn entry_errors(&self) -> u64 {
        self.entry_errors.load(Ordering::Relaxed)
    }

    pub fn malformed(&self) -> u64 {
        self.malformed_records.load(Ordering::Relaxed)
    }

    pub fn assets(&self) -> u64 {
        self.assets_found.load(Ordering::Relaxed)
    }

    pub fn tags(&self) -> u64 {
        self.tags_found.load(Ordering::Relaxed)
    }

    pub fn recipes(&self) -> u64 {
        self.recipes_found.load(Ordering::Relaxed)
    }

    pub fn unresolved(&self) -> u64 {
        self.unresolved_references.load(Ordering::Relaxed)
    }

    pub fn lines(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    /// Archives that were skipped instead of scanned
    pub fn failed_archives(&self) -> u64 {
        self.corrupt() + self.worker_errors()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            archives_scanned: self.archives(),
            corrupt_archives: self.corrupt(),
            worker_errors: self.worker_errors(),
            entry_errors: self.entry_errors(),
            malformed_records: self.malformed(),
            assets_found: self.assets(),
            tags_found: self.tags(),
            recipes_found: self.recipes(),
            unresolved_references: self.unresolved(),
            lines_written: self.lines(),
        }
    }
}
