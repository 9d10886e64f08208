//! Batched line output shared by concurrent workers.
//!
//! Every output path gets one lock for the whole run, so a block of lines
//! appended under it is never interleaved with another worker's block.
//! File handles are different: they only live for one batch. Opening a
//! [`BatchScope`] borrows the writer mutably, so batches cannot overlap, and
//! finishing (or dropping) the scope flushes and closes every handle it
//! opened. The number of open descriptors is therefore bounded by the
//! distinct paths touched in a single batch.

use crate::config::WRITE_BUFFER_SIZE;
use crate::error::ScanError;
use dashmap::DashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Default)]
struct Slot {
    handle: Option<BufWriter<File>>,
}

#[derive(Default)]
pub struct OutputWriter {
    locks: DashMap<PathBuf, Arc<Mutex<Slot>>>,
    open_handles: AtomicUsize,
    peak_open_handles: AtomicUsize,
    lines_written: AtomicU64,
    batches: AtomicU64,
}

impl OutputWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a batch. Handles opened through the scope close when it ends.
    pub fn batch(&mut self) -> BatchScope<'_> {
        let id = self.batches.fetch_add(1, Ordering::Relaxed);
        debug!(batch = id, "Opening output batch");
        BatchScope {
            writer: self,
            id,
            opened: Mutex::new(Vec::new()),
            closed: false,
        }
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::Relaxed)
    }

    /// Highest number of handles open at once so far.
    pub fn peak_open_handles(&self) -> usize {
        self.peak_open_handles.load(Ordering::Relaxed)
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    /// Every path written during the run, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.locks.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    fn slot(&self, path: &Path) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.locks.get(path) {
            return Arc::clone(slot.value());
        }
        // Clone the Arc out so the map shard is not held while the slot lock is awaited
        Arc::clone(
            self.locks
                .entry(path.to_path_buf())
                .or_default()
                .value(),
        )
    }

    /// Appends under the path's lock. Returns whether a handle had to be opened.
    fn append(&self, path: &Path, lines: &[String]) -> Result<bool, ScanError> {
        let exhausted = |source| ScanError::ResourceExhaustion {
            path: path.to_path_buf(),
            source,
        };

        let slot = self.slot(path);
        let mut slot = lock(&slot);

        let opened = slot.handle.is_none();
        if opened {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(exhausted)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(exhausted)?;
            slot.handle = Some(BufWriter::with_capacity(WRITE_BUFFER_SIZE, file));
            let open = self.open_handles.fetch_add(1, Ordering::Relaxed) + 1;
            self.peak_open_handles.fetch_max(open, Ordering::Relaxed);
        }

        if let Some(handle) = slot.handle.as_mut() {
            for line in lines {
                handle.write_all(line.as_bytes()).map_err(exhausted)?;
                handle.write_all(b"\n").map_err(exhausted)?;
            }
        }
        self.lines_written
            .fetch_add(lines.len() as u64, Ordering::Relaxed);
        Ok(opened)
    }

    /// Flushes and closes the handles of `paths`, returning the first failure.
    fn close(&self, paths: &[PathBuf]) -> Result<usize, ScanError> {
        let mut first_error = None;
        let mut closed = 0;
        for path in paths {
            let Some(slot) = self.locks.get(path).map(|entry| Arc::clone(entry.value())) else {
                continue;
            };
            let mut slot = lock(&slot);
            if let Some(mut handle) = slot.handle.take() {
                if let Err(source) = handle.flush() {
                    first_error.get_or_insert(ScanError::ResourceExhaustion {
                        path: path.clone(),
                        source,
                    });
                }
                self.open_handles.fetch_sub(1, Ordering::Relaxed);
                closed += 1;
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }
}

/// A poisoned lock only means a worker panicked while holding it; the data is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle pool of one batch.
pub struct BatchScope<'a> {
    writer: &'a mut OutputWriter,
    id: u64,
    /// Paths whose handle this batch opened
    opened: Mutex<Vec<PathBuf>>,
    closed: bool,
}

impl BatchScope<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Appends `lines` to `path` as one contiguous block.
    pub fn append(&self, path: &Path, lines: &[String]) -> Result<(), ScanError> {
        if lines.is_empty() {
            return Ok(());
        }
        if self.writer.append(path, lines)? {
            lock(&self.opened).push(path.to_path_buf());
        }
        Ok(())
    }

    pub fn open_handles(&self) -> usize {
        self.writer.open_handles()
    }

    fn close(&mut self) -> Result<usize, ScanError> {
        self.closed = true;
        let opened = std::mem::take(&mut *lock(&self.opened));
        self.writer.close(&opened)
    }

    /// Closes every handle of this batch and reports flush failures.
    pub fn finish(mut self) -> Result<(), ScanError> {
        let closed = self.close()?;
        debug!(batch = self.id, handles = closed, "Closed output batch");
        Ok(())
    }
}

impl Drop for BatchScope<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.close() {
            warn!(batch = self.id, error = %e, "Failed to close output batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lines(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn append_creates_parents_and_closes_on_finish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks/moda_blocks_raw.txt");
        let mut writer = OutputWriter::new();

        let batch = writer.batch();
        batch.append(&path, &lines(&["moda:ore", "moda:ingot"])).unwrap();
        assert_eq!(batch.open_handles(), 1);
        batch.finish().unwrap();

        assert_eq!(writer.open_handles(), 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "moda:ore\nmoda:ingot\n");
        assert_eq!(writer.lines_written(), 2);
    }

    #[test]
    fn later_batches_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        let mut writer = OutputWriter::new();

        for value in ["a:1", "a:2"] {
            let batch = writer.batch();
            batch.append(&path, &lines(&[value])).unwrap();
            batch.finish().unwrap();
        }
        assert_eq!(fs::read_to_string(&path).unwrap(), "a:1\na:2\n");
        assert_eq!(writer.paths(), vec![path]);
    }

    #[test]
    fn dropping_scope_closes_handles() {
        let dir = TempDir::new().unwrap();
        let mut writer = OutputWriter::new();
        {
            let batch = writer.batch();
            batch.append(&dir.path().join("x.txt"), &lines(&["a:x"])).unwrap();
            batch.append(&dir.path().join("y.txt"), &lines(&["a:y"])).unwrap();
        }
        assert_eq!(writer.open_handles(), 0);
        assert_eq!(writer.peak_open_handles(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("y.txt")).unwrap(),
            "a:y\n"
        );
    }

    #[test]
    fn empty_append_opens_nothing() {
        let dir = TempDir::new().unwrap();
        let mut writer = OutputWriter::new();
        let batch = writer.batch();
        batch.append(&dir.path().join("never.txt"), &[]).unwrap();
        batch.finish().unwrap();
        assert!(!dir.path().join("never.txt").exists());
        assert_eq!(writer.peak_open_handles(), 0);
    }

    #[test]
    fn concurrent_blocks_never_interleave() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.txt");
        let mut writer = OutputWriter::new();

        let batch = writer.batch();
        std::thread::scope(|s| {
            for worker in 0..8 {
                let batch = &batch;
                let path = &path;
                s.spawn(move || {
                    for round in 0..50 {
                        let block: Vec<String> = (0..5)
                            .map(|i| format!("w{worker}:r{round}_{i}"))
                            .collect();
                        batch.append(path, &block).unwrap();
                    }
                });
            }
        });
        batch.finish().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let all: Vec<&str> = content.lines().collect();
        assert_eq!(all.len(), 8 * 50 * 5);
        for block in all.chunks(5) {
            let prefix = block[0].rsplit_once('_').unwrap().0;
            for (i, line) in block.iter().enumerate() {
                assert_eq!(*line, format!("{prefix}_{i}"));
            }
        }
        assert_eq!(writer.peak_open_handles(), 1);
    }

    #[test]
    fn batch_closes_only_what_it_opened() {
        let dir = TempDir::new().unwrap();
        let mut writer = OutputWriter::new();
        for k in 0..5 {
            let batch = writer.batch();
            batch.append(&dir.path().join(format!("k{k}.txt")), &lines(&["a:b"])).unwrap();
            batch.finish().unwrap();
        }

        let batch = writer.batch();
        let path = dir.path().join("k2.txt");
        batch.append(&path, &lines(&["a:c"])).unwrap();
        batch.append(&path, &lines(&["a:d"])).unwrap();
        assert_eq!(*lock(&batch.opened), vec![path.clone()]);
        batch.finish().unwrap();

        assert_eq!(writer.open_handles(), 0);
        assert_eq!(writer.paths().len(), 5);
        assert_eq!(fs::read_to_string(&path).unwrap(), "a:b\na:c\na:d\n");
    }

    #[test]
    fn peak_is_bounded_by_paths_per_batch() {
        let dir = TempDir::new().unwrap();
        let mut writer = OutputWriter::new();
        for b in 0..4 {
            let batch = writer.batch();
            for k in 0..3 {
                let path = dir.path().join(format!("b{b}_k{k}.txt"));
                batch.append(&path, &lines(&["a:b"])).unwrap();
            }
            batch.finish().unwrap();
        }
        assert_eq!(writer.peak_open_handles(), 3);
        assert_eq!(writer.paths().len(), 12);
    }
}
