//! Concurrent archive scanning.
//!
//! Archives are split into fixed-size batches. Batches run one after another;
//! the archives of a batch run on a rayon pool and share one
//! [`BatchScope`](crate::writer::BatchScope), so every append handle is
//! closed before the next batch starts. Each archive runs inside its own
//! `catch_unwind` boundary: a corrupt archive or a panicking worker is logged
//! and counted, and its siblings carry on.

use crate::archive::ArchiveReader;
use crate::config::{ScanConfig, ARCHIVE_EXTENSIONS, PROGRESS_TICK_MS};
use crate::error::ScanError;
use crate::extract::{extract_archive, ArchiveRecords};
use crate::layout;
use crate::merge::clear_stage_dirs;
use crate::models::TagRecord;
use crate::stats::ScanStats;
use crate::writer::{BatchScope, OutputWriter};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// One row of `mods.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModEntry {
    pub mod_id: String,
    pub archive: String,
    /// Namespaces joined with `;`
    pub namespaces: String,
}

#[derive(Debug, Default)]
pub struct ScanReport {
    pub discovered: usize,
    pub batches: usize,
    pub mods: Vec<ModEntry>,
    pub peak_open_handles: usize,
}

impl ScanReport {
    pub fn scanned(&self) -> usize {
        self.mods.len()
    }
}

/// `*.jar` and `*.zip` files directly under `dir`, sorted by file name.
pub fn discover_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read archive directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let is_archive = path.is_file()
            && path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    ARCHIVE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                });
        if is_archive {
            archives.push(path);
        }
    }
    archives.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(archives)
}

/// Scans every archive under `config.input_dir` into raw files under `config.raw_dir`.
///
/// Raw files of an earlier run are removed first.
///
/// Fails with [`ScanError::NoArchives`] when no archive could be scanned and
/// with [`ScanError::ResourceExhaustion`] when output cannot be written.
pub fn run_scan(config: &ScanConfig, stats: &ScanStats) -> Result<ScanReport> {
    let archives = discover_archives(&config.input_dir)?;
    if archives.is_empty() {
        return Err(ScanError::NoArchives(config.input_dir.clone()).into());
    }
    // Raw files are append-only, so leftovers from an earlier run would leak in
    clear_stage_dirs(&config.raw_dir)?;

    let threads = worker_count(config.threads);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("modscan-worker-{i}"))
        .build()
        .context("Failed to build worker pool")?;

    info!(
        archives = archives.len(),
        threads,
        batch_size = config.batch_size,
        "Starting scan"
    );

    let pb = make_progress_bar(archives.len() as u64);
    let mut writer = OutputWriter::new();
    let mut report = ScanReport {
        discovered: archives.len(),
        ..Default::default()
    };

    for batch in archives.chunks(config.batch_size.max(1)) {
        let scope = writer.batch();
        let results: Vec<Result<Option<ModEntry>, ScanError>> = pool.install(|| {
            batch
                .par_iter()
                .map(|path| {
                    let outcome =
                        run_isolated(path, stats, || scan_archive(path, config, &scope, stats));
                    pb.inc(1);
                    outcome
                })
                .collect()
        });
        scope.finish()?;
        report.batches += 1;

        for result in results {
            if let Some(entry) = result? {
                report.mods.push(entry);
            }
        }
    }
    pb.finish_and_clear();

    report.peak_open_handles = writer.peak_open_handles();
    stats.add_lines(writer.lines_written());

    if report.mods.is_empty() {
        return Err(ScanError::NoArchives(config.input_dir.clone()).into());
    }

    write_manifest(&layout::manifest_file(&config.output_dir), &report.mods)?;

    info!(
        scanned = report.scanned(),
        failed = stats.failed_archives(),
        peak_open_handles = report.peak_open_handles,
        "Scan complete"
    );
    Ok(report)
}

/// Pool size: the requested count, capped by the available cores.
pub fn worker_count(requested: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    requested.clamp(1, cores.max(1))
}

/// Task boundary around the work for one archive. Only fatal errors escape;
/// failures and panics are counted and the archive yields no row.
fn run_isolated<F>(path: &Path, stats: &ScanStats, work: F) -> Result<Option<ModEntry>, ScanError>
where
    F: FnOnce() -> Result<ModEntry, ScanError>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(work));

    let error = match outcome {
        Ok(Ok(entry)) => {
            stats.inc_archives();
            return Ok(Some(entry));
        }
        Ok(Err(e)) if e.is_fatal() => return Err(e),
        Ok(Err(e)) => e,
        Err(payload) => ScanError::WorkerTask {
            archive: path.to_path_buf(),
            reason: panic_message(payload.as_ref()),
        },
    };

    match error {
        ScanError::CorruptArchive { .. } => stats.inc_corrupt(),
        _ => stats.inc_worker_errors(),
    }
    warn!(archive = %path.display(), error = %error, "Skipping archive");
    Ok(None)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

fn scan_archive(
    path: &Path,
    config: &ScanConfig,
    scope: &BatchScope<'_>,
    stats: &ScanStats,
) -> Result<ModEntry, ScanError> {
    let mut reader = ArchiveReader::open(path)?;
    let archive = reader.identify();
    let namespaces: Vec<String> = reader.namespaces().into_iter().collect();

    let records = extract_archive(&mut reader, |ns| config.accepts_namespace(ns), stats);
    write_records(scope, &config.raw_dir, &records)?;

    Ok(ModEntry {
        mod_id: archive.mod_id,
        archive: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        namespaces: namespaces.join(";"),
    })
}

/// Appends one block per output file for everything an archive produced.
pub fn write_records(
    scope: &BatchScope<'_>,
    raw_dir: &Path,
    records: &ArchiveRecords,
) -> Result<(), ScanError> {
    for ((kind, namespace), lines) in &records.assets {
        scope.append(&layout::raw_asset_file(raw_dir, *kind, namespace), lines)?;
    }

    for record in records.tags.values() {
        scope.append(&layout::raw_tag_file(raw_dir, &record.id), &tag_block(record))?;
    }
    for record in records.reference_tags.values() {
        scope.append(
            &layout::raw_reference_tag_file(raw_dir, &record.id),
            &tag_block(record),
        )?;
    }

    let mut recipes: FxHashMap<&str, Vec<String>> = FxHashMap::default();
    for recipe in &records.recipes {
        let line = serde_json::to_string(recipe).map_err(|e| ScanError::MalformedRecord {
            entry: recipe.id.to_string(),
            reason: e.to_string(),
        })?;
        recipes
            .entry(recipe.id.namespace())
            .or_default()
            .push(line);
    }
    for (namespace, lines) in recipes {
        scope.append(&layout::raw_recipe_file(raw_dir, namespace), &lines)?;
    }
    Ok(())
}

/// `#TAG:` header, then items, then `#`-prefixed references.
fn tag_block(record: &TagRecord) -> Vec<String> {
    let mut block = Vec::with_capacity(1 + record.items.len() + record.references.len());
    block.push(record.id.header());
    block.extend(record.items.iter().map(|id| id.to_string()));
    block.extend(record.references.iter().map(|r| format!("#{r}")));
    block
}

fn write_manifest(path: &Path, mods: &[ModEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create manifest: {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for entry in mods {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(())
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} scanning [{bar:30.cyan/blue}] {pos}/{len} archives",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(PROGRESS_TICK_MS));
    pb
}
