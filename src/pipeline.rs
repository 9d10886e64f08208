use crate::aggregate::{aggregate, AggregateReport};
use crate::config::{PipelineConfig, ScanConfig};
use crate::index::{index_tags, IndexReport};
use crate::merge::{clear_stage_dirs, merge_raw_outputs, MergeReport};
use crate::resolve::{load_raw_tags, write_closed_tags, DiskTagLocator, ResolveReport};
use crate::scan::{run_scan, ScanReport};
use crate::stats::{ScanStats, StatsSnapshot};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug)]
pub struct PipelineReport {
    pub scan: ScanReport,
    pub merge: MergeReport,
    pub resolve: ResolveReport,
    pub closed_tags: usize,
    pub index: IndexReport,
    pub aggregate: AggregateReport,
    pub stats: StatsSnapshot,
}

/// Scan, merge, resolve, index and aggregate, each stage finishing on disk before the next.
///
/// Finished outputs of an earlier run into the same directory are replaced, not extended.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineReport> {
    let started = Instant::now();
    let stats = ScanStats::new();
    let scan_cfg = &config.scan;

    clear_stage_dirs(&scan_cfg.output_dir)?;
    let scan = run_scan(scan_cfg, &stats)?;
    let merge = merge_raw_outputs(
        &scan_cfg.raw_dir,
        &scan_cfg.output_dir,
        config.keep_raw,
        &stats,
    )?;
    let (resolve, closed_tags) = resolve_tags(
        &scan_cfg.raw_dir,
        &scan_cfg.output_dir,
        &config.tag_roots,
        &stats,
    )?;
    let index = index_tags(&scan_cfg.output_dir)?;
    let aggregate = aggregate_outputs(scan_cfg)?;

    if !config.keep_raw && scan_cfg.raw_dir.exists() {
        fs::remove_dir_all(&scan_cfg.raw_dir)
            .with_context(|| format!("Failed to remove {}", scan_cfg.raw_dir.display()))?;
    }

    info!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        archives = scan.scanned(),
        tags = closed_tags,
        namespaces = aggregate.namespaces,
        "Pipeline complete"
    );

    Ok(PipelineReport {
        scan,
        merge,
        resolve,
        closed_tags,
        index,
        aggregate,
        stats: stats.snapshot(),
    })
}

/// Closes raw tags over their references and writes one file per tag.
pub fn resolve_tags(
    raw_dir: &Path,
    output_dir: &Path,
    tag_roots: &[PathBuf],
    stats: &ScanStats,
) -> Result<(ResolveReport, usize)> {
    let mut graph = load_raw_tags(raw_dir)?;
    let mut locator = DiskTagLocator::new(tag_roots.to_vec(), Some(raw_dir.to_path_buf()));
    let report = graph.resolve(&mut locator);

    for error in graph.unresolved() {
        debug!(error = %error, "Reference left unresolved");
    }
    stats.add_unresolved(report.unresolved as u64);

    let written = write_closed_tags(&graph, output_dir)?;
    info!(
        tags = written,
        iterations = report.iterations,
        converged = report.converged,
        unresolved = report.unresolved,
        located = report.located,
        "Tag resolution complete"
    );
    Ok((report, written))
}

/// Aggregates finished outputs, honoring the scan's namespace filter.
pub fn aggregate_outputs(config: &ScanConfig) -> Result<AggregateReport> {
    aggregate(&config.output_dir, |ns| config.accepts_namespace(ns))
}
