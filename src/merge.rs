use crate::config::{READ_BUFFER_SIZE, WRITE_BUFFER_SIZE};
use crate::layout;
use crate::models::{AssetKind, Identifier, RecipeRecord};
use crate::normalize::Normalizer;
use crate::stats::ScanStats;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub asset_files: usize,
    pub identifiers: usize,
    pub recipe_files: usize,
    pub recipes: usize,
}

/// Turns the append-only `_raw` files into cleaned, sorted, deduplicated outputs.
///
/// Asset lines go through the identifier normalizer; recipes are deduplicated
/// by id and indexed by type under `recipes/by_type/`. Raw files are removed
/// afterwards unless `keep_raw` is set.
pub fn merge_raw_outputs(
    raw_dir: &Path,
    output_dir: &Path,
    keep_raw: bool,
    stats: &ScanStats,
) -> Result<MergeReport> {
    info!("Merging raw outputs from: {}", raw_dir.display());
    let mut report = MergeReport::default();

    for kind in AssetKind::ALL {
        let normalizer = match kind {
            AssetKind::Fluid => Normalizer::fluids(),
            _ => Normalizer::default(),
        };
        for raw_file in raw_files(&layout::asset_dir(raw_dir, kind))? {
            let target = merged_path(&raw_file, &layout::asset_dir(output_dir, kind))?;
            report.identifiers += merge_asset_file(&raw_file, &target, &normalizer)?;
            report.asset_files += 1;
            finish_raw(&raw_file, keep_raw)?;
        }
    }

    let mut by_type: BTreeMap<String, BTreeSet<Identifier>> = BTreeMap::new();
    for raw_file in raw_files(&layout::recipe_dir(raw_dir))? {
        let target = merged_path(&raw_file, &layout::recipe_dir(output_dir))?;
        report.recipes += merge_recipe_file(&raw_file, &target, &mut by_type, stats)?;
        report.recipe_files += 1;
        finish_raw(&raw_file, keep_raw)?;
    }
    for (recipe_type, ids) in &by_type {
        let lines: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        write_lines(&layout::recipe_type_file(output_dir, recipe_type), &lines)?;
    }

    info!(
        asset_files = report.asset_files,
        identifiers = report.identifiers,
        recipes = report.recipes,
        recipe_types = by_type.len(),
        "Merge complete"
    );
    Ok(report)
}

/// Raw files directly under `dir`, sorted. A missing directory has none.
pub fn raw_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && layout::merged_name(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Removes the per-stage directories under `root` so a run starts from nothing.
pub fn clear_stage_dirs(root: &Path) -> Result<usize> {
    let mut removed = 0;
    for dir in layout::stage_dirs(root) {
        if dir.is_dir() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!(root = %root.display(), dirs = removed, "Cleared previous run");
    }
    Ok(removed)
}

fn merged_path(raw_file: &Path, out_dir: &Path) -> Result<PathBuf> {
    let name = layout::merged_name(raw_file)
        .with_context(|| format!("Not a raw file: {}", raw_file.display()))?;
    Ok(out_dir.join(name))
}

fn merge_asset_file(raw_file: &Path, target: &Path, normalizer: &Normalizer) -> Result<usize> {
    let mut cleaned = BTreeSet::new();
    for line in read_lines(raw_file)? {
        let line = line?;
        match normalizer.clean_line(&line) {
            Some(id) => {
                cleaned.insert(id);
            }
            None if line.trim().is_empty() => {}
            None => debug!(line = %line, "Dropping identifier that cleaned to nothing"),
        }
    }
    let lines: Vec<String> = cleaned.iter().map(|id| id.to_string()).collect();
    write_lines(target, &lines)?;
    Ok(lines.len())
}

fn merge_recipe_file(
    raw_file: &Path,
    target: &Path,
    by_type: &mut BTreeMap<String, BTreeSet<Identifier>>,
    stats: &ScanStats,
) -> Result<usize> {
    // Sorting the raw lines first makes the surviving duplicate independent of arrival order
    let mut lines = BTreeSet::new();
    for line in read_lines(raw_file)? {
        let line = line?;
        if !line.trim().is_empty() {
            lines.insert(line);
        }
    }

    let mut recipes: BTreeMap<Identifier, String> = BTreeMap::new();
    for line in lines {
        match serde_json::from_str::<RecipeRecord>(&line) {
            Ok(recipe) => {
                if recipes.contains_key(&recipe.id) {
                    continue;
                }
                by_type
                    .entry(recipe.recipe_type.clone())
                    .or_default()
                    .insert(recipe.id.clone());
                recipes.insert(recipe.id, line);
            }
            Err(e) => {
                stats.inc_malformed();
                warn!(file = %raw_file.display(), error = %e, "Skipping malformed recipe line");
            }
        }
    }

    let lines: Vec<String> = recipes.into_values().collect();
    write_lines(target, &lines)?;
    Ok(lines.len())
}

fn finish_raw(raw_file: &Path, keep_raw: bool) -> Result<()> {
    if !keep_raw {
        fs::remove_file(raw_file)
            .with_context(|| format!("Failed to remove {}", raw_file.display()))?;
    }
    Ok(())
}

pub(crate) fn read_lines(path: &Path) -> Result<std::io::Lines<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(BufReader::with_capacity(READ_BUFFER_SIZE, file).lines())
}

/// Replaces `path` with `lines`, one per line.
pub(crate) fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}
