//! Per-namespace collections built from the finished outputs.
//!
//! Aggregation runs in two phases so memory stays bounded. First every
//! cleaned asset file, closed tag file and merged recipe file is streamed
//! once and its identifiers are appended to per-namespace spill files through
//! the [`OutputWriter`], one batch per source file. Then each namespace is
//! finalized on its own (read, sort, dedup, rewrite), so at most one
//! namespace's set is held in memory.

use crate::layout;
use crate::merge::{read_lines, write_lines};
use crate::models::{AssetKind, Identifier, NamespaceCollection, RecipeRecord, TagKind};
use crate::writer::OutputWriter;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregateReport {
    pub source_files: usize,
    pub namespaces: usize,
    pub identifiers: usize,
}

/// Builds `<out>/collections/<ns>/{blocks,items,fluids}.txt` from everything under `out`.
///
/// Only identifiers whose namespace passes `accepts` are collected.
pub fn aggregate<F>(output_dir: &Path, accepts: F) -> Result<AggregateReport>
where
    F: Fn(&str) -> bool,
{
    let collections = output_dir.join(layout::COLLECTIONS_DIR);
    if collections.exists() {
        fs::remove_dir_all(&collections)
            .with_context(|| format!("Failed to clear {}", collections.display()))?;
    }

    let mut report = AggregateReport::default();
    let mut writer = OutputWriter::new();

    for (source, file) in sources(output_dir)? {
        let grouped = match source {
            Source::Assets(kind) => read_identifiers(&file, kind)?,
            Source::Tags(kind) => read_identifiers(&file, kind.asset_kind())?,
            Source::Recipes => read_recipe_items(&file)?,
        };

        let scope = writer.batch();
        for ((namespace, kind), lines) in grouped {
            if accepts(&namespace) {
                scope.append(&layout::collection_file(output_dir, &namespace, kind), &lines)?;
            }
        }
        scope.finish()?;
        report.source_files += 1;
    }

    for namespace in list_namespaces(output_dir)? {
        report.identifiers += finalize_namespace(output_dir, &namespace)?;
        report.namespaces += 1;
    }

    info!(
        namespaces = report.namespaces,
        identifiers = report.identifiers,
        peak_open_handles = writer.peak_open_handles(),
        "Aggregation complete"
    );
    Ok(report)
}

/// Reads a finished collection back.
pub fn load_collection(output_dir: &Path, namespace: &str) -> Result<NamespaceCollection> {
    let mut collection = NamespaceCollection::new(namespace);
    for kind in AssetKind::ALL {
        let path = layout::collection_file(output_dir, namespace, kind);
        if !path.is_file() {
            continue;
        }
        let set = collection.set_mut(kind);
        for line in read_lines(&path)? {
            set.extend(Identifier::parse(&line?));
        }
    }
    Ok(collection)
}

/// Namespaces that have a collection directory, sorted.
pub fn list_namespaces(output_dir: &Path) -> Result<Vec<String>> {
    let dir = output_dir.join(layout::COLLECTIONS_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut namespaces = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            namespaces.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    namespaces.sort();
    Ok(namespaces)
}

enum Source {
    Assets(AssetKind),
    Tags(TagKind),
    Recipes,
}

/// Finished files to collect from, in a fixed order.
fn sources(output_dir: &Path) -> Result<Vec<(Source, PathBuf)>> {
    let mut sources = Vec::new();
    for kind in AssetKind::ALL {
        for file in finished_files(&layout::asset_dir(output_dir, kind), "txt")? {
            sources.push((Source::Assets(kind), file));
        }
    }
    for kind in TagKind::ALL {
        for file in finished_files(&layout::tag_dir(output_dir, kind), "txt")? {
            sources.push((Source::Tags(kind), file));
        }
    }
    for file in finished_files(&layout::recipe_dir(output_dir), "jsonl")? {
        sources.push((Source::Recipes, file));
    }
    Ok(sources)
}

/// Finished (non-raw) files with `extension` directly under `dir`, sorted.
pub(crate) fn finished_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        let matches = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(extension)
            && layout::merged_name(&path).is_none();
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

type Grouped = FxHashMap<(String, AssetKind), Vec<String>>;

/// Identifier lines of an asset or closed tag file; `#` lines are headers, not items.
fn read_identifiers(path: &Path, kind: AssetKind) -> Result<Grouped> {
    let mut grouped = Grouped::default();
    for line in read_lines(path)? {
        let line = line?;
        if line.starts_with('#') {
            continue;
        }
        if let Some(id) = Identifier::parse(&line) {
            grouped
                .entry((id.namespace().to_string(), kind))
                .or_default()
                .push(id.to_string());
        }
    }
    Ok(grouped)
}

/// Item inputs and outputs of every recipe; tag ingredients are skipped.
fn read_recipe_items(path: &Path) -> Result<Grouped> {
    let mut grouped = Grouped::default();
    for line in read_lines(path)? {
        let line = line?;
        let recipe: RecipeRecord = match serde_json::from_str(&line) {
            Ok(recipe) => recipe,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable recipe line");
                continue;
            }
        };
        let items = recipe
            .inputs
            .iter()
            .filter_map(|ingredient| ingredient.as_item())
            .chain(recipe.outputs.iter());
        for id in items {
            grouped
                .entry((id.namespace().to_string(), AssetKind::Item))
                .or_default()
                .push(id.to_string());
        }
    }
    Ok(grouped)
}

fn finalize_namespace(output_dir: &Path, namespace: &str) -> Result<usize> {
    let mut total = 0;
    for kind in AssetKind::ALL {
        let path = layout::collection_file(output_dir, namespace, kind);
        if !path.is_file() {
            continue;
        }
        let mut set = BTreeSet::new();
        for line in read_lines(&path)? {
            set.extend(Identifier::parse(&line?));
        }
        let lines: Vec<String> = set.iter().map(|id| id.to_string()).collect();
        write_lines(&path, &lines)?;
        total += lines.len();
    }
    debug!(namespace, identifiers = total, "Finalized namespace");
    Ok(total)
}
