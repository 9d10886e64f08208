//! Views derived from the closed tag files.
//!
//! Two outputs are built in one streaming pass over `<out>/tags/`:
//!
//! - `item_to_tags/<item>.txt` lists every tag an item belongs to, one
//!   `<kind>: <ns>:<path>` line per tag
//! - `categories/by_tag/<category>.txt` collects the items of every tag whose
//!   name matches one of the [`CATEGORY_RULES`]
//!
//! Tag files are read one at a time and their lines spilled through the
//! [`OutputWriter`] in batches of at most `BATCH_SIZE` files, so neither the
//! open descriptors nor the memory grow with the number of tags. Each spill
//! file is then sorted and deduplicated on its own.

use crate::aggregate::finished_files;
use crate::config::BATCH_SIZE;
use crate::layout;
use crate::merge::{read_lines, write_lines};
use crate::models::{Identifier, TagKind};
use crate::resolve::read_tag_blocks;
use crate::writer::OutputWriter;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How a category recognizes tag names (`ns:path`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPattern {
    /// Any tag of this namespace
    Namespace(&'static str),
    /// Tags whose name starts with this prefix
    Prefix(&'static str),
    /// Tags whose name contains this fragment anywhere
    Contains(&'static str),
}

impl TagPattern {
    pub fn matches(self, tag: &str) -> bool {
        match self {
            TagPattern::Namespace(ns) => tag.split_once(':').is_some_and(|(n, _)| n == ns),
            TagPattern::Prefix(prefix) => tag.starts_with(prefix),
            TagPattern::Contains(fragment) => tag.contains(fragment),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryRule {
    pub name: &'static str,
    pub pattern: TagPattern,
}

pub const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        name: "c_tags",
        pattern: TagPattern::Namespace("c"),
    },
    CategoryRule {
        name: "forge_ores",
        pattern: TagPattern::Contains("forge:ores"),
    },
    CategoryRule {
        name: "forge_ingots",
        pattern: TagPattern::Contains("forge:ingots"),
    },
    CategoryRule {
        name: "minecraft_mineable",
        pattern: TagPattern::Prefix("minecraft:mineable/"),
    },
    CategoryRule {
        name: "forge_storage_blocks",
        pattern: TagPattern::Contains("forge:storage_blocks"),
    },
    CategoryRule {
        name: "forge_nuggets",
        pattern: TagPattern::Contains("forge:nuggets"),
    },
    CategoryRule {
        name: "forge_dusts",
        pattern: TagPattern::Contains("forge:dusts"),
    },
    CategoryRule {
        name: "forge_gems",
        pattern: TagPattern::Contains("forge:gems"),
    },
];

/// Names of the categories a tag falls into, in rule order.
pub fn categories_of(tag: &str) -> impl Iterator<Item = &'static str> + '_ {
    CATEGORY_RULES
        .iter()
        .filter(move |rule| rule.pattern.matches(tag))
        .map(|rule| rule.name)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub tag_files: usize,
    /// Items with at least one tag
    pub items: usize,
    /// Categories with at least one item
    pub categories: usize,
    pub peak_open_handles: usize,
}

/// Rebuilds `item_to_tags/` and `categories/by_tag/` from the closed tags under `output_dir`.
pub fn index_tags(output_dir: &Path) -> Result<IndexReport> {
    let item_dir = layout::item_tags_dir(output_dir);
    let category_dir = layout::category_dir(output_dir);
    for dir in [&item_dir, &category_dir] {
        if dir.exists() {
            fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
    }

    let mut report = IndexReport::default();
    let mut writer = OutputWriter::new();

    for kind in TagKind::ALL {
        for file in finished_files(&layout::tag_dir(output_dir, kind), "txt")? {
            let appends = tag_file_lines(output_dir, &file, kind)?;
            for chunk in appends.chunks(BATCH_SIZE) {
                let scope = writer.batch();
                for (path, lines) in chunk {
                    scope.append(path, lines)?;
                }
                scope.finish()?;
            }
            report.tag_files += 1;
        }
    }

    report.items = finalize_dir(&item_dir)?;
    report.categories = finalize_dir(&category_dir)?;
    report.peak_open_handles = writer.peak_open_handles();

    info!(
        tag_files = report.tag_files,
        items = report.items,
        categories = report.categories,
        "Tag index complete"
    );
    Ok(report)
}

/// Every append one closed tag file contributes, as `(target file, lines)`.
fn tag_file_lines(
    output_dir: &Path,
    file: &Path,
    kind: TagKind,
) -> Result<Vec<(PathBuf, Vec<String>)>> {
    let mut appends = Vec::new();
    for record in read_tag_blocks(file, kind)? {
        if record.items.is_empty() {
            continue;
        }
        let tag = record.id.to_string();
        let entry = format!("{}: {}", kind.dir_name(), tag);
        for item in &record.items {
            appends.push((layout::item_tags_file(output_dir, item), vec![entry.clone()]));
        }

        let items: Vec<String> = record.items.iter().map(|id| id.to_string()).collect();
        for category in categories_of(&tag) {
            appends.push((layout::category_file(output_dir, category), items.clone()));
        }
    }
    Ok(appends)
}

/// Sorts and deduplicates each spill file under `dir`. Returns how many there are.
///
/// Every file here is an index file, including items whose name ends in `_raw`.
fn finalize_dir(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    for file in &files {
        let mut lines = BTreeSet::new();
        for line in read_lines(file)? {
            let line = line?;
            if !line.trim().is_empty() {
                lines.insert(line);
            }
        }
        let lines: Vec<String> = lines.into_iter().collect();
        write_lines(file, &lines)?;
    }
    debug!(dir = %dir.display(), files = files.len(), "Finalized index files");
    Ok(files.len())
}

/// Tag lines recorded for `item`; empty when it belongs to no tag.
pub fn load_item_tags(output_dir: &Path, item: &Identifier) -> Result<Vec<String>> {
    let path = layout::item_tags_file(output_dir, item);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    read_lines(&path)?
        .map(|line| line.map_err(anyhow::Error::from))
        .collect()
}

/// Items of one category; empty when no tag matched it.
pub fn load_category(output_dir: &Path, category: &str) -> Result<BTreeSet<Identifier>> {
    let path = layout::category_file(output_dir, category);
    let mut items = BTreeSet::new();
    if !path.is_file() {
        return Ok(items);
    }
    for line in read_lines(&path)? {
        items.extend(Identifier::parse(&line?));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TagId, TagRef};
    use tempfile::TempDir;

    fn closed_tag(out: &Path, kind: TagKind, ns_path: &str, items: &[&str]) {
        let id: TagId = TagRef::parse(ns_path).unwrap().in_kind(kind);
        let mut lines = vec![id.header()];
        lines.extend(items.iter().map(|s| s.to_string()));
        write_lines(&layout::tag_file(out, &id), &lines).unwrap();
    }

    fn item(value: &str) -> Identifier {
        Identifier::parse(value).unwrap()
    }

    fn names(set: &BTreeSet<Identifier>) -> Vec<&str> {
        set.iter().map(|id| id.as_str()).collect()
    }

    #[test]
    fn patterns_match_tag_names() {
        assert!(TagPattern::Namespace("c").matches("c:dusts/iron"));
        assert!(!TagPattern::Namespace("c").matches("create:crushed"));
        assert!(TagPattern::Prefix("minecraft:mineable/").matches("minecraft:mineable/pickaxe"));
        assert!(!TagPattern::Prefix("minecraft:mineable/").matches("minecraft:logs"));
        assert!(TagPattern::Contains("forge:ores").matches("forge:ores_in_ground/stone"));

        let found: Vec<&str> = categories_of("forge:ores/iron").collect();
        assert_eq!(found, vec!["forge_ores"]);
        assert_eq!(categories_of("moda:misc").count(), 0);
    }

    #[test]
    fn items_point_back_to_their_tags() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path();
        closed_tag(out, TagKind::Items, "c:dusts/iron", &["moda:iron_dust", "modb:iron_dust"]);
        closed_tag(out, TagKind::Items, "moda:misc", &["moda:iron_dust"]);
        closed_tag(out, TagKind::Blocks, "minecraft:mineable/pickaxe", &["moda:iron_ore"]);
        closed_tag(out, TagKind::Items, "forge:ores/iron", &["moda:iron_ore"]);
        closed_tag(out, TagKind::Items, "moda:empty", &[]);

        let report = index_tags(out)?;
        assert_eq!(report.tag_files, 5);
        assert_eq!(report.items, 3);
        assert_eq!(report.categories, 3);

        assert_eq!(
            load_item_tags(out, &item("moda:iron_dust"))?,
            vec!["items: c:dusts/iron", "items: moda:misc"]
        );
        assert_eq!(
            load_item_tags(out, &item("moda:iron_ore"))?,
            vec!["blocks: minecraft:mineable/pickaxe", "items: forge:ores/iron"]
        );
        assert!(load_item_tags(out, &item("moda:nothing"))?.is_empty());

        assert_eq!(
            names(&load_category(out, "c_tags")?),
            vec!["moda:iron_dust", "modb:iron_dust"]
        );
        assert_eq!(names(&load_category(out, "forge_ores")?), vec!["moda:iron_ore"]);
        assert_eq!(
            names(&load_category(out, "minecraft_mineable")?),
            vec!["moda:iron_ore"]
        );
        assert!(!layout::category_file(out, "forge_ingots").exists());
        Ok(())
    }

    #[test]
    fn rebuild_drops_stale_entries() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path();
        closed_tag(out, TagKind::Items, "c:gems/ruby", &["moda:ruby"]);
        index_tags(out)?;
        assert!(layout::item_tags_file(out, &item("moda:ruby")).exists());

        fs::remove_dir_all(layout::tag_dir(out, TagKind::Items))?;
        closed_tag(out, TagKind::Items, "c:gems/topaz", &["moda:topaz"]);
        let report = index_tags(out)?;

        assert_eq!(report.items, 1);
        assert!(!layout::item_tags_file(out, &item("moda:ruby")).exists());
        assert_eq!(names(&load_category(out, "c_tags")?), vec!["moda:topaz"]);
        Ok(())
    }

    #[test]
    fn large_tags_are_spilled_in_bounded_batches() -> Result<()> {
        let dir = TempDir::new()?;
        let out = dir.path();
        let mut items: Vec<String> = (0..199).map(|i| format!("moda:log_{i:03}")).collect();
        items.push("moda:log_raw".to_string());
        let refs: Vec<&str> = items.iter().map(String::as_str).collect();
        closed_tag(out, TagKind::Items, "minecraft:logs", &refs);

        let report = index_tags(out)?;
        assert_eq!(report.items, 200);
        assert!(report.peak_open_handles <= BATCH_SIZE);
        Ok(())
    }
}
