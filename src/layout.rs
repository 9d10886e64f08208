//! File names of every raw and finished output.
//!
//! ```text
//! <raw>/<kinds>/<ns>_<kinds>_raw.txt        <out>/<kinds>/<ns>_<kinds>.txt
//! <raw>/tags/<kind>/<ns>_<path>_raw.txt     <out>/tags/<kind>/<ns>_<path>.txt
//! <raw>/reference_tags/<kind>/<ns>_<path>_raw.txt
//! <raw>/recipes/<ns>_recipes_raw.jsonl      <out>/recipes/<ns>_recipes.jsonl
//!                                           <out>/recipes/by_type/<type>.txt
//!                                           <out>/collections/<ns>/<kinds>.txt
//!                                           <out>/item_to_tags/<ns>_<id>.txt
//!                                           <out>/categories/by_tag/<category>.txt
//!                                           <out>/mods.csv
//! ```

use crate::models::{sanitize_file_stem, AssetKind, Identifier, TagId, TagKind};
use std::path::{Path, PathBuf};

/// Marks append-only files that still need merging.
pub const RAW_SUFFIX: &str = "_raw";

pub const TAGS_DIR: &str = "tags";
/// Tags outside the namespace filter, kept for lookups only.
pub const REFERENCE_TAGS_DIR: &str = "reference_tags";
pub const RECIPES_DIR: &str = "recipes";
pub const RECIPE_TYPES_DIR: &str = "by_type";
pub const COLLECTIONS_DIR: &str = "collections";
pub const ITEM_TO_TAGS_DIR: &str = "item_to_tags";
pub const CATEGORIES_DIR: &str = "categories";
pub const BY_TAG_DIR: &str = "by_tag";
pub const MANIFEST_FILE: &str = "mods.csv";

pub fn asset_dir(root: &Path, kind: AssetKind) -> PathBuf {
    root.join(kind.plural())
}

pub fn raw_asset_file(raw: &Path, kind: AssetKind, namespace: &str) -> PathBuf {
    asset_dir(raw, kind).join(format!(
        "{}_{}{}.txt",
        namespace,
        kind.plural(),
        RAW_SUFFIX
    ))
}

pub fn asset_file(out: &Path, kind: AssetKind, namespace: &str) -> PathBuf {
    asset_dir(out, kind).join(format!("{}_{}.txt", namespace, kind.plural()))
}

pub fn tag_dir(root: &Path, kind: TagKind) -> PathBuf {
    root.join(TAGS_DIR).join(kind.dir_name())
}

pub fn raw_tag_file(raw: &Path, id: &TagId) -> PathBuf {
    tag_dir(raw, id.kind).join(format!("{}{}.txt", id.file_stem(), RAW_SUFFIX))
}

pub fn raw_reference_tag_file(raw: &Path, id: &TagId) -> PathBuf {
    raw.join(REFERENCE_TAGS_DIR)
        .join(id.kind.dir_name())
        .join(format!("{}{}.txt", id.file_stem(), RAW_SUFFIX))
}

pub fn tag_file(out: &Path, id: &TagId) -> PathBuf {
    tag_dir(out, id.kind).join(format!("{}.txt", id.file_stem()))
}

pub fn recipe_dir(root: &Path) -> PathBuf {
    root.join(RECIPES_DIR)
}

pub fn raw_recipe_file(raw: &Path, namespace: &str) -> PathBuf {
    recipe_dir(raw).join(format!("{}_recipes{}.jsonl", namespace, RAW_SUFFIX))
}

pub fn recipe_file(out: &Path, namespace: &str) -> PathBuf {
    recipe_dir(out).join(format!("{}_recipes.jsonl", namespace))
}

/// `minecraft:crafting_shaped` -> `by_type/minecraft_crafting_shaped.txt`
pub fn recipe_type_file(out: &Path, recipe_type: &str) -> PathBuf {
    let name = if recipe_type.is_empty() {
        "unknown".to_string()
    } else {
        sanitize_file_stem(recipe_type)
    };
    recipe_dir(out)
        .join(RECIPE_TYPES_DIR)
        .join(format!("{name}.txt"))
}

pub fn collection_dir(out: &Path, namespace: &str) -> PathBuf {
    out.join(COLLECTIONS_DIR).join(namespace)
}

pub fn collection_file(out: &Path, namespace: &str, kind: AssetKind) -> PathBuf {
    collection_dir(out, namespace).join(format!("{}.txt", kind.plural()))
}

pub fn item_tags_dir(out: &Path) -> PathBuf {
    out.join(ITEM_TO_TAGS_DIR)
}

/// `moda:iron_dust` -> `item_to_tags/moda_iron_dust.txt`
pub fn item_tags_file(out: &Path, item: &Identifier) -> PathBuf {
    item_tags_dir(out).join(format!("{}.txt", sanitize_file_stem(item.as_str())))
}

pub fn category_dir(out: &Path) -> PathBuf {
    out.join(CATEGORIES_DIR).join(BY_TAG_DIR)
}

pub fn category_file(out: &Path, category: &str) -> PathBuf {
    category_dir(out).join(format!("{category}.txt"))
}

/// Directories a run rebuilds from scratch under `root`, raw or finished.
pub fn stage_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = AssetKind::ALL
        .into_iter()
        .map(|kind| asset_dir(root, kind))
        .collect();
    dirs.push(root.join(TAGS_DIR));
    dirs.push(root.join(REFERENCE_TAGS_DIR));
    dirs.push(recipe_dir(root));
    dirs
}

pub fn manifest_file(out: &Path) -> PathBuf {
    out.join(MANIFEST_FILE)
}

/// Name of the merged file for a raw file, or `None` if `path` is not raw.
pub fn merged_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let (stem, ext) = name.rsplit_once('.')?;
    let stem = stem.strip_suffix(RAW_SUFFIX)?;
    Some(format!("{stem}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_and_merged_names_pair_up() {
        let raw = Path::new("raw");
        let out = Path::new("out");
        let raw_file = raw_asset_file(raw, AssetKind::Block, "moda");
        assert_eq!(raw_file, PathBuf::from("raw/blocks/moda_blocks_raw.txt"));
        assert_eq!(
            asset_file(out, AssetKind::Block, "moda").file_name().unwrap().to_str(),
            merged_name(&raw_file).as_deref()
        );
        assert_eq!(
            merged_name(&raw_recipe_file(raw, "moda")).as_deref(),
            Some("moda_recipes.jsonl")
        );
        assert_eq!(merged_name(Path::new("out/blocks/moda_blocks.txt")), None);
    }

    #[test]
    fn tag_files_use_sanitized_ids() {
        let id = TagId {
            kind: TagKind::Items,
            namespace: "c".to_string(),
            path: "ingots/iron".to_string(),
        };
        assert_eq!(
            raw_tag_file(Path::new("raw"), &id),
            PathBuf::from("raw/tags/items/c_ingots_iron_raw.txt")
        );
        assert_eq!(
            raw_reference_tag_file(Path::new("raw"), &id),
            PathBuf::from("raw/reference_tags/items/c_ingots_iron_raw.txt")
        );
        assert_eq!(
            tag_file(Path::new("out"), &id),
            PathBuf::from("out/tags/items/c_ingots_iron.txt")
        );
    }

    #[test]
    fn tag_views_have_their_own_dirs() {
        let out = Path::new("out");
        assert_eq!(
            item_tags_file(out, &Identifier::parse("moda:iron_dust").unwrap()),
            PathBuf::from("out/item_to_tags/moda_iron_dust.txt")
        );
        assert_eq!(
            category_file(out, "forge_ores"),
            PathBuf::from("out/categories/by_tag/forge_ores.txt")
        );
    }

    #[test]
    fn stage_dirs_leave_collections_alone() {
        let dirs = stage_dirs(Path::new("out"));
        assert!(dirs.contains(&PathBuf::from("out/fluids")));
        assert!(dirs.contains(&PathBuf::from("out/reference_tags")));
        assert!(!dirs.iter().any(|d| d.ends_with(COLLECTIONS_DIR)));
    }

    #[test]
    fn recipe_types_get_their_own_file() {
        assert_eq!(
            recipe_type_file(Path::new("out"), "minecraft:crafting_shaped"),
            PathBuf::from("out/recipes/by_type/minecraft_crafting_shaped.txt")
        );
        assert_eq!(
            recipe_type_file(Path::new("out"), ""),
            PathBuf::from("out/recipes/by_type/unknown.txt")
        );
    }
}
