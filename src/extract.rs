//! Record extraction from archive entries.
//!
//! Entries are classified purely by path shape; only tag and recipe entries
//! are decompressed and parsed. Tag JSON is turned into a [`TagValue`] tree
//! by recursive descent and then flattened into direct items and references,
//! which stay separate until the resolver runs.

use crate::archive::ArchiveReader;
use crate::error::ScanError;
use crate::models::{
    AssetKind, Identifier, Ingredient, RawEntry, RecipeRecord, TagId, TagKind, TagRecord, TagRef,
};
use crate::stats::ScanStats;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Ingredient fields scanned when a recipe type is not recognized.
const GENERIC_INGREDIENT_FIELDS: &[&str] = &[
    "ingredient",
    "ingredients",
    "input",
    "inputs",
    "base",
    "addition",
    "template",
];

const COOKING_TYPES: &[&str] = &[
    "smelting",
    "blasting",
    "smoking",
    "campfire_cooking",
    "stonecutting",
];

/// What an archive entry holds, judged by its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Asset(AssetKind),
    Tag(TagId),
    Recipe(Identifier),
    Other,
}

pub fn classify(entry: &RawEntry) -> EntryKind {
    if entry.is_directory {
        return EntryKind::Other;
    }
    let category: Vec<&str> = entry.category.iter().map(String::as_str).collect();
    let is_json = entry.path.ends_with(".json");

    match (entry.root(), category.as_slice()) {
        ("assets", ["models" | "textures", "block", ..]) => EntryKind::Asset(AssetKind::Block),
        ("assets", ["models" | "textures", "item", ..]) => EntryKind::Asset(AssetKind::Item),
        ("assets", ["fluid" | "fluid_types", ..]) if is_json => EntryKind::Asset(AssetKind::Fluid),
        ("data", ["tags", kind, rest @ ..]) if is_json => match TagKind::from_dir(kind) {
            Some(kind) => {
                let mut path: Vec<&str> = rest.to_vec();
                path.push(entry.stem());
                EntryKind::Tag(TagId {
                    kind,
                    namespace: entry.namespace.clone(),
                    path: path.join("/"),
                })
            }
            None => EntryKind::Other,
        },
        ("data", [dir, rest @ ..]) if is_json && dir.starts_with("recipe") => {
            let mut path: Vec<&str> = rest.to_vec();
            path.push(entry.stem());
            Identifier::new(&entry.namespace, &path.join("/"))
                .map(EntryKind::Recipe)
                .unwrap_or(EntryKind::Other)
        }
        _ => EntryKind::Other,
    }
}

/// One value of a tag's `values` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Identifier(Identifier),
    TagReference(TagRef),
    NestedList(Vec<TagValue>),
}

impl TagValue {
    /// Recursive descent over the shapes tag files use in practice:
    /// `"ns:id"`, `"#ns:tag"`, `{"id"|"item"|"tag"|"values"}` and arrays.
    pub fn from_json(value: &Value) -> Option<TagValue> {
        match value {
            Value::String(s) => Self::from_str_value(s),
            Value::Array(values) => Some(TagValue::NestedList(
                values.iter().filter_map(TagValue::from_json).collect(),
            )),
            Value::Object(map) => {
                let mut parts = Vec::new();
                for key in ["id", "item"] {
                    if let Some(v) = map.get(key).and_then(Value::as_str) {
                        parts.extend(Self::from_str_value(v));
                    }
                }
                if let Some(tag) = map.get("tag").and_then(Value::as_str) {
                    parts.extend(TagRef::parse(tag).map(TagValue::TagReference));
                }
                if let Some(nested) = map.get("values") {
                    parts.extend(TagValue::from_json(nested));
                }
                match parts.len() {
                    0 => None,
                    1 => parts.pop(),
                    _ => Some(TagValue::NestedList(parts)),
                }
            }
            _ => None,
        }
    }

    fn from_str_value(s: &str) -> Option<TagValue> {
        if s.starts_with('#') {
            TagRef::parse(s).map(TagValue::TagReference)
        } else {
            Identifier::parse(s).map(TagValue::Identifier)
        }
    }

    /// Sorts this value into direct items and references.
    pub fn flatten_into(self, items: &mut BTreeSet<Identifier>, refs: &mut BTreeSet<TagRef>) {
        match self {
            TagValue::Identifier(id) => {
                items.insert(id);
            }
            TagValue::TagReference(r) => {
                refs.insert(r);
            }
            TagValue::NestedList(values) => {
                for v in values {
                    v.flatten_into(items, refs);
                }
            }
        }
    }
}

/// Parses a tag definition (`{"values": [...]}` or a bare array).
pub fn parse_tag(id: TagId, bytes: &[u8]) -> Result<TagRecord, ScanError> {
    let json: Value = serde_json::from_slice(bytes).map_err(|e| ScanError::MalformedRecord {
        entry: id.to_string(),
        reason: e.to_string(),
    })?;
    let values = match &json {
        Value::Object(map) => map.get("values"),
        Value::Array(_) => Some(&json),
        _ => {
            return Err(ScanError::MalformedRecord {
                entry: id.to_string(),
                reason: "tag file is neither an object nor an array".to_string(),
            })
        }
    };

    let mut record = TagRecord::new(id);
    if let Some(value) = values.and_then(TagValue::from_json) {
        value.flatten_into(&mut record.items, &mut record.references);
    }
    Ok(record)
}

/// Parses a recipe file, locating ingredients by declared type.
pub fn parse_recipe(id: Identifier, bytes: &[u8]) -> Result<RecipeRecord, ScanError> {
    let malformed = |reason: String| ScanError::MalformedRecord {
        entry: id.to_string(),
        reason,
    };
    let json: Value = serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
    let Value::Object(map) = &json else {
        return Err(malformed("recipe is not a JSON object".to_string()));
    };

    let recipe_type = map
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let fields: &[&str] = if recipe_type.contains("crafting_shaped")
        || recipe_type.contains("crafting_shapeless")
    {
        &["key", "ingredients", "ingredient"]
    } else if COOKING_TYPES.iter().any(|t| recipe_type.contains(t)) {
        &["ingredient"]
    } else if recipe_type.contains("smithing") {
        &["base", "addition", "template"]
    } else {
        GENERIC_INGREDIENT_FIELDS
    };

    let mut inputs = BTreeSet::new();
    for field in fields {
        match (*field, map.get(*field)) {
            // Shaped recipes map pattern symbols to ingredients
            ("key", Some(Value::Object(key))) => {
                for ingredient in key.values() {
                    collect_ingredients(ingredient, &mut inputs);
                }
            }
            (_, Some(value)) => collect_ingredients(value, &mut inputs),
            (_, None) => {}
        }
    }

    let mut outputs = BTreeSet::new();
    if let Some(result) = map.get("result") {
        outputs.extend(result_identifier(result));
    }
    if let Some(Value::Array(results)) = map.get("results") {
        outputs.extend(results.iter().filter_map(result_identifier));
    }

    Ok(RecipeRecord {
        id,
        recipe_type,
        inputs,
        outputs,
    })
}

fn collect_ingredients(value: &Value, out: &mut BTreeSet<Ingredient>) {
    match value {
        Value::String(s) => out.extend(Ingredient::parse(s)),
        Value::Array(values) => {
            for v in values {
                collect_ingredients(v, out);
            }
        }
        Value::Object(map) => {
            if let Some(item) = map.get("item").and_then(Value::as_str) {
                out.extend(Identifier::parse(item).map(Ingredient::Item));
            } else if let Some(tag) = map.get("tag").and_then(Value::as_str) {
                out.extend(TagRef::parse(tag).map(Ingredient::Tag));
            } else if let Some(items) = map.get("items") {
                collect_ingredients(items, out);
            }
        }
        _ => {}
    }
}

fn result_identifier(value: &Value) -> Option<Identifier> {
    match value {
        Value::String(s) => Identifier::parse(s),
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("item"))
            .and_then(Value::as_str)
            .and_then(Identifier::parse),
        _ => None,
    }
}

/// Everything one archive contributed, buffered before it is written out.
#[derive(Debug, Default)]
pub struct ArchiveRecords {
    /// `(kind, namespace)` -> raw `ns:stem` candidates
    pub assets: FxHashMap<(AssetKind, String), Vec<String>>,
    pub tags: FxHashMap<TagId, TagRecord>,
    pub recipes: Vec<RecipeRecord>,
    /// Tags of namespaces the filter rejects. Only used to resolve references.
    pub reference_tags: FxHashMap<TagId, TagRecord>,
}

fn merge_tag(tags: &mut FxHashMap<TagId, TagRecord>, record: TagRecord) {
    match tags.get_mut(&record.id) {
        Some(existing) => existing.absorb(record),
        None => {
            tags.insert(record.id.clone(), record);
        }
    }
}

/// Walks every entry of an open archive and extracts its records.
///
/// Entries that cannot be read or parsed are skipped, logged and counted;
/// the rest of the archive is still processed. Entries of namespaces that
/// `accepts` rejects produce no records, except tag files, which land in
/// [`ArchiveRecords::reference_tags`] so references into them still resolve.
pub fn extract_archive<F>(reader: &mut ArchiveReader, accepts: F, stats: &ScanStats) -> ArchiveRecords
where
    F: Fn(&str) -> bool,
{
    let mut records = ArchiveRecords::default();
    let entries: Vec<RawEntry> = reader.entries().collect();

    for entry in entries {
        if !accepts(&entry.namespace) {
            if let EntryKind::Tag(id) = classify(&entry) {
                let parsed = reader
                    .read_entry(&entry.path)
                    .and_then(|bytes| parse_tag(id, &bytes));
                match parsed {
                    Ok(record) => merge_tag(&mut records.reference_tags, record),
                    Err(e) => debug!(entry = %entry.path, error = %e, "Skipping reference tag"),
                }
            }
            continue;
        }

        match classify(&entry) {
            EntryKind::Asset(kind) => {
                records
                    .assets
                    .entry((kind, entry.namespace.clone()))
                    .or_default()
                    .push(format!("{}:{}", entry.namespace, entry.stem()));
                stats.inc_assets();
            }
            EntryKind::Tag(id) => {
                let parsed = reader
                    .read_entry(&entry.path)
                    .and_then(|bytes| parse_tag(id, &bytes));
                match parsed {
                    Ok(record) => {
                        stats.inc_tags();
                        merge_tag(&mut records.tags, record);
                    }
                    Err(e) => record_skip(reader, &entry, e, stats),
                }
            }
            EntryKind::Recipe(id) => {
                let parsed = reader
                    .read_entry(&entry.path)
                    .and_then(|bytes| parse_recipe(id, &bytes));
                match parsed {
                    Ok(recipe) => {
                        stats.inc_recipes();
                        records.recipes.push(recipe);
                    }
                    Err(e) => record_skip(reader, &entry, e, stats),
                }
            }
            EntryKind::Other => {}
        }
    }

    debug!(
        archive = %reader.path().display(),
        tags = records.tags.len(),
        reference_tags = records.reference_tags.len(),
        recipes = records.recipes.len(),
        "Archive extracted"
    );
    records
}

fn record_skip(reader: &ArchiveReader, entry: &RawEntry, error: ScanError, stats: &ScanStats) {
    match error {
        ScanError::EntryRead { .. } => stats.inc_entry_errors(),
        _ => stats.inc_malformed(),
    }
    warn!(
        archive = %reader.path().display(),
        entry = %entry.path,
        error = %error,
        "Skipping entry"
    );
}
