use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Root directories under which an entry's second segment is its namespace.
const NAMESPACE_ROOTS: &[&str] = &["assets", "data"];

/// A mod archive queued for scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub path: PathBuf,
    pub mod_id: String,
}

/// One archive entry split into its structural parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub path: String,
    pub namespace: String,
    /// Segments between the namespace and the file name
    pub category: Vec<String>,
    pub is_directory: bool,
}

impl RawEntry {
    /// Returns `None` for entries outside `assets/<ns>/` and `data/<ns>/`.
    pub fn from_path(path: &str, is_directory: bool) -> Option<Self> {
        let parts: Vec<&str> = path.trim_end_matches('/').split('/').collect();
        if parts.len() < 2 || !NAMESPACE_ROOTS.contains(&parts[0]) || parts[1].is_empty() {
            return None;
        }
        let category = if parts.len() > 3 {
            parts[2..parts.len() - 1]
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            Vec::new()
        };
        Some(Self {
            path: path.to_string(),
            namespace: parts[1].to_string(),
            category,
            is_directory,
        })
    }

    pub fn root(&self) -> &str {
        self.path.split('/').next().unwrap_or_default()
    }

    /// Final path segment without its last extension.
    pub fn stem(&self) -> &str {
        let name = self.path.rsplit('/').next().unwrap_or_default();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(dot) => &name[..dot],
        }
    }
}

/// A `namespace:object_id` pair, ordered by its textual form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    full: String,
    colon: usize,
}

impl Identifier {
    /// Parses `ns:object`; both halves must be non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let colon = raw.find(':')?;
        if colon == 0 || colon + 1 == raw.len() {
            return None;
        }
        Some(Self {
            full: raw.to_string(),
            colon,
        })
    }

    pub fn new(namespace: &str, object_id: &str) -> Option<Self> {
        if namespace.is_empty() || object_id.is_empty() {
            return None;
        }
        Some(Self {
            full: format!("{}:{}", namespace, object_id),
            colon: namespace.len(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.full[..self.colon]
    }

    pub fn object_id(&self) -> &str {
        &self.full[self.colon + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl TryFrom<String> for Identifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identifier::parse(&value).ok_or_else(|| format!("invalid identifier: {value}"))
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.full
    }
}

/// Asset category an identifier is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetKind {
    Block,
    Item,
    Fluid,
}

impl AssetKind {
    pub const ALL: [AssetKind; 3] = [AssetKind::Block, AssetKind::Item, AssetKind::Fluid];

    /// Plural name used for directories and file suffixes.
    pub fn plural(self) -> &'static str {
        match self {
            AssetKind::Block => "blocks",
            AssetKind::Item => "items",
            AssetKind::Fluid => "fluids",
        }
    }
}

/// Registry a tag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKind {
    Items,
    Blocks,
    Fluids,
}

impl TagKind {
    pub const ALL: [TagKind; 3] = [TagKind::Items, TagKind::Blocks, TagKind::Fluids];

    /// Accepts the plural directory names and the singular ones newer packs use.
    pub fn from_dir(dir: &str) -> Option<Self> {
        match dir {
            "items" | "item" => Some(TagKind::Items),
            "blocks" | "block" => Some(TagKind::Blocks),
            "fluids" | "fluid" => Some(TagKind::Fluids),
            _ => None,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            TagKind::Items => "items",
            TagKind::Blocks => "blocks",
            TagKind::Fluids => "fluids",
        }
    }

    pub fn asset_kind(self) -> AssetKind {
        match self {
            TagKind::Items => AssetKind::Item,
            TagKind::Blocks => AssetKind::Block,
            TagKind::Fluids => AssetKind::Fluid,
        }
    }
}

/// A `#namespace:path` tag reference as written in tag and recipe JSON.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagRef {
    pub namespace: String,
    pub path: String,
}

impl TagRef {
    /// Accepts both `#ns:path` and `ns:path`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().trim_start_matches('#');
        let (namespace, path) = raw.split_once(':')?;
        if namespace.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            path: path.to_string(),
        })
    }

    pub fn in_kind(&self, kind: TagKind) -> TagId {
        TagId {
            kind,
            namespace: self.namespace.clone(),
            path: self.path.clone(),
        }
    }
}

impl fmt::Display for TagRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

/// Full identity of a tag: registry plus `namespace:category[/material]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId {
    pub kind: TagKind,
    pub namespace: String,
    pub path: String,
}

impl TagId {
    pub fn to_ref(&self) -> TagRef {
        TagRef {
            namespace: self.namespace.clone(),
            path: self.path.clone(),
        }
    }

    /// Header line carrying the tag identity in tag files.
    pub fn header(&self) -> String {
        format!("{}{}:{}", TAG_HEADER_PREFIX, self.namespace, self.path)
    }

    /// File stem for this tag: `ns_category_material`.
    pub fn file_stem(&self) -> String {
        sanitize_file_stem(&format!("{}:{}", self.namespace, self.path))
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

/// Prefix of the identity line in tag files; never an item.
pub const TAG_HEADER_PREFIX: &str = "#TAG:";

/// Parses a `#TAG:ns:path` header line into the tag's ref.
pub fn parse_tag_header(line: &str) -> Option<TagRef> {
    line.trim()
        .strip_prefix(TAG_HEADER_PREFIX)
        .and_then(TagRef::parse)
}

/// A tag definition: direct items and unresolved references kept apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    pub id: TagId,
    pub items: BTreeSet<Identifier>,
    pub references: BTreeSet<TagRef>,
}

impl TagRecord {
    pub fn new(id: TagId) -> Self {
        Self {
            id,
            items: BTreeSet::new(),
            references: BTreeSet::new(),
        }
    }

    /// Union of another record for the same tag.
    pub fn absorb(&mut self, other: TagRecord) {
        self.items.extend(other.items);
        self.references.extend(other.references);
    }
}

/// A recipe input: a concrete item or a whole tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Ingredient {
    Item(Identifier),
    Tag(TagRef),
}

impl Ingredient {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.starts_with('#') {
            TagRef::parse(raw).map(Ingredient::Tag)
        } else {
            Identifier::parse(raw).map(Ingredient::Item)
        }
    }

    pub fn as_item(&self) -> Option<&Identifier> {
        match self {
            Ingredient::Item(id) => Some(id),
            Ingredient::Tag(_) => None,
        }
    }
}

impl fmt::Display for Ingredient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ingredient::Item(id) => write!(f, "{id}"),
            Ingredient::Tag(tag) => write!(f, "#{tag}"),
        }
    }
}

impl TryFrom<String> for Ingredient {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ingredient::parse(&value).ok_or_else(|| format!("invalid ingredient: {value}"))
    }
}

impl From<Ingredient> for String {
    fn from(ingredient: Ingredient) -> Self {
        ingredient.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub id: Identifier,
    #[serde(rename = "type")]
    pub recipe_type: String,
    pub inputs: BTreeSet<Ingredient>,
    pub outputs: BTreeSet<Identifier>,
}

/// Everything known about one namespace after aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceCollection {
    pub namespace: String,
    pub blocks: BTreeSet<Identifier>,
    pub items: BTreeSet<Identifier>,
    pub fluids: BTreeSet<Identifier>,
}

impl NamespaceCollection {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn set_mut(&mut self, kind: AssetKind) -> &mut BTreeSet<Identifier> {
        match kind {
            AssetKind::Block => &mut self.blocks,
            AssetKind::Item => &mut self.items,
            AssetKind::Fluid => &mut self.fluids,
        }
    }
}

/// Replaces characters that are unsafe in file names, e.g. `#forge:ores` -> `tag_forge_ores`.
pub fn sanitize_file_stem(name: &str) -> String {
    name.replace([':', '/'], "_").replace('#', "tag_")
}
