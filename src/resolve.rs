//! Fixpoint closure of tag references.
//!
//! A tag's items are the union of its own items and the items of every tag it
//! references, transitively. [`TagGraph::resolve`] computes this with a
//! worklist: each [`TagGraph::step`] revisits only tags whose referenced tags
//! changed in the previous step. Item sets only ever grow, so the closure is
//! reached regardless of visiting order; order only changes how many steps it
//! takes. Runs stop after `TAG_RESOLVE_MAX_ITERATIONS` steps even if not
//! converged, which can truncate reference chains deeper than the cap.

use crate::config::TAG_RESOLVE_MAX_ITERATIONS;
use crate::error::ScanError;
use crate::extract::parse_tag;
use crate::layout;
use crate::merge::{raw_files, read_lines, write_lines};
use crate::models::{parse_tag_header, Identifier, TagId, TagKind, TagRecord, TagRef};
use anyhow::Result;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Finds tag definitions the graph does not hold yet.
pub trait TagLocator {
    fn locate(&mut self, id: &TagId) -> Option<TagRecord>;
}

/// Locator for graphs that must be resolved from what they already hold.
pub struct NoLocator;

impl TagLocator for NoLocator {
    fn locate(&mut self, _id: &TagId) -> Option<TagRecord> {
        None
    }
}

/// Looks up tag files on disk: unpacked `data/<ns>/tags/<kind>/<path>.json`
/// trees under each root, then the raw tag store of a scan, then its
/// reference store of tags the namespace filter kept out of the outputs.
pub struct DiskTagLocator {
    roots: Vec<PathBuf>,
    raw_dir: Option<PathBuf>,
}

impl DiskTagLocator {
    pub fn new(roots: Vec<PathBuf>, raw_dir: Option<PathBuf>) -> Self {
        Self { roots, raw_dir }
    }

    /// Candidate JSON files for `id`, plural directory first.
    pub fn candidates(&self, id: &TagId) -> Vec<PathBuf> {
        let plural = id.kind.dir_name();
        let singular = plural.trim_end_matches('s');
        let mut paths = Vec::with_capacity(self.roots.len() * 2);
        for root in &self.roots {
            for dir in [plural, singular] {
                paths.push(
                    root.join("data")
                        .join(&id.namespace)
                        .join("tags")
                        .join(dir)
                        .join(format!("{}.json", id.path)),
                );
            }
        }
        paths
    }
}

impl TagLocator for DiskTagLocator {
    fn locate(&mut self, id: &TagId) -> Option<TagRecord> {
        for path in self.candidates(id) {
            if !path.is_file() {
                continue;
            }
            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| parse_tag(id.clone(), &bytes).map_err(|e| e.to_string()));
            match parsed {
                Ok(record) => {
                    debug!(tag = %id, file = %path.display(), "Located referenced tag");
                    return Some(record);
                }
                Err(e) => warn!(file = %path.display(), error = %e, "Unreadable tag file"),
            }
        }

        let raw_dir = self.raw_dir.as_deref()?;
        [
            layout::raw_tag_file(raw_dir, id),
            layout::raw_reference_tag_file(raw_dir, id),
        ]
        .into_iter()
        .filter(|file| file.is_file())
        .find_map(|file| match read_tag_blocks(&file, id.kind) {
            Ok(records) => records.into_iter().find(|record| record.id == *id),
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Unreadable raw tag file");
                None
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub iterations: u32,
    pub converged: bool,
    pub unresolved: usize,
    pub located: usize,
}

/// The working set of tags being closed over their references.
#[derive(Debug, Default)]
pub struct TagGraph {
    tags: BTreeMap<TagId, TagRecord>,
    /// Tags pulled in by a locator rather than scanned
    located: BTreeSet<TagId>,
    /// Locator misses, so each id is looked up at most once
    missing: FxHashSet<TagId>,
    /// Resolved target of a reference made from a tag of the given kind
    targets: FxHashMap<(TagKind, TagRef), Option<TagId>>,
    /// Target tag -> tags that read from it
    dependents: FxHashMap<TagId, BTreeSet<TagId>>,
    unresolved: BTreeSet<(TagId, TagRef)>,
    worklist: BTreeSet<TagId>,
    iterations: u32,
}

impl TagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scanned record, merging with any record already held for the same tag.
    pub fn insert(&mut self, record: TagRecord) {
        if !record.references.is_empty() {
            self.worklist.insert(record.id.clone());
        }
        match self.tags.get_mut(&record.id) {
            Some(existing) => existing.absorb(record),
            None => {
                self.tags.insert(record.id.clone(), record);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn get(&self, id: &TagId) -> Option<&TagRecord> {
        self.tags.get(id)
    }

    pub fn items(&self, id: &TagId) -> Option<&BTreeSet<Identifier>> {
        self.tags.get(id).map(|record| &record.items)
    }

    /// Tags that came from the scan, in id order.
    pub fn scanned(&self) -> impl Iterator<Item = &TagRecord> {
        self.tags
            .values()
            .filter(|record| !self.located.contains(&record.id))
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn is_converged(&self) -> bool {
        self.worklist.is_empty()
    }

    /// Every reference that could not be located, as `(referencing tag, reference)`.
    pub fn unresolved(&self) -> impl Iterator<Item = ScanError> + '_ {
        self.unresolved
            .iter()
            .map(|(tag, reference)| ScanError::UnresolvableReference {
                tag: tag.to_string(),
                reference: reference.to_string(),
            })
    }

    pub fn unresolved_count(&self) -> usize {
        self.unresolved.len()
    }

    /// Runs one pass over the worklist. Returns whether any item set grew.
    pub fn step(&mut self, locator: &mut dyn TagLocator) -> bool {
        let worklist = std::mem::take(&mut self.worklist);
        let mut changed: BTreeSet<TagId> = BTreeSet::new();

        for id in worklist {
            let references: Vec<TagRef> = match self.tags.get(&id) {
                Some(record) => record.references.iter().cloned().collect(),
                None => continue,
            };

            let mut additions: Vec<Identifier> = Vec::new();
            for reference in references {
                let Some(target) = self.target(id.kind, &reference, locator) else {
                    if self.unresolved.insert((id.clone(), reference.clone())) {
                        debug!(tag = %id, reference = %reference, "Unresolvable tag reference");
                    }
                    continue;
                };
                if target == id {
                    continue;
                }
                self.dependents
                    .entry(target.clone())
                    .or_default()
                    .insert(id.clone());

                if let (Some(own), Some(other)) = (self.items(&id), self.items(&target)) {
                    additions.extend(other.difference(own).cloned());
                }
            }

            if let Some(record) = self.tags.get_mut(&id) {
                let before = record.items.len();
                record.items.extend(additions);
                if record.items.len() > before {
                    changed.insert(id);
                }
            }
        }

        for id in &changed {
            if let Some(dependents) = self.dependents.get(id) {
                self.worklist.extend(dependents.iter().cloned());
            }
        }
        self.iterations += 1;
        !changed.is_empty()
    }

    /// Steps until nothing changes or the iteration cap is reached.
    pub fn resolve(&mut self, locator: &mut dyn TagLocator) -> ResolveReport {
        self.resolve_with_cap(locator, TAG_RESOLVE_MAX_ITERATIONS)
    }

    pub fn resolve_with_cap(&mut self, locator: &mut dyn TagLocator, cap: u32) -> ResolveReport {
        let start = self.iterations;
        while !self.worklist.is_empty() && self.iterations - start < cap {
            self.step(locator);
        }

        let report = ResolveReport {
            iterations: self.iterations - start,
            converged: self.is_converged(),
            unresolved: self.unresolved.len(),
            located: self.located.len(),
        };
        if !report.converged {
            warn!(
                iterations = report.iterations,
                pending = self.worklist.len(),
                "Tag resolution stopped at iteration cap before converging"
            );
        }
        report
    }

    /// Maps a reference to the tag it reads from, trying the referencing
    /// tag's kind first. Each `(kind, reference)` pair is looked up once.
    fn target(
        &mut self,
        kind: TagKind,
        reference: &TagRef,
        locator: &mut dyn TagLocator,
    ) -> Option<TagId> {
        let key = (kind, reference.clone());
        if let Some(cached) = self.targets.get(&key) {
            return cached.clone();
        }

        let order = std::iter::once(kind).chain(TagKind::ALL.into_iter().filter(|k| *k != kind));
        let mut found = None;
        for candidate_kind in order {
            let candidate = reference.in_kind(candidate_kind);
            if self.tags.contains_key(&candidate) || self.locate(&candidate, locator) {
                found = Some(candidate);
                break;
            }
        }
        self.targets.insert(key, found.clone());
        found
    }

    fn locate(&mut self, id: &TagId, locator: &mut dyn TagLocator) -> bool {
        if self.missing.contains(id) {
            return false;
        }
        match locator.locate(id) {
            Some(mut record) => {
                record.id = id.clone();
                self.located.insert(id.clone());
                self.insert(record);
                true
            }
            None => {
                self.missing.insert(id.clone());
                false
            }
        }
    }
}

/// Reads `#TAG:` blocks from a raw or closed tag file.
///
/// Lines before the first header have no owner and are skipped.
pub fn read_tag_blocks(path: &Path, kind: TagKind) -> Result<Vec<TagRecord>> {
    let mut records: Vec<TagRecord> = Vec::new();
    let mut orphans = 0usize;
    for line in read_lines(path)? {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(tag) = parse_tag_header(line) {
            records.push(TagRecord::new(tag.in_kind(kind)));
            continue;
        }
        let Some(current) = records.last_mut() else {
            orphans += 1;
            continue;
        };
        if line.starts_with('#') {
            current.references.extend(TagRef::parse(line));
        } else {
            current.items.extend(Identifier::parse(line));
        }
    }
    if orphans > 0 {
        warn!(file = %path.display(), lines = orphans, "Tag file lines without a #TAG header");
    }
    Ok(records)
}

/// Streams every raw tag file under `raw_dir` into a fresh graph.
pub fn load_raw_tags(raw_dir: &Path) -> Result<TagGraph> {
    let mut graph = TagGraph::new();
    for kind in TagKind::ALL {
        for file in raw_files(&layout::tag_dir(raw_dir, kind))? {
            for record in read_tag_blocks(&file, kind)? {
                graph.insert(record);
            }
        }
    }
    info!(tags = graph.len(), "Loaded raw tags");
    Ok(graph)
}

/// Writes one file per scanned tag: the `#TAG:` header, then its sorted items.
///
/// Ids whose sanitized names collide share a file, one block per tag.
pub fn write_closed_tags(graph: &TagGraph, out_dir: &Path) -> Result<usize> {
    let mut files: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
    let mut written = 0;
    for record in graph.scanned() {
        let lines = files.entry(layout::tag_file(out_dir, &record.id)).or_default();
        lines.push(record.id.header());
        lines.extend(record.items.iter().map(|id| id.to_string()));
        written += 1;
    }
    for (path, lines) in &files {
        write_lines(path, lines)?;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tag(ns_path: &str, items: &[&str], refs: &[&str]) -> TagRecord {
        let mut record = TagRecord::new(TagRef::parse(ns_path).unwrap().in_kind(TagKind::Items));
        record.items = items.iter().map(|s| Identifier::parse(s).unwrap()).collect();
        record.references = refs.iter().map(|s| TagRef::parse(s).unwrap()).collect();
        record
    }

    fn id(ns_path: &str) -> TagId {
        TagRef::parse(ns_path).unwrap().in_kind(TagKind::Items)
    }

    fn items_of(graph: &TagGraph, ns_path: &str) -> Vec<String> {
        graph
            .items(&id(ns_path))
            .unwrap()
            .iter()
            .map(|i| i.to_string())
            .collect()
    }

    /// Counts lookups so tests can assert each id is located once.
    struct MapLocator {
        records: FxHashMap<TagId, TagRecord>,
        calls: usize,
    }

    impl TagLocator for MapLocator {
        fn locate(&mut self, id: &TagId) -> Option<TagRecord> {
            self.calls += 1;
            self.records.get(id).cloned()
        }
    }

    #[test]
    fn simple_reference_is_flattened() {
        let mut graph = TagGraph::new();
        graph.insert(tag("moda:dusts/iron", &["moda:iron_dust"], &["modb:dusts/iron"]));
        graph.insert(tag("modb:dusts/iron", &["modb:iron_dust"], &[]));

        let report = graph.resolve(&mut NoLocator);
        assert!(report.converged);
        assert_eq!(
            items_of(&graph, "moda:dusts/iron"),
            vec!["moda:iron_dust", "modb:iron_dust"]
        );
        assert_eq!(items_of(&graph, "modb:dusts/iron"), vec!["modb:iron_dust"]);
    }

    #[test]
    fn chains_close_transitively() {
        let mut graph = TagGraph::new();
        graph.insert(tag("a:t", &["a:1"], &["b:t"]));
        graph.insert(tag("b:t", &["b:1"], &["c:t"]));
        graph.insert(tag("c:t", &["c:1"], &["d:t"]));
        graph.insert(tag("d:t", &["d:1"], &[]));

        let report = graph.resolve(&mut NoLocator);
        assert!(report.converged);
        assert_eq!(items_of(&graph, "a:t"), vec!["a:1", "b:1", "c:1", "d:1"]);
    }

    #[test]
    fn self_reference_terminates() {
        let mut graph = TagGraph::new();
        graph.insert(tag("a:t", &["a:1"], &["a:t"]));

        let report = graph.resolve(&mut NoLocator);
        assert!(report.converged);
        assert_eq!(report.iterations, 1);
        assert_eq!(items_of(&graph, "a:t"), vec!["a:1"]);
    }

    #[test]
    fn mutual_references_converge_to_union() {
        let mut graph = TagGraph::new();
        graph.insert(tag("a:t", &["a:1"], &["b:t"]));
        graph.insert(tag("b:t", &["b:1"], &["a:t"]));

        let report = graph.resolve(&mut NoLocator);
        assert!(report.converged);
        assert!(report.iterations <= TAG_RESOLVE_MAX_ITERATIONS);
        assert_eq!(items_of(&graph, "a:t"), vec!["a:1", "b:1"]);
        assert_eq!(items_of(&graph, "b:t"), vec!["a:1", "b:1"]);
    }

    #[test]
    fn items_never_shrink_between_steps() {
        let mut graph = TagGraph::new();
        graph.insert(tag("a:t", &["a:1"], &["b:t", "c:t"]));
        graph.insert(tag("b:t", &["b:1"], &["c:t"]));
        graph.insert(tag("c:t", &["c:1"], &["a:t"]));

        let mut previous = graph.items(&id("a:t")).unwrap().clone();
        while !graph.is_converged() {
            graph.step(&mut NoLocator);
            let current = graph.items(&id("a:t")).unwrap();
            assert!(current.is_superset(&previous));
            previous = current.clone();
        }
        assert_eq!(previous.len(), 3);
    }

    #[test]
    fn cap_stops_deep_chains() {
        let mut graph = TagGraph::new();
        // Worklist runs in id order, so t00 only gains one link per step
        for i in 0..30 {
            let name = format!("z:t{i:02}");
            let next = format!("z:t{:02}", i + 1);
            let item = format!("z:i{i:02}");
            graph.insert(tag(&name, &[item.as_str()], &[next.as_str()]));
        }
        graph.insert(tag("z:t30", &["z:i30"], &[]));

        let report = graph.resolve_with_cap(&mut NoLocator, 2);
        assert_eq!(report.iterations, 2);
        let first = graph.items(&id("z:t00")).unwrap().len();
        assert!(first < 31);
    }

    #[test]
    fn unlocatable_reference_is_recorded_not_fatal() {
        let mut graph = TagGraph::new();
        graph.insert(tag("moda:dusts/iron", &["moda:iron_dust"], &["nowhere:dusts"]));

        let report = graph.resolve(&mut NoLocator);
        assert!(report.converged);
        assert_eq!(report.unresolved, 1);
        let errors: Vec<String> = graph.unresolved().map(|e| e.to_string()).collect();
        assert_eq!(
            errors,
            vec!["unresolvable tag reference #nowhere:dusts from moda:dusts/iron"]
        );
        assert_eq!(items_of(&graph, "moda:dusts/iron"), vec!["moda:iron_dust"]);
    }

    #[test]
    fn locator_is_consulted_once_per_tag() {
        let mut located = tag("c:dusts/iron", &["modc:iron_dust"], &[]);
        located.items.insert(Identifier::parse("modd:iron_dust").unwrap());
        let mut locator = MapLocator {
            records: [(id("c:dusts/iron"), located)].into_iter().collect(),
            calls: 0,
        };

        let mut graph = TagGraph::new();
        graph.insert(tag("moda:dusts/iron", &[], &["c:dusts/iron"]));
        graph.insert(tag("modb:dusts/iron", &[], &["c:dusts/iron"]));
        graph.insert(tag("modb:dusts/any", &[], &["c:missing"]));

        let report = graph.resolve(&mut locator);
        assert!(report.converged);
        assert_eq!(report.located, 1);
        assert_eq!(
            items_of(&graph, "modb:dusts/iron"),
            vec!["modc:iron_dust", "modd:iron_dust"]
        );
        // One hit, plus one miss per kind for the missing tag
        assert_eq!(locator.calls, 1 + TagKind::ALL.len());
        assert_eq!(graph.scanned().count(), 3);
    }

    #[test]
    fn disk_locator_reads_json_then_raw_store() -> Result<()> {
        let root = TempDir::new()?;
        let raw = TempDir::new()?;
        let json_dir = root.path().join("data/c/tags/items/ingots");
        fs::create_dir_all(&json_dir)?;
        fs::write(json_dir.join("iron.json"), r##"{"values": ["modx:ingot", "#c:ingots/steel"]}"##)?;

        let raw_id = id("moda:gems");
        let raw_file = layout::raw_tag_file(raw.path(), &raw_id);
        fs::create_dir_all(raw_file.parent().unwrap())?;
        fs::write(&raw_file, "#TAG:moda:gems\nmoda:ruby\n")?;

        let mut locator =
            DiskTagLocator::new(vec![root.path().to_path_buf()], Some(raw.path().to_path_buf()));

        let found = locator.locate(&id("c:ingots/iron")).unwrap();
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.references.len(), 1);

        let from_raw = locator.locate(&raw_id).unwrap();
        assert_eq!(from_raw.items.len(), 1);
        assert!(locator.locate(&id("c:nothing")).is_none());
        Ok(())
    }

    #[test]
    fn reference_store_is_searched_but_never_written() -> Result<()> {
        let raw = TempDir::new()?;
        let out = TempDir::new()?;
        let scanned = layout::raw_tag_file(raw.path(), &id("moda:dusts/iron"));
        fs::create_dir_all(scanned.parent().unwrap())?;
        fs::write(&scanned, "#TAG:moda:dusts/iron\nmoda:iron_dust\n#c:dusts/iron\n")?;
        let reference = layout::raw_reference_tag_file(raw.path(), &id("c:dusts/iron"));
        fs::create_dir_all(reference.parent().unwrap())?;
        fs::write(&reference, "#TAG:c:dusts/iron\nmoda:crushed_iron_dust\n")?;

        let mut graph = load_raw_tags(raw.path())?;
        assert_eq!(graph.len(), 1);
        let mut locator = DiskTagLocator::new(Vec::new(), Some(raw.path().to_path_buf()));
        let report = graph.resolve(&mut locator);
        assert_eq!(report.located, 1);
        assert_eq!(report.unresolved, 0);

        assert_eq!(write_closed_tags(&graph, out.path())?, 1);
        assert_eq!(
            fs::read_to_string(layout::tag_file(out.path(), &id("moda:dusts/iron")))?,
            "#TAG:moda:dusts/iron\nmoda:crushed_iron_dust\nmoda:iron_dust\n"
        );
        assert!(!layout::tag_file(out.path(), &id("c:dusts/iron")).exists());
        Ok(())
    }

    #[test]
    fn raw_blocks_roundtrip_through_closed_files() -> Result<()> {
        let raw = TempDir::new()?;
        let out = TempDir::new()?;
        let file = layout::raw_tag_file(raw.path(), &id("moda:dusts/iron"));
        fs::create_dir_all(file.parent().unwrap())?;
        fs::write(
            &file,
            "#TAG:moda:dusts/iron\nmoda:iron_dust\n#modb:dusts/iron\n#TAG:moda:dusts/iron\nmoda:iron_dust_2\n",
        )?;
        let other = layout::raw_tag_file(raw.path(), &id("modb:dusts/iron"));
        fs::write(&other, "#TAG:modb:dusts/iron\nmodb:iron_dust\n")?;

        let mut graph = load_raw_tags(raw.path())?;
        assert_eq!(graph.len(), 2);
        graph.resolve(&mut NoLocator);

        assert_eq!(write_closed_tags(&graph, out.path())?, 2);
        let closed = fs::read_to_string(layout::tag_file(out.path(), &id("moda:dusts/iron")))?;
        assert_eq!(
            closed,
            "#TAG:moda:dusts/iron\nmoda:iron_dust\nmoda:iron_dust_2\nmodb:iron_dust\n"
        );
        Ok(())
    }
}
