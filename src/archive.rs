use crate::config::SHARED_NAMESPACES;
use crate::error::ScanError;
use crate::models::{Archive, RawEntry};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

static MOD_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"modId\s*=\s*["']([^"']+)["']"#).unwrap());

/// Forge and NeoForge manifests, checked in this order.
const TOML_MANIFESTS: &[&str] = &["META-INF/neoforge.mods.toml", "META-INF/mods.toml"];

const FABRIC_MANIFEST: &str = "fabric.mod.json";

/// Read access to one ZIP-format mod archive.
pub struct ArchiveReader {
    path: PathBuf,
    zip: ZipArchive<BufReader<File>>,
}

impl ArchiveReader {
    /// Fails with [`ScanError::CorruptArchive`] when the file is not a readable ZIP.
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        let corrupt = |reason: String| ScanError::CorruptArchive {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| corrupt(e.to_string()))?;
        let zip = ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            zip,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.zip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zip.is_empty()
    }

    /// Entry names in central-directory order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.zip.file_names()
    }

    /// Entries under `assets/<ns>/` or `data/<ns>/`; everything else is skipped.
    pub fn entries(&self) -> impl Iterator<Item = RawEntry> + '_ {
        self.names()
            .filter_map(|name| RawEntry::from_path(name, name.ends_with('/')))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    /// Fails with [`ScanError::EntryRead`] on missing entries or decompression errors.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ScanError> {
        let read_error = |reason: String| ScanError::EntryRead {
            archive: self.path.clone(),
            entry: name.to_string(),
            reason,
        };
        let mut file = self
            .zip
            .by_name(name)
            .map_err(|e| read_error(e.to_string()))?;
        let mut buf = Vec::with_capacity(file.size().min(1 << 20) as usize);
        file.read_to_end(&mut buf)
            .map_err(|e| read_error(e.to_string()))?;
        Ok(buf)
    }

    /// Reads an entry as text, replacing invalid UTF-8.
    pub fn read_text(&mut self, name: &str) -> Result<String, ScanError> {
        let bytes = self.read_entry(name)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Distinct namespaces under `assets/` and `data/`.
    pub fn namespaces(&self) -> BTreeSet<String> {
        self.entries().map(|entry| entry.namespace).collect()
    }

    /// Mod id from the loader manifest, falling back to the first mod-owned
    /// `data/` namespace and finally the file stem.
    pub fn mod_id(&mut self) -> String {
        for manifest in TOML_MANIFESTS {
            if !self.contains(manifest) {
                continue;
            }
            match self.read_text(manifest) {
                Ok(content) => {
                    if let Some(caps) = MOD_ID_REGEX.captures(&content) {
                        return caps[1].to_string();
                    }
                }
                Err(e) => debug!(error = %e, "Failed to read TOML manifest"),
            }
        }

        if self.contains(FABRIC_MANIFEST) {
            let id = self
                .read_entry(FABRIC_MANIFEST)
                .ok()
                .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
                .and_then(|json| json.get("id")?.as_str().map(str::to_string));
            match id {
                Some(id) => return id,
                None => debug!(archive = %self.path.display(), "fabric.mod.json has no id"),
            }
        }

        let data_namespace = self
            .entries()
            .filter(|entry| entry.root() == "data")
            .map(|entry| entry.namespace)
            .find(|ns| !SHARED_NAMESPACES.contains(&ns.as_str()));
        if let Some(ns) = data_namespace {
            return ns;
        }

        file_stem(&self.path)
    }

    pub fn identify(&mut self) -> Archive {
        Archive {
            path: self.path.clone(),
            mod_id: self.mod_id(),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
