use std::path::PathBuf;

/// Archives per batch; output handles are closed at every batch boundary
pub const BATCH_SIZE: usize = 64;

/// Maximum fixpoint iterations when resolving tag references
pub const TAG_RESOLVE_MAX_ITERATIONS: u32 = 10;

/// Maximum passes of the identifier normalizer before giving up on convergence
pub const CLEAN_MAX_ITERATIONS: u32 = 100;

/// Default worker count when none is given
pub const DEFAULT_THREADS: usize = 8;

/// Buffer size for append handles held by the output writer
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Buffer size for streaming raw and cleaned files back from disk
pub const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Redraw interval of progress bars and spinners
pub const PROGRESS_TICK_MS: u64 = 100;

/// Archive file extensions picked up from the input directory
pub const ARCHIVE_EXTENSIONS: &[&str] = &["jar", "zip"];

/// Namespaces skipped when guessing a mod id from `data/` directories
pub const SHARED_NAMESPACES: &[&str] = &["minecraft", "forge", "c"];

/// Settings for a single scan pass over an archive directory.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub input_dir: PathBuf,
    pub raw_dir: PathBuf,
    pub output_dir: PathBuf,
    pub threads: usize,
    pub batch_size: usize,
    pub namespace_filter: Option<String>,
}

impl ScanConfig {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            input_dir: input_dir.into(),
            raw_dir: output_dir.join("raw"),
            output_dir,
            threads: DEFAULT_THREADS,
            batch_size: BATCH_SIZE,
            namespace_filter: None,
        }
    }

    /// Case-insensitive exact match against the optional namespace filter.
    pub fn accepts_namespace(&self, namespace: &str) -> bool {
        match &self.namespace_filter {
            Some(filter) => namespace.eq_ignore_ascii_case(filter),
            None => true,
        }
    }
}

/// Settings for the full scan, merge, resolve and aggregate run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scan: ScanConfig,
    /// Extra directories holding unpacked `data/<ns>/tags/...` trees for reference lookup
    pub tag_roots: Vec<PathBuf>,
    /// Keep `_raw` files after the merge step
    pub keep_raw: bool,
}

impl PipelineConfig {
    pub fn new(scan: ScanConfig) -> Self {
        Self {
            scan,
            tag_roots: Vec::new(),
            keep_raw: true,
        }
    }
}
