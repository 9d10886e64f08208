use std::path::PathBuf;

/// Failure categories of a scan run.
///
/// Everything except [`ScanError::ResourceExhaustion`] and [`ScanError::NoArchives`]
/// is recovered where it happens: the offending archive, entry or reference is
/// skipped, logged and counted in [`crate::stats::ScanStats`].
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("corrupt archive {path}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("failed to read entry {entry} in {archive}: {reason}")]
    EntryRead {
        archive: PathBuf,
        entry: String,
        reason: String,
    },

    #[error("malformed record {entry}: {reason}")]
    MalformedRecord { entry: String, reason: String },

    #[error("unresolvable tag reference #{reference} from {tag}")]
    UnresolvableReference { tag: String, reference: String },

    #[error("worker failed on {archive}: {reason}")]
    WorkerTask { archive: PathBuf, reason: String },

    #[error("cannot prepare {path}: {source}")]
    ResourceExhaustion {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no valid archives found in {0}")]
    NoArchives(PathBuf),
}

impl ScanError {
    /// Fatal errors abort the run; the rest are skip-and-count.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::ResourceExhaustion { .. } | ScanError::NoArchives(_)
        )
    }
}
