use bmrb_core::{BmrbError, Namespace};
use thiserror::Error;

/// Errors that end a reload run. Per-entry failures never surface here;
/// they are recorded as failed results instead.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The cache could not be reached. Raised before any worker starts.
    #[error("cache store unavailable at {target}: {reason}")]
    CacheUnavailable { target: String, reason: String },

    #[error(transparent)]
    Core(#[from] BmrbError),

    #[error("refusing to continue: {namespace} has {found} entries, expected at least {minimum}; the database appears corrupted")]
    TooFewEntries {
        namespace: Namespace,
        found: usize,
        minimum: usize,
    },

    #[error("no namespaces selected; pass at least one of --metabolomics, --macromolecules, --chemcomps or --all")]
    NothingSelected,

    #[error("worker {0} could not be started: {1}")]
    WorkerSpawn(usize, String),
}

pub type Result<T> = std::result::Result<T, ReloadError>;
