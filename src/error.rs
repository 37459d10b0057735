use std::path::PathBuf;

/// error type for depot and archive operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("depot not found at {0}")]
    DepotNotFound(PathBuf),

    #[error("depot already exists at {0}")]
    DepotExists(PathBuf),

    #[error("invalid depot depth {0} (must be 0..=20)")]
    InvalidDepth(usize),

    #[error("object not found in depot: {0}")]
    ObjectNotFound(String),

    #[error("corrupt container {path}: {reason}")]
    CorruptContainer { path: PathBuf, reason: String },

    #[error("truncated entry {entry} in {path}")]
    TruncatedEntry { path: PathBuf, entry: String },

    #[error("entry {entry} in {path} does not match its record: {reason}")]
    ContentMismatch {
        path: PathBuf,
        entry: String,
        reason: String,
    },

    #[error("entry {0} is a directory and cannot be opened as a stream")]
    NotAFile(String),

    #[error("entry index {index} out of range ({len} entries)")]
    EntryOutOfRange { index: usize, len: usize },

    #[error("unsupported container feature in {path}: {feature}")]
    Unsupported { path: PathBuf, feature: String },

    #[error("group name {0:?} cannot name a container file")]
    InvalidGroupName(String),

    #[error("{failed} of {total} entries failed")]
    BulkFailure { failed: usize, total: usize },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),

    #[error("unknown hash kind: {0}")]
    UnknownHashKind(String),
}

impl Error {
    /// shorthand for a corrupt container error
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptContainer {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// shorthand for an unsupported feature error
    pub fn unsupported(path: impl Into<PathBuf>, feature: impl Into<String>) -> Self {
        Error::Unsupported {
            path: path.into(),
            feature: feature.into(),
        }
    }

    /// true for per-entry failures that should not abort a bulk operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::TruncatedEntry { .. } | Error::ContentMismatch { .. } | Error::NotAFile(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
