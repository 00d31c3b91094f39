use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing a session directory.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("value conversion failed: {0}")]
    Convert(#[from] serde_json::Error),
    #[error("invalid data key '{0}': keys must be file-name safe (letters, digits, '_', '-', '.')")]
    InvalidKey(String),
    #[error("unsupported data file format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("history record '{id}' ({name}) is missing from {path}")]
    MissingRecord {
        id: String,
        name: String,
        path: PathBuf,
    },
    #[error("scene object {0} does not exist")]
    UnknownParent(uuid::Uuid),
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| SessionError::Io {
            path: path.into(),
            source,
        })
    }
}
