use std::path::PathBuf;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of the external dump facility for one target.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error("Failed to start dump command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Dump command `{program}` {}: {stderr_excerpt}", exit_label(.exit_code))]
    Failed {
        program: String,
        exit_code: Option<i32>,
        stderr_excerpt: String,
    },

    #[error("Failed to read database file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stream dump output: {0}")]
    Stream(#[from] std::io::Error),
}

fn exit_label(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

/// Transport, auth or capacity failure reported by a storage backend.
#[derive(Error, Debug)]
#[error("{backend} storage failed to {action}: {cause}")]
pub struct StorageError {
    pub backend: &'static str,
    pub action: String,
    #[source]
    pub cause: BoxError,
}

impl StorageError {
    pub fn new(backend: &'static str, action: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        StorageError {
            backend,
            action: action.into(),
            cause: cause.into(),
        }
    }
}

/// A stored name that looks like one of ours but cannot be decoded.
#[derive(Error, Debug, PartialEq)]
pub enum FilenameError {
    #[error("Archive name {name} carries a malformed timestamp `{value}`")]
    MalformedTimestamp { name: String, value: String },
}

/// Everything that can abort the pipeline of a single backup target.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Dump(#[from] DumpError),

    #[error("Failed to read {} while building archive: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write archive: {0}")]
    ArchiveWrite(#[source] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl BackupError {
    pub fn source_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::SourceRead {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
