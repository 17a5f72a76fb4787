use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Container-level error taxonomy.
///
/// Every fallible operation in this crate returns one of these kinds.
/// Signature failures are never downgraded; a read error on any single
/// compression block aborts the whole containing read.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open '{path}': {reason}")]
    FileOpen { path: PathBuf, reason: String },

    #[error("corrupt TOC: {0}")]
    CorruptToc(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("chunk not found")]
    NotFound,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("write failed: {0}")]
    Write(String),
}

impl Error {
    pub(crate) fn file_open(path: impl Into<PathBuf>, err: &io::Error) -> Self {
        Error::FileOpen {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
