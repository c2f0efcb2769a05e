mod dag;
mod fs;
mod io;
mod unixfs;

pub use dag::*;
pub use fs::*;
pub use io::*;
pub use unixfs::*;

use thiserror::Error;

#[macro_use]
extern crate log;

#[derive(Error, Debug)]
pub enum DagFsError {
    #[error("internal error: {0}")]
    Internal(String),
    #[error("no such entry: {0}")]
    NoSuchEntry(String),
    #[error("is a directory: {0}")]
    IsDirectory(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid offset: {0}")]
    InvalidOffset(String),
    #[error("seek mismatch: {0}")]
    SeekMismatch(String),
    #[error("directory node inside a file: {0}")]
    InvalidDirLocation(String),
    #[error("metadata node inside a file: {0}")]
    UnexpectedMetadata(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unrecognized payload kind: {0}")]
    UnrecognizedKind(String),
    #[error("metadata entries are not supported: {0}")]
    MetadataUnsupported(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl DagFsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DagFsError::NotFound(_) | DagFsError::NoSuchEntry(_))
    }
}

pub type DagFsResult<T> = std::result::Result<T, DagFsError>;

impl From<std::io::Error> for DagFsError {
    fn from(err: std::io::Error) -> Self {
        DagFsError::IoError(err.to_string())
    }
}
