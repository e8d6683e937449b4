use std::path::PathBuf;

use thiserror::Error;

/// Data-integrity failures in the local store. These abort a run.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("more than one entry in {dir} starts with `{prefix}`: {matches:?}")]
    AmbiguousIdPrefix {
        dir: PathBuf,
        prefix: String,
        matches: Vec<String>,
    },
    #[error("record without ID in {path} at byte {offset}")]
    MissingRecordId { path: PathBuf, offset: u64 },
    #[error("record ID in {path} at byte {offset} is not an integer: {raw}")]
    MalformedRecordId {
        path: PathBuf,
        offset: u64,
        raw: String,
    },
    #[error("store {0} is locked by another archivist process")]
    StoreLocked(PathBuf),
}

/// Failures reported by the remote gateway after its own retries.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: u16, message: String },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("file location is no longer valid: {0}")]
    BrokenFileLocation(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected response for {method}: {detail}")]
    UnexpectedResponse { method: String, detail: String },
}

impl RemoteError {
    pub fn is_permission_denied(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<RemoteError>(),
            Some(RemoteError::PermissionDenied(_))
        )
    }

    pub fn is_broken_file_location(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<RemoteError>(),
            Some(RemoteError::BrokenFileLocation(_))
        )
    }
}
