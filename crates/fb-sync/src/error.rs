use fb_core::error::FieldbookError;
use thiserror::Error;

/// Why a single delivery to the remote service did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("transport failure: {message}")]
    Transport { message: String },
    #[error("rejected by remote: {reason}")]
    Rejected { reason: String },
    #[error("malformed response: {message}")]
    Malformed { message: String },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot sync while offline")]
    NetworkUnavailable,
    #[error(transparent)]
    Storage(#[from] FieldbookError),
}
