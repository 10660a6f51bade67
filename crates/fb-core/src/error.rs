use crate::types::enums::EventStatus;
use crate::types::ids::IdError;
use thiserror::Error;

/// Failures of the local storage engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage not ready")]
    NotReady,
    #[error("storage write failed: {message}")]
    WriteFailure { message: String },
    #[error("storage read failed: {message}")]
    ReadFailure { message: String },
    #[error("stored record is corrupt: {message}")]
    Corrupt { message: String },
}

impl StorageError {
    pub fn write(err: impl std::fmt::Display) -> Self {
        Self::WriteFailure {
            message: err.to_string(),
        }
    }

    pub fn read(err: impl std::fmt::Display) -> Self {
        Self::ReadFailure {
            message: err.to_string(),
        }
    }

    pub fn corrupt(err: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("draft not found")]
    NotFound,
    #[error("draft belongs to another user")]
    OwnedByAnotherUser,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event not found")]
    NotFound,
    #[error("event already exists: {id}")]
    AlreadyExists { id: String },
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: EventStatus, to: EventStatus },
    #[error("event {id} changed since it was read")]
    ChangedSinceRead { id: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum FieldbookError {
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl FieldbookError {
    pub fn storage(&self) -> Option<&StorageError> {
        match self {
            Self::Storage(err)
            | Self::Draft(DraftError::Storage(err))
            | Self::Event(EventError::Storage(err)) => Some(err),
            _ => None,
        }
    }

    /// Transient failures that a later attempt may get past.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.storage(),
            Some(StorageError::NotReady | StorageError::WriteFailure { .. })
        )
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self.storage(), Some(StorageError::NotReady))
    }
}

impl From<IdError> for DraftError {
    fn from(value: IdError) -> Self {
        Self::InvalidInput {
            message: value.to_string(),
        }
    }
}

impl From<IdError> for EventError {
    fn from(value: IdError) -> Self {
        Self::InvalidInput {
            message: value.to_string(),
        }
    }
}
