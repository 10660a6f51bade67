use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a locally stored event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Pending,
    Synced,
    Error,
}

impl EventStatus {
    pub const ALL: [EventStatus; 4] = [Self::Draft, Self::Pending, Self::Synced, Self::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }

    /// Human-facing label used by the merged work list.
    pub fn label(self) -> &'static str {
        match self {
            Self::Draft => "Saved draft",
            Self::Pending => "Pending sync",
            Self::Synced => "Synced",
            Self::Error => "Sync failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which store an entry of the merged work list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkSource {
    Event,
    Draft,
}
