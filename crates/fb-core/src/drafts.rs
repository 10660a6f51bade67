use crate::error::DraftError;
use crate::types::{Draft, DraftId, MetadataPatch, Owner, UserId};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Per-field draft persistence. Writes are expected to run inside
/// `Store::with_tx` so a read-modify-write of one draft is atomic.
pub trait DraftRepository {
    /// Creates the draft on first write; otherwise touches only the given keys.
    fn upsert_fields(
        &self,
        id: &DraftId,
        owner: &Owner,
        fields: &[(String, Value)],
        patch: &MetadataPatch,
    ) -> Result<Draft, DraftError>;
    fn get(&self, id: &DraftId) -> Result<Option<Draft>, DraftError>;
    /// Always filtered by owner; `only_active` restricts to unsubmitted drafts.
    fn list_for_user(&self, user_id: &UserId, only_active: bool) -> Result<Vec<Draft>, DraftError>;
    fn most_recent_for_user(&self, user_id: &UserId) -> Result<Option<Draft>, DraftError>;
    fn delete(&self, id: &DraftId) -> Result<bool, DraftError>;
    fn mark_submitted(&self, id: &DraftId, at: DateTime<Utc>) -> Result<Draft, DraftError>;
}
