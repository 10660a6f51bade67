use crate::error::EventError;
use crate::types::{EventFilter, EventId, EventRecord, EventStats, EventStatus};

pub trait EventRepository {
    fn insert(&self, event: &EventRecord) -> Result<(), EventError>;
    fn get(&self, id: &EventId) -> Result<Option<EventRecord>, EventError>;
    /// Matching records, newest `created_at` first.
    fn list(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventError>;
    /// Overwrites every column of an existing record.
    fn replace(&self, event: &EventRecord) -> Result<(), EventError>;
    fn delete(&self, id: &EventId) -> Result<bool, EventError>;
    fn delete_with_status(&self, status: EventStatus) -> Result<u64, EventError>;
    fn stats(&self) -> Result<EventStats, EventError>;
}
