use crate::types::enums::EventStatus;
use crate::types::ids::EventId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A submittable inspection record tracked through the sync state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: EventId,
    pub program_id: String,
    /// The unit or location the inspection is about.
    pub container_id: String,
    pub stage_id: String,
    pub event_date: NaiveDate,
    pub status: EventStatus,
    pub data_values: Vec<DataValue>,
    pub linked_entity_id: Option<String>,
    pub server_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataValue {
    pub field_id: String,
    pub value: Value,
}

impl DataValue {
    pub fn new(field_id: impl Into<String>, value: Value) -> Self {
        Self {
            field_id: field_id.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub total: u64,
    pub draft: u64,
    pub pending: u64,
    pub synced: u64,
    pub error: u64,
}

impl EventStats {
    pub fn record(&mut self, status: EventStatus, count: u64) {
        self.total += count;
        match status {
            EventStatus::Draft => self.draft += count,
            EventStatus::Pending => self.pending += count,
            EventStatus::Synced => self.synced += count,
            EventStatus::Error => self.error += count,
        }
    }
}
