use crate::types::draft::Draft;
use crate::types::enums::EventStatus;
use crate::types::event::{DataValue, EventRecord, EventStats};
use crate::types::ids::{EventId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub id: Option<EventId>,
    pub program_id: String,
    pub container_id: String,
    pub stage_id: String,
    pub event_date: NaiveDate,
    pub data_values: Vec<DataValue>,
    pub linked_entity_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPatch {
    pub container_id: Option<String>,
    pub stage_id: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub data_values: Option<Vec<DataValue>>,
    pub linked_entity_id: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    pub container_id: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl EventFilter {
    pub fn status(status: EventStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &EventRecord) -> bool {
        if self.status.is_some_and(|status| status != event.status) {
            return false;
        }
        if self
            .container_id
            .as_deref()
            .is_some_and(|container| container != event.container_id)
        {
            return false;
        }
        if self.date_from.is_some_and(|from| event.event_date < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| event.event_date > to) {
            return false;
        }
        true
    }
}

/// Turns a draft into an event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoteInput {
    pub program_id: String,
    pub container_id: String,
    pub stage_id: String,
    pub event_date: NaiveDate,
    pub linked_entity_id: Option<String>,
    /// `true` queues the record for sync, `false` keeps it as a saved draft.
    pub submit: bool,
}

/// Point-in-time copy of the local stores, used as a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSnapshot {
    pub exported_at: DateTime<Utc>,
    pub user_id: UserId,
    pub events: Vec<EventRecord>,
    /// The user's drafts, submitted ones included.
    pub drafts: Vec<Draft>,
    pub stats: EventStats,
}
