use crate::types::{Draft, EventRecord, EventStatus, WorkSource};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DRAFT_LABEL: &str = "In-progress draft";

/// One logical inspection in the combined work list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub source: WorkSource,
    pub label: String,
    pub status: Option<EventStatus>,
    pub container_id: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub field_count: usize,
    pub completed_sections: usize,
    pub sync_error: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl WorkItem {
    fn from_event(event: &EventRecord) -> Self {
        Self {
            id: normalize_id(event.id.as_str()),
            source: WorkSource::Event,
            label: event.status.label().to_string(),
            status: Some(event.status),
            container_id: Some(event.container_id.clone()),
            event_date: Some(event.event_date),
            field_count: event.data_values.len(),
            completed_sections: 0,
            sync_error: event.sync_error.clone(),
            last_activity: event.updated_at,
        }
    }

    fn from_draft(draft: &Draft) -> Self {
        Self {
            id: normalize_id(draft.id.as_str()),
            source: WorkSource::Draft,
            label: DRAFT_LABEL.to_string(),
            status: None,
            container_id: None,
            event_date: None,
            field_count: draft.fields.len(),
            completed_sections: draft.metadata.completed_sections.len(),
            sync_error: None,
            last_activity: draft.last_updated,
        }
    }
}

pub fn normalize_id(id: &str) -> String {
    id.trim().to_string()
}

/// Combines event records with drafts that were never promoted. A draft
/// sharing an id with an event is dropped; the event is authoritative.
/// Newest activity first, ties broken by id.
pub fn merge(events: &[EventRecord], drafts: &[Draft]) -> Vec<WorkItem> {
    let event_ids: HashSet<String> = events
        .iter()
        .map(|event| normalize_id(event.id.as_str()))
        .collect();

    let mut items: Vec<WorkItem> = events.iter().map(WorkItem::from_event).collect();
    let mut seen_drafts = HashSet::new();
    for draft in drafts {
        let id = normalize_id(draft.id.as_str());
        if event_ids.contains(&id) || !seen_drafts.insert(id) {
            continue;
        }
        items.push(WorkItem::from_draft(draft));
    }

    items.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.id.cmp(&b.id))
    });
    items
}
