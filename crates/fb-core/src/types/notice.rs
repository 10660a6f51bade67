use crate::types::enums::EventStatus;
use crate::types::event::EventRecord;
use crate::types::ids::{DraftId, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum NoticeBody {
    FieldsCommitted {
        draft_id: DraftId,
        saved_fields: usize,
        immediate: bool,
        at: DateTime<Utc>,
    },
    SaveFailed {
        draft_id: DraftId,
        message: String,
        queued: usize,
    },
    DraftDeleted {
        draft_id: DraftId,
    },
    DraftPromoted {
        draft_id: DraftId,
        event_id: EventId,
    },

    EventSaved {
        event: EventRecord,
    },
    EventUpdated {
        event: EventRecord,
    },
    EventStatusChanged {
        event_id: EventId,
        from: EventStatus,
        to: EventStatus,
    },
    EventDeleted {
        event_id: EventId,
    },
    SyncedPurged {
        count: u64,
    },

    SyncFinished {
        synced: usize,
        failed: usize,
    },
}
