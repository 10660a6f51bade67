use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// A change notification fanned out to listeners after the change is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: String,
    pub at: DateTime<Utc>,
    pub source: NoticeSource,
    pub body: Value,
}

impl Notice {
    pub fn new(source: NoticeSource, body: Value) -> Self {
        Self {
            id: format!("ntc_{}", Ulid::new()),
            at: Utc::now(),
            source,
            body,
        }
    }

    /// The `type` tag of the body, if the body is a tagged object.
    pub fn kind(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum NoticeSource {
    Store,
    Scheduler,
    SyncEngine,
    Cli,
}
