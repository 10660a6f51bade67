use fb_core::types::{EventId, EventRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status the remote service expects for a finished inspection.
pub const WIRE_STATUS_COMPLETED: &str = "COMPLETED";

const GENERIC_REJECTION: &str = "remote service did not accept the record";

/// The subset of an event record the remote service receives. Local
/// bookkeeping (sync status, timestamps, errors) never leaves the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePayload {
    pub id: String,
    pub container_id: String,
    pub stage_id: String,
    pub location_id: String,
    pub event_date: String,
    pub status: String,
    pub data_values: Vec<WireDataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDataValue {
    pub field_id: String,
    pub value: String,
}

impl WirePayload {
    pub fn from_event(event: &EventRecord) -> Self {
        Self {
            id: event.id.to_string(),
            container_id: event.program_id.clone(),
            stage_id: event.stage_id.clone(),
            location_id: event.container_id.clone(),
            event_date: event.event_date.format("%Y-%m-%d").to_string(),
            status: WIRE_STATUS_COMPLETED.to_string(),
            data_values: event
                .data_values
                .iter()
                .filter_map(|dv| {
                    coerce_value(&dv.value).map(|value| WireDataValue {
                        field_id: dv.field_id.clone(),
                        value,
                    })
                })
                .collect(),
            linked_entity_id: event
                .linked_entity_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
        }
    }
}

/// Wire representation of a stored value; `None` means "leave it out".
pub fn coerce_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    Accepted { server_id: String },
    Rejected { reason: String },
}

/// Reads a submission response. The remote signals success either through
/// a top-level status or through per-item import summaries, possibly nested
/// under `response`; both shapes are checked.
pub fn detect_acceptance(body: &Value, local_id: &EventId) -> Acceptance {
    let summaries = import_summaries(body);

    let top_level_ok = matches!(str_field(body, "status"), Some("SUCCESS" | "OK"))
        || str_field(body, "httpStatus") == Some("OK");
    let summaries_ok = !summaries.is_empty()
        && summaries
            .iter()
            .all(|summary| str_field(summary, "status") == Some("SUCCESS"));

    if top_level_ok || summaries_ok {
        let server_id = summaries
            .iter()
            .find_map(|summary| str_field(summary, "reference"))
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
            .map_or_else(|| local_id.to_string(), str::to_string);
        return Acceptance::Accepted { server_id };
    }

    Acceptance::Rejected {
        reason: response_reason(body).unwrap_or_else(|| GENERIC_REJECTION.to_string()),
    }
}

/// Best human-readable reason found in a response body, if any.
pub fn response_reason(body: &Value) -> Option<String> {
    import_summaries(body)
        .into_iter()
        .filter(|summary| str_field(summary, "status") != Some("SUCCESS"))
        .find_map(|summary| {
            str_field(summary, "description")
                .filter(|text| !text.trim().is_empty())
                .or_else(|| {
                    summary
                        .get("conflicts")
                        .and_then(Value::as_array)
                        .and_then(|conflicts| conflicts.first())
                        .and_then(|conflict| str_field(conflict, "value"))
                })
        })
        .or_else(|| str_field(body, "message"))
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
}

pub fn import_summaries(body: &Value) -> Vec<&Value> {
    body.get("importSummaries")
        .or_else(|| body.get("response").and_then(|r| r.get("importSummaries")))
        .and_then(Value::as_array)
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}
