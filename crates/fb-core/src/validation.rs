use crate::error::{DraftError, EventError};
use crate::types::{EventRecord, EventStatus};

pub fn validate_event_status_transition(
    from: EventStatus,
    to: EventStatus,
) -> Result<(), EventError> {
    use EventStatus::{Draft, Error, Pending, Synced};

    if from == to && from != Synced {
        return Ok(());
    }

    let valid = matches!(
        (from, to),
        (Draft, Pending) | (Pending, Synced) | (Pending, Error) | (Error, Pending)
    );

    if valid {
        Ok(())
    } else {
        Err(EventError::InvalidTransition { from, to })
    }
}

/// synced => server id present and no error; error => non-empty message.
pub fn validate_sync_invariants(event: &EventRecord) -> Result<(), EventError> {
    match event.status {
        EventStatus::Synced => {
            if event.server_id.as_deref().is_none_or(|id| id.trim().is_empty()) {
                return Err(EventError::InvalidInput {
                    message: "synced event requires a server id".to_string(),
                });
            }
            if event.sync_error.is_some() {
                return Err(EventError::InvalidInput {
                    message: "synced event cannot carry a sync error".to_string(),
                });
            }
        }
        EventStatus::Error => {
            if event.sync_error.as_deref().is_none_or(|msg| msg.trim().is_empty()) {
                return Err(EventError::InvalidInput {
                    message: "failed event requires an error message".to_string(),
                });
            }
        }
        EventStatus::Draft | EventStatus::Pending => {}
    }
    Ok(())
}

pub fn validate_field_key(key: &str) -> Result<(), DraftError> {
    if key.trim().is_empty() {
        return Err(DraftError::InvalidInput {
            message: "field key must not be empty".to_string(),
        });
    }
    Ok(())
}

pub fn validate_required(name: &str, value: &str) -> Result<(), EventError> {
    if value.trim().is_empty() {
        return Err(EventError::InvalidInput {
            message: format!("{name} must not be empty"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use EventStatus::{Draft, Error, Pending, Synced};

    #[test]
    fn allowed_transitions() {
        for (from, to) in [
            (Draft, Draft),
            (Draft, Pending),
            (Pending, Pending),
            (Pending, Synced),
            (Pending, Error),
            (Error, Pending),
            (Error, Error),
        ] {
            assert!(
                validate_event_status_transition(from, to).is_ok(),
                "{from} -> {to} should be allowed"
            );
        }
    }

    #[test]
    fn rejected_transitions() {
        for (from, to) in [
            (Draft, Synced),
            (Draft, Error),
            (Synced, Pending),
            (Synced, Synced),
            (Synced, Error),
            (Synced, Draft),
            (Error, Synced),
            (Error, Draft),
            (Pending, Draft),
        ] {
            assert!(
                matches!(
                    validate_event_status_transition(from, to),
                    Err(EventError::InvalidTransition { .. })
                ),
                "{from} -> {to} should be rejected"
            );
        }
    }

    #[test]
    fn blank_field_keys_are_rejected() {
        assert!(validate_field_key("dataElement_abc").is_ok());
        assert!(validate_field_key("  ").is_err());
    }
}
