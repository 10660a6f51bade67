use crate::drafts::DraftRepository;
use crate::error::{DraftError, EventError, FieldbookError};
use crate::events::EventRepository;
use crate::store::Store;
use crate::types::{
    DataValue, Draft, DraftId, EventFilter, EventId, EventPatch, EventRecord, EventStats,
    EventStatus, ExportSnapshot, MetadataPatch, NewEvent, NoticeBody, Owner, PromoteInput, UserId,
};
use crate::validation::{
    validate_event_status_transition, validate_field_key, validate_required,
    validate_sync_invariants,
};
use crate::view::{self, WorkItem};
use chrono::{DateTime, Utc};
use fb_events::{Notice, NoticeBus, NoticeSource};
use serde_json::Value;
use std::collections::BTreeMap;

/// Draft keys carrying this prefix become event data values on promotion.
pub const DATA_VALUE_PREFIX: &str = "dataElement_";

const FALLBACK_SYNC_ERROR: &str = "sync failed without a reason";

#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub source: NoticeSource,
}

impl RequestContext {
    pub fn new(source: NoticeSource) -> Self {
        Self { source }
    }
}

pub struct Fieldbook<S: Store> {
    store: S,
    bus: NoticeBus,
}

impl<S: Store> Fieldbook<S> {
    pub fn new(store: S, bus: NoticeBus) -> Self {
        Self { store, bus }
    }

    pub fn drafts(&self) -> DraftsApi<'_, S> {
        DraftsApi { core: self }
    }

    pub fn events(&self) -> EventsApi<'_, S> {
        EventsApi { core: self }
    }

    pub fn view(&self) -> ViewApi<'_, S> {
        ViewApi { core: self }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &NoticeBus {
        &self.bus
    }

    /// Every event record plus all of the user's drafts, read in one
    /// transaction.
    pub fn export(&self, user_id: &UserId) -> Result<ExportSnapshot, FieldbookError> {
        self.store.with_tx(|store| {
            Ok(ExportSnapshot {
                exported_at: Utc::now(),
                user_id: user_id.clone(),
                events: store.events().list(&EventFilter::default())?,
                drafts: store.drafts().list_for_user(user_id, false)?,
                stats: store.events().stats()?,
            })
        })
    }

    fn with_notices<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T, FieldbookError>
    where
        F: FnOnce(&S) -> Result<(T, Vec<NoticeBody>), FieldbookError>,
    {
        let (value, notices) = self.store.with_tx(|store| {
            let (value, bodies) = f(store)?;
            let mut notices = Vec::with_capacity(bodies.len());
            for body in &bodies {
                notices.push(build_notice(ctx, body)?);
            }
            Ok((value, notices))
        })?;
        for notice in notices {
            self.bus.publish(notice);
        }
        Ok(value)
    }
}

pub struct DraftsApi<'a, S: Store> {
    core: &'a Fieldbook<S>,
}

impl<S: Store> DraftsApi<'_, S> {
    pub fn upsert_field(
        &self,
        id: &DraftId,
        owner: &Owner,
        key: &str,
        value: Value,
        patch: &MetadataPatch,
    ) -> Result<Draft, FieldbookError> {
        self.upsert_fields(id, owner, vec![(key.to_string(), value)], patch)
    }

    /// One transaction for the whole batch; untouched keys keep their values.
    pub fn upsert_fields(
        &self,
        id: &DraftId,
        owner: &Owner,
        fields: Vec<(String, Value)>,
        patch: &MetadataPatch,
    ) -> Result<Draft, FieldbookError> {
        for (key, _) in &fields {
            validate_field_key(key)?;
        }
        self.core
            .store
            .with_tx(|store| Ok(store.drafts().upsert_fields(id, owner, &fields, patch)?))
    }

    pub fn get(&self, id: &DraftId) -> Result<Option<Draft>, FieldbookError> {
        Ok(self.core.store.drafts().get(id)?)
    }

    /// Like `get`, but a draft owned by someone else is an error, not a result.
    pub fn get_for_user(
        &self,
        id: &DraftId,
        user_id: &UserId,
    ) -> Result<Option<Draft>, FieldbookError> {
        match self.core.store.drafts().get(id)? {
            Some(draft) if !draft.is_owned_by(user_id) => {
                Err(DraftError::OwnedByAnotherUser.into())
            }
            other => Ok(other),
        }
    }

    pub fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Draft>, FieldbookError> {
        Ok(self.core.store.drafts().list_for_user(user_id, false)?)
    }

    pub fn active_for_user(&self, user_id: &UserId) -> Result<Vec<Draft>, FieldbookError> {
        Ok(self.core.store.drafts().list_for_user(user_id, true)?)
    }

    pub fn most_recent_for_user(&self, user_id: &UserId) -> Result<Option<Draft>, FieldbookError> {
        Ok(self.core.store.drafts().most_recent_for_user(user_id)?)
    }

    pub fn delete(&self, ctx: &RequestContext, id: &DraftId) -> Result<bool, FieldbookError> {
        self.core.with_notices(ctx, |store| {
            let deleted = store.drafts().delete(id)?;
            let notices = if deleted {
                vec![NoticeBody::DraftDeleted {
                    draft_id: id.clone(),
                }]
            } else {
                Vec::new()
            };
            Ok((deleted, notices))
        })
    }

    pub fn mark_submitted(&self, id: &DraftId) -> Result<Draft, FieldbookError> {
        self.core
            .store
            .with_tx(|store| Ok(store.drafts().mark_submitted(id, Utc::now())?))
    }

    pub fn complete_section(
        &self,
        id: &DraftId,
        owner: &Owner,
        section: &str,
        completed: bool,
    ) -> Result<Draft, FieldbookError> {
        let section = section.trim();
        if section.is_empty() {
            return Err(DraftError::InvalidInput {
                message: "section name must not be empty".to_string(),
            }
            .into());
        }
        let patch = MetadataPatch {
            current_section: Some(section.to_string()),
            completed_sections: if completed {
                vec![section.to_string()]
            } else {
                Vec::new()
            },
        };
        self.upsert_fields(id, owner, Vec::new(), &patch)
    }

    /// Creates (or refreshes) the event record for a draft and flags the
    /// draft submitted, in one transaction. The event keeps the draft's id.
    pub fn promote(
        &self,
        ctx: &RequestContext,
        id: &DraftId,
        owner: &Owner,
        input: PromoteInput,
    ) -> Result<EventRecord, FieldbookError> {
        validate_required("program id", &input.program_id)?;
        validate_required("container id", &input.container_id)?;
        validate_required("stage id", &input.stage_id)?;

        self.core.with_notices(ctx, |store| {
            let draft = store.drafts().get(id)?.ok_or(DraftError::NotFound)?;
            if !draft.is_owned_by(&owner.user_id) {
                return Err(DraftError::OwnedByAnotherUser.into());
            }
            let event_id = EventId::try_from(&draft.id).map_err(DraftError::from)?;
            let target = if input.submit {
                EventStatus::Pending
            } else {
                EventStatus::Draft
            };
            let data_values = data_values_from_fields(&draft.fields);
            let now = Utc::now();

            let mut notices = Vec::new();
            let event = match store.events().get(&event_id)? {
                None => {
                    let event = EventRecord {
                        id: event_id.clone(),
                        program_id: input.program_id,
                        container_id: input.container_id,
                        stage_id: input.stage_id,
                        event_date: input.event_date,
                        status: target,
                        data_values,
                        linked_entity_id: input.linked_entity_id,
                        server_id: None,
                        created_at: now,
                        updated_at: now,
                        synced_at: None,
                        sync_error: None,
                    };
                    store.events().insert(&event)?;
                    notices.push(NoticeBody::EventSaved {
                        event: event.clone(),
                    });
                    event
                }
                Some(mut existing) => {
                    let from = existing.status;
                    validate_event_status_transition(from, target)?;
                    existing.program_id = input.program_id;
                    existing.container_id = input.container_id;
                    existing.stage_id = input.stage_id;
                    existing.event_date = input.event_date;
                    existing.linked_entity_id = input.linked_entity_id;
                    existing.data_values = data_values;
                    existing.status = target;
                    if target == EventStatus::Pending {
                        existing.sync_error = None;
                    }
                    existing.updated_at = now;
                    store.events().replace(&existing)?;
                    notices.push(NoticeBody::EventUpdated {
                        event: existing.clone(),
                    });
                    if from != target {
                        notices.push(NoticeBody::EventStatusChanged {
                            event_id: event_id.clone(),
                            from,
                            to: target,
                        });
                    }
                    existing
                }
            };

            store.drafts().mark_submitted(&draft.id, now)?;
            notices.push(NoticeBody::DraftPromoted {
                draft_id: draft.id.clone(),
                event_id,
            });
            Ok((event, notices))
        })
    }
}

pub struct EventsApi<'a, S: Store> {
    core: &'a Fieldbook<S>,
}

impl<S: Store> EventsApi<'_, S> {
    pub fn save(
        &self,
        ctx: &RequestContext,
        input: NewEvent,
        submit: bool,
    ) -> Result<EventRecord, FieldbookError> {
        validate_required("program id", &input.program_id)?;
        validate_required("container id", &input.container_id)?;
        validate_required("stage id", &input.stage_id)?;

        self.core.with_notices(ctx, |store| {
            let id = input.id.unwrap_or_else(EventId::generate);
            if store.events().get(&id)?.is_some() {
                return Err(EventError::AlreadyExists {
                    id: id.to_string(),
                }
                .into());
            }
            let now = Utc::now();
            let event = EventRecord {
                id,
                program_id: input.program_id,
                container_id: input.container_id,
                stage_id: input.stage_id,
                event_date: input.event_date,
                status: if submit {
                    EventStatus::Pending
                } else {
                    EventStatus::Draft
                },
                data_values: input.data_values,
                linked_entity_id: input.linked_entity_id,
                server_id: None,
                created_at: now,
                updated_at: now,
                synced_at: None,
                sync_error: None,
            };
            store.events().insert(&event)?;
            Ok((
                event.clone(),
                vec![NoticeBody::EventSaved { event }],
            ))
        })
    }

    /// Edits a record that has not been delivered yet. Status is untouched.
    pub fn update(
        &self,
        ctx: &RequestContext,
        id: &EventId,
        patch: EventPatch,
    ) -> Result<EventRecord, FieldbookError> {
        self.core.with_notices(ctx, |store| {
            let mut event = store.events().get(id)?.ok_or(EventError::NotFound)?;
            if event.status == EventStatus::Synced {
                return Err(EventError::InvalidInput {
                    message: "synced events are read-only".to_string(),
                }
                .into());
            }
            if let Some(container_id) = patch.container_id {
                validate_required("container id", &container_id)?;
                event.container_id = container_id;
            }
            if let Some(stage_id) = patch.stage_id {
                validate_required("stage id", &stage_id)?;
                event.stage_id = stage_id;
            }
            if let Some(event_date) = patch.event_date {
                event.event_date = event_date;
            }
            if let Some(data_values) = patch.data_values {
                event.data_values = data_values;
            }
            if let Some(linked_entity_id) = patch.linked_entity_id {
                event.linked_entity_id = linked_entity_id;
            }
            event.updated_at = Utc::now();
            store.events().replace(&event)?;
            Ok((event.clone(), vec![NoticeBody::EventUpdated { event }]))
        })
    }

    pub fn get(&self, id: &EventId) -> Result<Option<EventRecord>, FieldbookError> {
        Ok(self.core.store.events().get(id)?)
    }

    pub fn all(&self) -> Result<Vec<EventRecord>, FieldbookError> {
        self.list(&EventFilter::default())
    }

    pub fn list(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, FieldbookError> {
        Ok(self.core.store.events().list(filter)?)
    }

    pub fn pending(&self) -> Result<Vec<EventRecord>, FieldbookError> {
        self.list(&EventFilter::status(EventStatus::Pending))
    }

    /// Also removes the submitted draft the record was promoted from.
    pub fn delete(&self, ctx: &RequestContext, id: &EventId) -> Result<(), FieldbookError> {
        self.core.with_notices(ctx, |store| {
            if !store.events().delete(id)? {
                return Err(EventError::NotFound.into());
            }
            drop_promoted_draft(store, id)?;
            Ok((
                (),
                vec![NoticeBody::EventDeleted {
                    event_id: id.clone(),
                }],
            ))
        })
    }

    /// Queues a saved draft record for delivery.
    pub fn submit(&self, ctx: &RequestContext, id: &EventId) -> Result<EventRecord, FieldbookError> {
        self.transition(ctx, id, None, Some(EventStatus::Draft), EventStatus::Pending, |_| {})
    }

    pub fn mark_synced(
        &self,
        ctx: &RequestContext,
        id: &EventId,
        server_id: &str,
    ) -> Result<EventRecord, FieldbookError> {
        self.transition(ctx, id, None, None, EventStatus::Synced, synced_with(server_id))
    }

    /// Data values are left untouched so a retry resubmits the same payload.
    pub fn mark_error(
        &self,
        ctx: &RequestContext,
        id: &EventId,
        message: &str,
    ) -> Result<EventRecord, FieldbookError> {
        self.transition(ctx, id, None, None, EventStatus::Error, failed_with(message))
    }

    /// Marks `sent` synced only if the stored record is still the one that
    /// was delivered. A record edited meanwhile fails with
    /// `EventError::ChangedSinceRead` and stays as it is.
    pub fn settle_synced(
        &self,
        ctx: &RequestContext,
        sent: &EventRecord,
        server_id: &str,
    ) -> Result<EventRecord, FieldbookError> {
        self.transition(
            ctx,
            &sent.id,
            Some(sent.updated_at),
            None,
            EventStatus::Synced,
            synced_with(server_id),
        )
    }

    /// Counterpart of `settle_synced` for a failed delivery.
    pub fn settle_error(
        &self,
        ctx: &RequestContext,
        sent: &EventRecord,
        message: &str,
    ) -> Result<EventRecord, FieldbookError> {
        self.transition(
            ctx,
            &sent.id,
            Some(sent.updated_at),
            None,
            EventStatus::Error,
            failed_with(message),
        )
    }

    pub fn retry(&self, ctx: &RequestContext, id: &EventId) -> Result<EventRecord, FieldbookError> {
        self.transition(ctx, id, None, Some(EventStatus::Error), EventStatus::Pending, |event| {
            event.sync_error = None;
        })
    }

    pub fn stats(&self) -> Result<EventStats, FieldbookError> {
        Ok(self.core.store.events().stats()?)
    }

    pub fn purge_synced(&self, ctx: &RequestContext) -> Result<u64, FieldbookError> {
        self.core.with_notices(ctx, |store| {
            for event in store.events().list(&EventFilter::status(EventStatus::Synced))? {
                drop_promoted_draft(store, &event.id)?;
            }
            let count = store.events().delete_with_status(EventStatus::Synced)?;
            Ok((count, vec![NoticeBody::SyncedPurged { count }]))
        })
    }

    fn transition<F>(
        &self,
        ctx: &RequestContext,
        id: &EventId,
        read_at: Option<DateTime<Utc>>,
        required_from: Option<EventStatus>,
        to: EventStatus,
        apply: F,
    ) -> Result<EventRecord, FieldbookError>
    where
        F: FnOnce(&mut EventRecord),
    {
        self.core.with_notices(ctx, |store| {
            let mut event = store.events().get(id)?.ok_or(EventError::NotFound)?;
            if read_at.is_some_and(|seen| seen != event.updated_at) {
                return Err(EventError::ChangedSinceRead { id: id.to_string() }.into());
            }
            let from = event.status;
            if required_from.is_some_and(|required| required != from) {
                return Err(EventError::InvalidTransition { from, to }.into());
            }
            validate_event_status_transition(from, to)?;
            event.status = to;
            event.updated_at = Utc::now();
            apply(&mut event);
            validate_sync_invariants(&event)?;
            store.events().replace(&event)?;
            let notice = if from == to {
                NoticeBody::EventUpdated {
                    event: event.clone(),
                }
            } else {
                NoticeBody::EventStatusChanged {
                    event_id: event.id.clone(),
                    from,
                    to,
                }
            };
            Ok((event, vec![notice]))
        })
    }
}

pub struct ViewApi<'a, S: Store> {
    core: &'a Fieldbook<S>,
}

impl<S: Store> ViewApi<'_, S> {
    /// Every event record plus the user's unpromoted drafts, each id once.
    pub fn merged(&self, user_id: &UserId) -> Result<Vec<WorkItem>, FieldbookError> {
        let events = self.core.store.events().list(&EventFilter::default())?;
        let drafts = self.core.store.drafts().list_for_user(user_id, true)?;
        Ok(view::merge(&events, &drafts))
    }
}

fn synced_with(server_id: &str) -> impl FnOnce(&mut EventRecord) {
    let server_id = server_id.trim().to_string();
    move |event| {
        event.server_id = Some(server_id);
        event.synced_at = Some(event.updated_at);
        event.sync_error = None;
    }
}

fn failed_with(message: &str) -> impl FnOnce(&mut EventRecord) {
    let message = match message.trim() {
        "" => FALLBACK_SYNC_ERROR.to_string(),
        trimmed => trimmed.to_string(),
    };
    move |event| event.sync_error = Some(message)
}

/// Deletes the draft an event was promoted from. An active draft that merely
/// shares the id is left alone.
fn drop_promoted_draft<S: Store>(store: &S, id: &EventId) -> Result<(), FieldbookError> {
    let draft_id = DraftId::from(id);
    if let Some(draft) = store.drafts().get(&draft_id)? {
        if !draft.metadata.is_draft {
            store.drafts().delete(&draft_id)?;
        }
    }
    Ok(())
}

/// Prefixed, non-empty draft fields as event data values, prefix stripped.
pub fn data_values_from_fields(fields: &BTreeMap<String, Value>) -> Vec<DataValue> {
    fields
        .iter()
        .filter_map(|(key, value)| {
            let field_id = key.strip_prefix(DATA_VALUE_PREFIX)?;
            if field_id.is_empty() {
                return None;
            }
            match value {
                Value::Null => None,
                Value::String(text) if text.is_empty() => None,
                other => Some(DataValue::new(field_id, other.clone())),
            }
        })
        .collect()
}

fn build_notice(ctx: &RequestContext, body: &NoticeBody) -> Result<Notice, FieldbookError> {
    let value = serde_json::to_value(body).map_err(|err| FieldbookError::Internal {
        message: err.to_string(),
    })?;
    Ok(Notice::new(ctx.source, value))
}
