use crate::error::{RemoteError, SyncError};
use crate::payload::{Acceptance, WirePayload, detect_acceptance};
use crate::remote::RemoteService;
use crate::session::SessionProvider;
use crate::storage::Storage;
use fb_core::RequestContext;
use fb_core::error::{EventError, FieldbookError};
use fb_core::types::{EventId, EventRecord, EventStats, NoticeBody};
use fb_events::NoticeSource;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Reported for a record edited locally while it was in flight. The edit is
/// kept and the record goes out again on the next pass.
pub const CHANGED_DURING_DELIVERY: &str = "record changed during delivery; left pending";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Delivery {
    Synced { server_id: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub event_id: EventId,
    #[serde(flatten)]
    pub delivery: Delivery,
}

impl RecordOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self.delivery, Delivery::Synced { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    pub results: Vec<RecordOutcome>,
    /// Counts over the whole local store after the pass.
    pub stats: EventStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    NothingToSync { stats: EventStats },
    Completed(SyncReport),
}

/// Drains pending event records to the remote service, one record at a
/// time. A failure is recorded on that record only and the pass moves on.
pub struct SyncEngine {
    storage: Storage,
    remote: Arc<dyn RemoteService>,
    session: Arc<dyn SessionProvider>,
    ping_check: bool,
    pass_lock: tokio::sync::Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        storage: Storage,
        remote: Arc<dyn RemoteService>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            storage,
            remote,
            session,
            ping_check: false,
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Also ping the remote before each pass; an unreachable remote counts as
    /// offline.
    pub fn with_ping_check(mut self, enabled: bool) -> Self {
        self.ping_check = enabled;
        self
    }

    /// One sync pass over the records pending at the moment it starts.
    pub async fn sync_pending(&self) -> Result<SyncOutcome, SyncError> {
        let _pass = self.pass_lock.lock().await;
        self.ensure_reachable().await?;

        let snapshot = self.storage.run(|fb| fb.events().pending()).await?;
        if snapshot.is_empty() {
            let stats = self.storage.run(|fb| fb.events().stats()).await?;
            tracing::info!("no pending records to sync");
            return Ok(SyncOutcome::NothingToSync { stats });
        }

        tracing::info!(pending = snapshot.len(), "sync pass started");
        let mut results = Vec::with_capacity(snapshot.len());
        for event in snapshot {
            results.push(self.deliver(event).await);
        }

        let synced = results.iter().filter(|r| r.is_synced()).count();
        let failed = results.len() - synced;
        let stats = self.storage.run(|fb| fb.events().stats()).await?;
        tracing::info!(synced, failed, "sync pass finished");
        self.storage.notify(
            NoticeSource::SyncEngine,
            &NoticeBody::SyncFinished { synced, failed },
        );

        Ok(SyncOutcome::Completed(SyncReport {
            attempted: results.len(),
            synced,
            failed,
            results,
            stats,
        }))
    }

    /// Moves one failed record back to pending and delivers just that record.
    pub async fn retry(&self, id: &EventId) -> Result<RecordOutcome, SyncError> {
        let _pass = self.pass_lock.lock().await;
        self.ensure_reachable().await?;

        let event_id = id.clone();
        let event = self
            .storage
            .run(move |fb| fb.events().retry(&ctx(), &event_id))
            .await?;
        Ok(self.deliver(event).await)
    }

    /// Runs a pass every `every` until the returned task is aborted. An
    /// offline tick is skipped quietly.
    pub fn schedule(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match self.sync_pending().await {
                    Ok(_) | Err(SyncError::NetworkUnavailable) => {}
                    Err(err) => tracing::error!(error = %err, "scheduled sync failed"),
                }
            }
        })
    }

    pub async fn is_reachable(&self) -> bool {
        if !self.session.is_online() {
            return false;
        }
        !self.ping_check || self.remote.ping().await
    }

    async fn ensure_reachable(&self) -> Result<(), SyncError> {
        if self.is_reachable().await {
            Ok(())
        } else {
            tracing::info!("offline; sync skipped");
            Err(SyncError::NetworkUnavailable)
        }
    }

    async fn deliver(&self, event: EventRecord) -> RecordOutcome {
        let payload = WirePayload::from_event(&event);
        let delivery = match self.remote.submit(&payload).await {
            Ok(body) => match detect_acceptance(&body, &event.id) {
                Acceptance::Accepted { server_id } => Delivery::Synced { server_id },
                Acceptance::Rejected { reason } => Delivery::Failed { reason },
            },
            Err(RemoteError::Rejected { reason }) => Delivery::Failed { reason },
            Err(err) => Delivery::Failed {
                reason: err.to_string(),
            },
        };

        let sent = event.clone();
        let recorded = match &delivery {
            Delivery::Synced { server_id } => {
                let server_id = server_id.clone();
                self.storage
                    .run(move |fb| fb.events().settle_synced(&ctx(), &sent, &server_id))
                    .await
            }
            Delivery::Failed { reason } => {
                tracing::warn!(event_id = %event.id, reason = %reason, "record failed to sync");
                let reason = reason.clone();
                self.storage
                    .run(move |fb| fb.events().settle_error(&ctx(), &sent, &reason))
                    .await
            }
        };

        match recorded {
            Ok(_) => RecordOutcome {
                event_id: event.id,
                delivery,
            },
            Err(FieldbookError::Event(EventError::ChangedSinceRead { .. })) => {
                tracing::info!(event_id = %event.id, "record edited during delivery; left pending");
                RecordOutcome {
                    event_id: event.id,
                    delivery: Delivery::Failed {
                        reason: CHANGED_DURING_DELIVERY.to_string(),
                    },
                }
            }
            Err(err) => {
                // The record keeps its previous local status and is picked up
                // again by a later pass.
                tracing::warn!(event_id = %event.id, error = %err, "failed to record sync outcome");
                RecordOutcome {
                    event_id: event.id,
                    delivery: Delivery::Failed {
                        reason: format!("outcome not recorded locally: {err}"),
                    },
                }
            }
        }
    }
}

fn ctx() -> RequestContext {
    RequestContext::new(NoticeSource::SyncEngine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use fb_core::types::{DataValue, EventPatch, EventStatus, NewEvent, Owner, UserId};
    use fb_events::NoticeBus;
    use crate::session::StaticSession;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted remote: answers per event id, records every submission.
    #[derive(Default)]
    struct FakeRemote {
        answers: Mutex<HashMap<String, Result<Value, RemoteError>>>,
        submitted: Mutex<Vec<WirePayload>>,
        reachable: bool,
        delay: Option<Duration>,
    }

    impl FakeRemote {
        fn reachable() -> Self {
            Self {
                reachable: true,
                ..Self::default()
            }
        }

        fn answer(&self, id: &str, answer: Result<Value, RemoteError>) {
            self.answers.lock().unwrap().insert(id.to_string(), answer);
        }

        fn submitted_ids(&self) -> Vec<String> {
            self.submitted
                .lock()
                .unwrap()
                .iter()
                .map(|payload| payload.id.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RemoteService for FakeRemote {
        async fn submit(&self, payload: &WirePayload) -> Result<Value, RemoteError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.submitted.lock().unwrap().push(payload.clone());
            self.answers
                .lock()
                .unwrap()
                .get(&payload.id)
                .cloned()
                .unwrap_or_else(|| Ok(json!({"status": "SUCCESS"})))
        }

        async fn ping(&self) -> bool {
            self.reachable
        }
    }

    fn session(online: bool) -> Arc<StaticSession> {
        Arc::new(StaticSession::new(
            Owner::new(UserId::new("u1").unwrap(), "Inspector One"),
            online,
        ))
    }

    async fn seed(storage: &Storage, id: &str, submit: bool) -> EventRecord {
        let input = NewEvent {
            id: Some(EventId::new(id).unwrap()),
            program_id: "prgInspect1".to_string(),
            container_id: "ouClinic001".to_string(),
            stage_id: "stgFacility".to_string(),
            event_date: NaiveDate::from_ymd_opt(2025, 7, 11).unwrap(),
            data_values: vec![DataValue::new("deScore", json!(7))],
            linked_entity_id: None,
        };
        storage
            .run(move |fb| fb.events().save(&ctx(), input, submit))
            .await
            .unwrap()
    }

    async fn get(storage: &Storage, id: &EventId) -> EventRecord {
        let id = id.clone();
        storage
            .run(move |fb| fb.events().get(&id))
            .await
            .unwrap()
            .unwrap()
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            other => panic!("expected a completed pass, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_rejection_does_not_stop_the_pass() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let e1 = seed(&storage, "evAAAAAAAA1", true).await;
        let e2 = seed(&storage, "evAAAAAAAA2", true).await;
        let remote = Arc::new(FakeRemote::reachable());
        remote.answer(
            "evAAAAAAAA1",
            Ok(json!({"response": {"importSummaries": [{"status": "SUCCESS", "reference": "srv1"}]}})),
        );
        remote.answer(
            "evAAAAAAAA2",
            Ok(json!({"status": "ERROR", "message": "Conflict"})),
        );
        let engine = SyncEngine::new(storage.clone(), remote.clone(), session(true));

        let report = completed(engine.sync_pending().await.unwrap());

        assert_eq!((report.attempted, report.synced, report.failed), (2, 1, 1));
        let e1 = get(&storage, &e1.id).await;
        assert_eq!(e1.status, EventStatus::Synced);
        assert_eq!(e1.server_id.as_deref(), Some("srv1"));
        assert!(e1.synced_at.is_some());
        let e2_after = get(&storage, &e2.id).await;
        assert_eq!(e2_after.status, EventStatus::Error);
        assert_eq!(e2_after.sync_error.as_deref(), Some("Conflict"));
        assert_eq!(e2_after.data_values, e2.data_values);
        assert_eq!(report.stats.synced, 1);
        assert_eq!(report.stats.error, 1);
    }

    #[tokio::test]
    async fn offline_pass_touches_nothing() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let event = seed(&storage, "evAAAAAAAA1", true).await;
        let remote = Arc::new(FakeRemote::reachable());
        let engine = SyncEngine::new(storage.clone(), remote.clone(), session(false));

        assert!(matches!(
            engine.sync_pending().await,
            Err(SyncError::NetworkUnavailable)
        ));
        assert!(remote.submitted_ids().is_empty());
        assert_eq!(get(&storage, &event.id).await, event);
    }

    #[tokio::test]
    async fn failed_ping_counts_as_offline() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        seed(&storage, "evAAAAAAAA1", true).await;
        let remote = Arc::new(FakeRemote::default());
        let engine =
            SyncEngine::new(storage.clone(), remote.clone(), session(true)).with_ping_check(true);

        assert!(matches!(
            engine.sync_pending().await,
            Err(SyncError::NetworkUnavailable)
        ));
        assert!(remote.submitted_ids().is_empty());
    }

    #[tokio::test]
    async fn empty_snapshot_reports_nothing_to_sync() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        seed(&storage, "evAAAAAAAA1", false).await;
        let engine = SyncEngine::new(
            storage.clone(),
            Arc::new(FakeRemote::reachable()),
            session(true),
        );

        match engine.sync_pending().await.unwrap() {
            SyncOutcome::NothingToSync { stats } => {
                assert_eq!(stats.total, 1);
                assert_eq!(stats.draft, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn only_pending_records_are_submitted() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        seed(&storage, "evDraft0001", false).await;
        let synced = seed(&storage, "evSynced001", true).await;
        storage
            .run({
                let id = synced.id.clone();
                move |fb| fb.events().mark_synced(&ctx(), &id, "srv1")
            })
            .await
            .unwrap();
        seed(&storage, "evPending01", true).await;
        let remote = Arc::new(FakeRemote::reachable());
        let engine = SyncEngine::new(storage.clone(), remote.clone(), session(true));

        completed(engine.sync_pending().await.unwrap());

        assert_eq!(remote.submitted_ids(), vec!["evPending01"]);
    }

    #[tokio::test]
    async fn transport_failure_marks_error_and_retry_resubmits_same_payload() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let event = seed(&storage, "evAAAAAAAA1", true).await;
        let remote = Arc::new(FakeRemote::reachable());
        remote.answer(
            "evAAAAAAAA1",
            Err(RemoteError::Transport {
                message: "connection reset".to_string(),
            }),
        );
        let engine = SyncEngine::new(storage.clone(), remote.clone(), session(true));

        let report = completed(engine.sync_pending().await.unwrap());
        assert_eq!(report.failed, 1);
        let failed = get(&storage, &event.id).await;
        assert_eq!(failed.status, EventStatus::Error);
        assert!(failed.sync_error.unwrap().contains("connection reset"));

        remote.answer("evAAAAAAAA1", Ok(json!({"httpStatus": "OK"})));
        let outcome = engine.retry(&event.id).await.unwrap();

        assert!(outcome.is_synced());
        let synced = get(&storage, &event.id).await;
        assert_eq!(synced.status, EventStatus::Synced);
        assert_eq!(synced.server_id.as_deref(), Some("evAAAAAAAA1"));
        assert_eq!(synced.sync_error, None);
        let submitted = remote.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0], submitted[1]);
    }

    #[tokio::test]
    async fn retry_requires_a_failed_record() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let event = seed(&storage, "evAAAAAAAA1", true).await;
        let engine = SyncEngine::new(
            storage.clone(),
            Arc::new(FakeRemote::reachable()),
            session(true),
        );

        assert!(matches!(
            engine.retry(&event.id).await,
            Err(SyncError::Storage(FieldbookError::Event(
                EventError::InvalidTransition { .. }
            )))
        ));
    }

    #[tokio::test]
    async fn retry_while_offline_leaves_the_record_failed() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let event = seed(&storage, "evAAAAAAAA1", true).await;
        storage
            .run({
                let id = event.id.clone();
                move |fb| fb.events().mark_error(&ctx(), &id, "timeout")
            })
            .await
            .unwrap();
        let online = session(false);
        let engine = SyncEngine::new(storage.clone(), Arc::new(FakeRemote::reachable()), online);

        assert!(matches!(
            engine.retry(&event.id).await,
            Err(SyncError::NetworkUnavailable)
        ));
        assert_eq!(get(&storage, &event.id).await.status, EventStatus::Error);
    }

    #[tokio::test]
    async fn concurrent_passes_do_not_double_submit() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        for id in ["evAAAAAAAA1", "evAAAAAAAA2", "evAAAAAAAA3"] {
            seed(&storage, id, true).await;
        }
        let remote = Arc::new(FakeRemote {
            reachable: true,
            delay: Some(Duration::from_millis(20)),
            ..FakeRemote::default()
        });
        let engine = Arc::new(SyncEngine::new(
            storage.clone(),
            remote.clone(),
            session(true),
        ));

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.sync_pending().await }
        });
        let second = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.sync_pending().await }
        });
        let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

        assert_eq!(remote.submitted_ids().len(), 3);
        let completed_passes = outcomes
            .iter()
            .filter(|o| matches!(o, SyncOutcome::Completed(_)))
            .count();
        assert_eq!(completed_passes, 1);
    }

    #[tokio::test]
    async fn scheduled_passes_pick_up_later_records() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let remote = Arc::new(FakeRemote::reachable());
        let engine = Arc::new(SyncEngine::new(
            storage.clone(),
            remote.clone(),
            session(true),
        ));
        let handle = Arc::clone(&engine).schedule(Duration::from_millis(20));

        let event = seed(&storage, "evAAAAAAAA1", true).await;
        let mut synced = false;
        for _ in 0..100 {
            if get(&storage, &event.id).await.status == EventStatus::Synced {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(synced);
        assert_eq!(remote.submitted_ids(), vec!["evAAAAAAAA1"]);
    }

    #[tokio::test]
    async fn edit_during_delivery_is_kept_and_sent_next_pass() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let event = seed(&storage, "evAAAAAAAA1", true).await;
        let remote = Arc::new(FakeRemote {
            reachable: true,
            delay: Some(Duration::from_millis(200)),
            ..FakeRemote::default()
        });
        let engine = Arc::new(SyncEngine::new(
            storage.clone(),
            remote.clone(),
            session(true),
        ));

        let pass = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.sync_pending().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        storage
            .run({
                let id = event.id.clone();
                move |fb| {
                    fb.events().update(
                        &ctx(),
                        &id,
                        EventPatch {
                            data_values: Some(vec![DataValue::new("deScore", json!(9))]),
                            ..EventPatch::default()
                        },
                    )
                }
            })
            .await
            .unwrap();
        let report = completed(pass.await.unwrap().unwrap());

        assert_eq!((report.synced, report.failed), (0, 1));
        assert_eq!(
            report.results[0].delivery,
            Delivery::Failed {
                reason: CHANGED_DURING_DELIVERY.to_string()
            }
        );
        let stored = get(&storage, &event.id).await;
        assert_eq!(stored.status, EventStatus::Pending);
        assert_eq!(stored.data_values, vec![DataValue::new("deScore", json!(9))]);

        let report = completed(engine.sync_pending().await.unwrap());
        assert_eq!(report.synced, 1);
        let stored = get(&storage, &event.id).await;
        assert_eq!(stored.status, EventStatus::Synced);
        let submitted = remote.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].data_values[0].value, "7");
        assert_eq!(submitted[1].data_values[0].value, "9");
    }

    #[tokio::test]
    async fn retry_touches_only_the_requested_record() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let target = seed(&storage, "evTarget001", true).await;
        let other_failed = seed(&storage, "evFailed002", true).await;
        let pending = seed(&storage, "evPending03", true).await;
        let synced = seed(&storage, "evSynced004", true).await;
        let saved = seed(&storage, "evSaved0005", false).await;
        storage
            .run({
                let (target, other, synced) =
                    (target.id.clone(), other_failed.id.clone(), synced.id.clone());
                move |fb| {
                    fb.events().mark_error(&ctx(), &target, "timeout")?;
                    fb.events().mark_error(&ctx(), &other, "conflict")?;
                    fb.events().mark_synced(&ctx(), &synced, "srv4")
                }
            })
            .await
            .unwrap();
        let before = [
            get(&storage, &other_failed.id).await,
            get(&storage, &pending.id).await,
            get(&storage, &synced.id).await,
            get(&storage, &saved.id).await,
        ];
        let remote = Arc::new(FakeRemote::reachable());
        let engine = SyncEngine::new(storage.clone(), remote.clone(), session(true));

        let outcome = engine.retry(&target.id).await.unwrap();

        assert!(outcome.is_synced());
        assert_eq!(get(&storage, &target.id).await.status, EventStatus::Synced);
        assert_eq!(remote.submitted_ids(), vec!["evTarget001"]);
        for record in before {
            assert_eq!(get(&storage, &record.id).await, record);
        }
    }

    #[tokio::test]
    async fn k_accepted_of_p_pending() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let remote = Arc::new(FakeRemote::reachable());
        let ids = [
            "evAAAAAAAA1",
            "evAAAAAAAA2",
            "evAAAAAAAA3",
            "evAAAAAAAA4",
            "evAAAAAAAA5",
        ];
        for (n, id) in ids.iter().enumerate() {
            seed(&storage, id, true).await;
            if n % 2 == 1 {
                remote.answer(id, Ok(json!({"status": "ERROR"})));
            }
        }
        let mut notices = storage.bus().subscribe();
        let engine = SyncEngine::new(storage.clone(), remote.clone(), session(true));

        let report = completed(engine.sync_pending().await.unwrap());

        assert_eq!(report.synced, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.stats.synced, 3);
        assert_eq!(report.stats.error, 2);
        assert_eq!(report.stats.pending, 0);
        let mut last = None;
        while let Ok(notice) = notices.try_recv() {
            last = Some(notice);
        }
        let last = last.unwrap();
        assert_eq!(last.kind(), Some("SyncFinished"));
        assert_eq!(last.body["payload"]["synced"], 3);
    }
}
