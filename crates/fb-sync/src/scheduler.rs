use crate::storage::Storage;
use chrono::Utc;
use fb_core::error::{FieldbookError, StorageError};
use fb_core::types::{Draft, DraftId, MetadataPatch, NoticeBody, Owner};
use fb_events::NoticeSource;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Debounces field edits for one draft into coalesced store commits.
///
/// Edits accumulate in an in-memory queue keyed by field; repeated edits of
/// one key keep only the latest value. Each edit re-arms a single quiet-period
/// timer and only the most recently armed timer commits. At most one commit
/// runs at a time. A failed commit puts its batch back under any newer values
/// so nothing is dropped; the next timer fire or flush retries it.
#[derive(Clone)]
pub struct SaveScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    storage: Storage,
    draft_id: DraftId,
    owner: Owner,
    debounce: Duration,
    queue: Mutex<Queue>,
    commit_lock: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct Queue {
    fields: HashMap<String, Queued>,
    /// Section progress from failed immediate saves, written with the next batch.
    patch: MetadataPatch,
    /// Sequence of the latest immediate save per key, while it is in flight.
    immediate: HashMap<String, u64>,
    next_seq: u64,
    timer_generation: u64,
}

#[derive(Clone)]
struct Queued {
    value: Value,
    seq: u64,
}

impl Queue {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn arm(&mut self) -> u64 {
        self.timer_generation += 1;
        self.timer_generation
    }

    fn enqueue(&mut self, key: String, value: Value) {
        let seq = self.next_seq();
        self.fields.insert(key, Queued { value, seq });
    }

    /// Returns a failed batch to the queue without overwriting newer edits.
    fn restore(&mut self, batch: Vec<(String, Queued)>) {
        for (key, queued) in batch {
            if self.fields.contains_key(&key) {
                continue;
            }
            if self
                .immediate
                .get(&key)
                .is_some_and(|&seq| seq > queued.seq)
            {
                continue;
            }
            self.fields.insert(key, queued);
        }
    }

    /// Puts back section progress from a failed write. `queued_is_newer`
    /// says which side's current section wins.
    fn restore_patch(&mut self, failed: MetadataPatch, queued_is_newer: bool) {
        if failed.is_empty() {
            return;
        }
        let queued = std::mem::take(&mut self.patch);
        self.patch = if queued_is_newer {
            merge_patches(failed, queued)
        } else {
            merge_patches(queued, failed)
        };
    }
}

fn merge_patches(older: MetadataPatch, newer: MetadataPatch) -> MetadataPatch {
    let mut completed = older.completed_sections;
    for section in newer.completed_sections {
        if !completed.contains(&section) {
            completed.push(section);
        }
    }
    MetadataPatch {
        current_section: newer.current_section.or(older.current_section),
        completed_sections: completed,
    }
}

impl SaveScheduler {
    pub fn new(storage: Storage, draft_id: DraftId, owner: Owner, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                storage,
                draft_id,
                owner,
                debounce,
                queue: Mutex::new(Queue::default()),
                commit_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn draft_id(&self) -> &DraftId {
        &self.inner.draft_id
    }

    /// Queues one field and restarts the quiet period. Must be called from
    /// within a Tokio runtime.
    pub fn save_field(&self, key: impl Into<String>, value: Value) -> Result<(), FieldbookError> {
        self.save_fields([(key.into(), value)])
    }

    pub fn save_fields<I>(&self, fields: I) -> Result<(), FieldbookError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let generation = {
            let mut queue = self.inner.lock_queue()?;
            for (key, value) in fields {
                queue.enqueue(key, value);
            }
            queue.arm()
        };
        self.inner.arm_timer(generation);
        Ok(())
    }

    /// Writes one field and any section progress now, bypassing the quiet
    /// period. A queued value for the same key is discarded since this one is
    /// newer. On failure both the value and the patch stay queued.
    pub async fn save_field_immediate(
        &self,
        key: impl Into<String>,
        value: Value,
        patch: MetadataPatch,
    ) -> Result<Draft, FieldbookError> {
        let key = key.into();
        let seq = {
            let mut queue = self.inner.lock_queue()?;
            let seq = queue.next_seq();
            queue.fields.remove(&key);
            queue.immediate.insert(key.clone(), seq);
            seq
        };

        let _commit = self.inner.commit_lock.lock().await;
        let result = self
            .inner
            .write(vec![(key.clone(), value.clone())], patch.clone())
            .await;

        let generation = {
            let mut queue = self.inner.lock_queue()?;
            if queue.immediate.get(&key) == Some(&seq) {
                queue.immediate.remove(&key);
            }
            match &result {
                Ok(_) => None,
                Err(_) => {
                    queue.restore(vec![(key.clone(), Queued { value, seq })]);
                    queue.restore_patch(patch, false);
                    Some(queue.arm())
                }
            }
        };

        match result {
            Ok(draft) => {
                self.inner.committed(1, true);
                Ok(draft)
            }
            Err(err) => {
                let queued = self.pending_count();
                self.inner.failed(&err, queued);
                if let Some(generation) = generation {
                    self.inner.arm_timer(generation);
                }
                Err(err)
            }
        }
    }

    /// Cancels the pending timer and commits whatever is queued. Returns the
    /// number of fields written.
    pub async fn flush_pending_saves(&self) -> Result<usize, FieldbookError> {
        self.inner.lock_queue()?.arm();
        self.inner.commit_queued().await
    }

    /// The stored draft for this scheduler's id, or `None` if nothing has
    /// been committed yet. Queued edits are not included.
    pub async fn load_form_data(&self) -> Result<Option<Draft>, FieldbookError> {
        let draft_id = self.inner.draft_id.clone();
        let user_id = self.inner.owner.user_id.clone();
        self.inner
            .storage
            .run(move |fb| fb.drafts().get_for_user(&draft_id, &user_id))
            .await
    }

    /// Records section progress right away, serialized with field commits.
    pub async fn complete_section(
        &self,
        section: impl Into<String>,
        completed: bool,
    ) -> Result<Draft, FieldbookError> {
        let section = section.into();
        let _commit = self.inner.commit_lock.lock().await;
        let draft_id = self.inner.draft_id.clone();
        let owner = self.inner.owner.clone();
        self.inner
            .storage
            .run(move |fb| {
                fb.drafts()
                    .complete_section(&draft_id, &owner, &section, completed)
            })
            .await
    }

    pub fn pending_count(&self) -> usize {
        self.inner
            .lock_queue()
            .map(|queue| queue.fields.len())
            .unwrap_or_default()
    }
}

impl SchedulerInner {
    fn lock_queue(&self) -> Result<MutexGuard<'_, Queue>, FieldbookError> {
        self.queue.lock().map_err(|_| FieldbookError::Internal {
            message: "save queue lock poisoned".to_string(),
        })
    }

    fn arm_timer(self: &Arc<Self>, generation: u64) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            let current = match inner.lock_queue() {
                Ok(queue) => queue.timer_generation,
                Err(_) => return,
            };
            if current != generation {
                return;
            }
            // Failures are logged and kept queued by commit_queued.
            let _ = inner.commit_queued().await;
        });
    }

    async fn commit_queued(&self) -> Result<usize, FieldbookError> {
        let _commit = self.commit_lock.lock().await;
        let (batch, patch) = {
            let mut queue = self.lock_queue()?;
            let batch: Vec<(String, Queued)> = queue.fields.drain().collect();
            (batch, std::mem::take(&mut queue.patch))
        };
        if batch.is_empty() && patch.is_empty() {
            return Ok(0);
        }

        let fields = batch
            .iter()
            .map(|(key, queued)| (key.clone(), queued.value.clone()))
            .collect();
        match self.write(fields, patch.clone()).await {
            Ok(_) => {
                self.committed(batch.len(), false);
                Ok(batch.len())
            }
            Err(err) => {
                let queued = {
                    let mut queue = self.lock_queue()?;
                    queue.restore(batch);
                    queue.restore_patch(patch, true);
                    queue.fields.len()
                };
                self.failed(&err, queued);
                Err(err)
            }
        }
    }

    async fn write(
        &self,
        fields: Vec<(String, Value)>,
        patch: MetadataPatch,
    ) -> Result<Draft, FieldbookError> {
        let draft_id = self.draft_id.clone();
        let owner = self.owner.clone();
        self.storage
            .run(move |fb| fb.drafts().upsert_fields(&draft_id, &owner, fields, &patch))
            .await
    }

    fn committed(&self, saved_fields: usize, immediate: bool) {
        tracing::debug!(draft_id = %self.draft_id, saved_fields, immediate, "draft fields committed");
        self.storage.notify(
            NoticeSource::Scheduler,
            &NoticeBody::FieldsCommitted {
                draft_id: self.draft_id.clone(),
                saved_fields,
                immediate,
                at: Utc::now(),
            },
        );
    }

    fn failed(&self, err: &FieldbookError, queued: usize) {
        if matches!(err.storage(), Some(StorageError::NotReady)) {
            tracing::info!(draft_id = %self.draft_id, queued, "storage not ready; edits kept for retry");
        } else {
            tracing::warn!(draft_id = %self.draft_id, queued, error = %err, "draft commit failed; edits kept for retry");
        }
        self.storage.notify(
            NoticeSource::Scheduler,
            &NoticeBody::SaveFailed {
                draft_id: self.draft_id.clone(),
                message: err.to_string(),
                queued,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fb_core::error::DraftError;
    use fb_core::types::UserId;
    use fb_events::NoticeBus;
    use serde_json::json;

    const QUIET: Duration = Duration::from_millis(40);

    fn owner(user: &str) -> Owner {
        Owner::new(UserId::new(user).unwrap(), format!("Inspector {user}"))
    }

    fn scheduler(storage: &Storage, draft: &str, user: &str) -> SaveScheduler {
        SaveScheduler::new(
            storage.clone(),
            DraftId::new(draft).unwrap(),
            owner(user),
            QUIET,
        )
    }

    /// Timers never fire during the test; only explicit flushes commit.
    fn manual(storage: &Storage, draft: &str, user: &str) -> SaveScheduler {
        SaveScheduler::new(
            storage.clone(),
            DraftId::new(draft).unwrap(),
            owner(user),
            Duration::from_secs(30),
        )
    }

    async fn wait_until<F>(mut done: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn stored(scheduler: &SaveScheduler) -> Option<Draft> {
        scheduler.load_form_data().await.unwrap()
    }

    #[tokio::test]
    async fn edits_in_one_window_land_as_one_commit() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let scheduler = scheduler(&storage, "ev1", "u1");
        scheduler.save_field("a", json!("1")).unwrap();
        scheduler.flush_pending_saves().await.unwrap();
        let mut notices = storage.bus().subscribe();

        scheduler.save_field("a", json!("2")).unwrap();
        scheduler.save_field("b", json!("x")).unwrap();
        assert_eq!(scheduler.pending_count(), 2);
        wait_until(|| scheduler.pending_count() == 0).await;
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.kind(), Some("FieldsCommitted"));
        assert_eq!(notice.body["payload"]["saved_fields"], 2);

        let draft = stored(&scheduler).await.unwrap();
        assert_eq!(draft.field("a"), Some(&json!("2")));
        assert_eq!(draft.field("b"), Some(&json!("x")));
        tokio::time::sleep(QUIET * 2).await;
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn latest_value_wins_within_a_window() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let scheduler = manual(&storage, "ev1", "u1");

        for value in ["d", "do", "dog"] {
            scheduler.save_field("name", json!(value)).unwrap();
        }
        scheduler.flush_pending_saves().await.unwrap();

        let draft = stored(&scheduler).await.unwrap();
        assert_eq!(draft.field("name"), Some(&json!("dog")));
    }

    #[tokio::test]
    async fn flush_writes_without_waiting_and_cancels_the_timer() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let scheduler = manual(&storage, "ev1", "u1");
        scheduler
            .save_fields([
                ("a".to_string(), json!(1)),
                ("b".to_string(), json!(2)),
            ])
            .unwrap();

        assert_eq!(scheduler.flush_pending_saves().await.unwrap(), 2);
        assert_eq!(scheduler.flush_pending_saves().await.unwrap(), 0);
        assert_eq!(stored(&scheduler).await.unwrap().fields.len(), 2);
    }

    #[tokio::test]
    async fn not_ready_storage_keeps_the_queue_for_retry() {
        let storage = Storage::unopened(NoticeBus::default());
        let scheduler = manual(&storage, "ev1", "u1");

        scheduler.save_field("a", json!("1")).unwrap();
        let err = scheduler.flush_pending_saves().await.unwrap_err();
        assert!(err.is_not_ready());
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.save_field("b", json!("2")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        storage.attach(dir.path().join("fieldbook.db")).unwrap();

        assert_eq!(scheduler.flush_pending_saves().await.unwrap(), 2);
        let draft = stored(&scheduler).await.unwrap();
        assert_eq!(draft.field("a"), Some(&json!("1")));
        assert_eq!(draft.field("b"), Some(&json!("2")));
    }

    #[tokio::test]
    async fn failed_batch_does_not_overwrite_newer_edits() {
        let storage = Storage::unopened(NoticeBus::default());
        let scheduler = manual(&storage, "ev1", "u1");

        scheduler.save_field("a", json!("old")).unwrap();
        assert!(scheduler.flush_pending_saves().await.is_err());
        scheduler.save_field("a", json!("new")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        storage.attach(dir.path().join("fieldbook.db")).unwrap();

        scheduler.flush_pending_saves().await.unwrap();
        let draft = stored(&scheduler).await.unwrap();
        assert_eq!(draft.field("a"), Some(&json!("new")));
    }

    #[tokio::test]
    async fn immediate_save_supersedes_a_queued_value() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let scheduler = manual(&storage, "ev1", "u1");

        scheduler.save_field("a", json!("queued")).unwrap();
        scheduler.save_field("b", json!("queued")).unwrap();
        let draft = scheduler
            .save_field_immediate("a", json!("now"), MetadataPatch::default())
            .await
            .unwrap();
        assert_eq!(draft.field("a"), Some(&json!("now")));
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.flush_pending_saves().await.unwrap();
        let draft = stored(&scheduler).await.unwrap();
        assert_eq!(draft.field("a"), Some(&json!("now")));
        assert_eq!(draft.field("b"), Some(&json!("queued")));
    }

    #[tokio::test]
    async fn failed_immediate_save_is_queued_for_retry() {
        let storage = Storage::unopened(NoticeBus::default());
        let scheduler = manual(&storage, "ev1", "u1");

        let patch = MetadataPatch {
            current_section: Some("Pharmacy".to_string()),
            completed_sections: vec!["Reception".to_string()],
        };
        assert!(scheduler
            .save_field_immediate("a", json!("1"), patch)
            .await
            .is_err());
        assert_eq!(scheduler.pending_count(), 1);

        let dir = tempfile::tempdir().unwrap();
        storage.attach(dir.path().join("fieldbook.db")).unwrap();
        scheduler.flush_pending_saves().await.unwrap();
        let draft = stored(&scheduler).await.unwrap();
        assert_eq!(draft.field("a"), Some(&json!("1")));
        assert_eq!(draft.metadata.current_section.as_deref(), Some("Pharmacy"));
        assert_eq!(draft.metadata.completed_sections, vec!["Reception"]);
    }

    #[tokio::test]
    async fn immediate_save_applies_section_progress() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let scheduler = manual(&storage, "ev1", "u1");

        let draft = scheduler
            .save_field_immediate(
                "deScore",
                json!(7),
                MetadataPatch {
                    current_section: Some("Waste".to_string()),
                    completed_sections: vec!["Reception".to_string(), "Pharmacy".to_string()],
                },
            )
            .await
            .unwrap();

        assert_eq!(draft.field("deScore"), Some(&json!(7)));
        assert_eq!(draft.metadata.current_section.as_deref(), Some("Waste"));
        assert_eq!(draft.metadata.completed_sections, vec!["Reception", "Pharmacy"]);
    }

    #[tokio::test]
    async fn failed_section_progress_yields_to_a_newer_current_section() {
        let storage = Storage::unopened(NoticeBus::default());
        let scheduler = manual(&storage, "ev1", "u1");

        let older = MetadataPatch {
            current_section: Some("Reception".to_string()),
            completed_sections: vec!["Intro".to_string()],
        };
        let newer = MetadataPatch {
            current_section: Some("Pharmacy".to_string()),
            completed_sections: vec!["Reception".to_string()],
        };
        assert!(scheduler.save_field_immediate("a", json!("1"), older).await.is_err());
        assert!(scheduler.save_field_immediate("b", json!("2"), newer).await.is_err());

        let dir = tempfile::tempdir().unwrap();
        storage.attach(dir.path().join("fieldbook.db")).unwrap();
        assert_eq!(scheduler.flush_pending_saves().await.unwrap(), 2);
        let draft = stored(&scheduler).await.unwrap();
        assert_eq!(draft.metadata.current_section.as_deref(), Some("Pharmacy"));
        assert_eq!(draft.metadata.completed_sections, vec!["Intro", "Reception"]);
    }

    #[tokio::test]
    async fn load_is_empty_before_the_first_commit_and_scoped_to_the_owner() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let mine = manual(&storage, "ev1", "u1");
        assert!(stored(&mine).await.is_none());

        mine.save_field("a", json!("1")).unwrap();
        mine.flush_pending_saves().await.unwrap();

        let theirs = manual(&storage, "ev1", "u2");
        assert!(matches!(
            theirs.load_form_data().await,
            Err(FieldbookError::Draft(DraftError::OwnedByAnotherUser))
        ));
        theirs.save_field("a", json!("overwrite")).unwrap();
        assert!(theirs.flush_pending_saves().await.is_err());
        assert_eq!(stored(&mine).await.unwrap().field("a"), Some(&json!("1")));
    }

    #[tokio::test]
    async fn section_progress_is_written_immediately() {
        let storage = Storage::in_memory(NoticeBus::default()).unwrap();
        let scheduler = manual(&storage, "ev1", "u1");

        scheduler.complete_section("Reception", true).await.unwrap();
        let draft = scheduler.complete_section("Pharmacy", false).await.unwrap();

        assert_eq!(draft.metadata.completed_sections, vec!["Reception"]);
        assert_eq!(draft.metadata.current_section.as_deref(), Some("Pharmacy"));
    }
}
