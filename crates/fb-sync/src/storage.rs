use fb_core::error::{FieldbookError, StorageError};
use fb_core::types::NoticeBody;
use fb_core::Fieldbook;
use fb_db::{DbStore, schema};
use fb_events::{Notice, NoticeBus, NoticeSource};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type LocalFieldbook = Fieldbook<DbStore>;

/// Shared async handle over the blocking SQLite stores. Every call runs on
/// the blocking pool; until a database is attached calls fail with
/// `StorageError::NotReady`.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<Mutex<Option<LocalFieldbook>>>,
    bus: NoticeBus,
}

impl Storage {
    pub fn unopened(bus: NoticeBus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            bus,
        }
    }

    pub fn open(path: impl AsRef<Path>, bus: NoticeBus) -> Result<Self, StorageError> {
        let storage = Self::unopened(bus);
        storage.attach(path)?;
        Ok(storage)
    }

    pub fn in_memory(bus: NoticeBus) -> Result<Self, StorageError> {
        let conn = schema::with_test_db().map_err(StorageError::write)?;
        let storage = Self::unopened(bus);
        storage.install(DbStore::new(conn))?;
        Ok(storage)
    }

    /// Opens (creating and migrating if needed) the database at `path`.
    pub fn attach(&self, path: impl AsRef<Path>) -> Result<(), StorageError> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let conn = schema::open_and_migrate(&path.to_string_lossy()).map_err(StorageError::write)?;
        self.install(DbStore::new(conn))
    }

    /// Closes the database; later calls fail as not ready until reattached.
    pub fn detach(&self) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().map_err(|_| poisoned())?;
        guard.take();
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().is_ok_and(|guard| guard.is_some())
    }

    pub fn bus(&self) -> &NoticeBus {
        &self.bus
    }

    pub async fn run<T, F>(&self, f: F) -> Result<T, FieldbookError>
    where
        F: FnOnce(&LocalFieldbook) -> Result<T, FieldbookError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let guard = inner.lock().map_err(|_| poisoned())?;
            let fieldbook = guard.as_ref().ok_or(StorageError::NotReady)?;
            f(fieldbook)
        })
        .await
        .map_err(|err| FieldbookError::Internal {
            message: err.to_string(),
        })?
    }

    /// Publishes a notice that is not tied to a store transaction.
    pub fn notify(&self, source: NoticeSource, body: &NoticeBody) {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.bus.publish(Notice::new(source, value));
            }
            Err(err) => tracing::warn!(error = %err, "failed to encode notice"),
        }
    }

    fn install(&self, store: DbStore) -> Result<(), StorageError> {
        let mut guard = self.inner.lock().map_err(|_| poisoned())?;
        *guard = Some(Fieldbook::new(store, self.bus.clone()));
        Ok(())
    }
}

fn poisoned() -> StorageError {
    StorageError::ReadFailure {
        message: "storage lock poisoned".to_string(),
    }
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(StorageError::write)
        }
        _ => Ok(()),
    }
}
