use fb_core::error::{FieldbookError, StorageError};
use fb_core::store::Store;
use rusqlite::Connection;

use crate::draft_repo::DraftRepo;
use crate::event_repo::EventRepo;

pub struct DbStore {
    conn: Connection,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for DbStore {
    type Drafts<'a>
        = DraftRepo<'a>
    where
        Self: 'a;
    type Events<'a>
        = EventRepo<'a>
    where
        Self: 'a;

    fn drafts(&self) -> Self::Drafts<'_> {
        DraftRepo::new(&self.conn)
    }

    fn events(&self) -> Self::Events<'_> {
        EventRepo::new(&self.conn)
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, FieldbookError>
    where
        F: FnOnce(&Self) -> Result<T, FieldbookError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(StorageError::write)?;
        let result = f(self);
        match result {
            Ok(value) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(value),
                Err(err) => {
                    // A failed COMMIT can leave the transaction open.
                    let _ = self.conn.execute_batch("ROLLBACK");
                    Err(StorageError::write(err).into())
                }
            },
            Err(err) => {
                self.conn
                    .execute_batch("ROLLBACK")
                    .map_err(StorageError::write)?;
                Err(err)
            }
        }
    }
}
