use crate::util::{
    decode_enum, decode_json, encode_enum, encode_json, from_date, from_rfc3339, to_date,
    to_rfc3339,
};
use fb_core::error::{EventError, StorageError};
use fb_core::events::EventRepository;
use fb_core::types::{EventFilter, EventId, EventRecord, EventStats, EventStatus};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};

const EVENT_COLUMNS: &str = "id, program_id, container_id, stage_id, event_date, status, data_values_json, linked_entity_id, server_id, created_at, updated_at, synced_at, sync_error";

pub struct EventRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> EventRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl EventRepository for EventRepo<'_> {
    fn insert(&self, event: &EventRecord) -> Result<(), EventError> {
        let sql = format!(
            "INSERT INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        );
        self.conn
            .execute(&sql, event_params(event)?)
            .map_err(|err| match err.sqlite_error_code() {
                Some(rusqlite::ErrorCode::ConstraintViolation) => EventError::AlreadyExists {
                    id: event.id.to_string(),
                },
                _ => StorageError::write(err).into(),
            })?;
        Ok(())
    }

    fn get(&self, id: &EventId) -> Result<Option<EventRecord>, EventError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::read)?;
        let mut rows = stmt.query([id.as_str()]).map_err(StorageError::read)?;
        let Some(row) = rows.next().map_err(StorageError::read)? else {
            return Ok(None);
        };
        Ok(Some(map_event_row(row)?))
    }

    fn list(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, EventError> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events");
        let mut clauses = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(status) = filter.status {
            values.push(SqlValue::Text(
                encode_enum(&status).map_err(StorageError::from)?,
            ));
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(container_id) = &filter.container_id {
            values.push(SqlValue::Text(container_id.clone()));
            clauses.push(format!("container_id = ?{}", values.len()));
        }
        if let Some(from) = filter.date_from {
            values.push(SqlValue::Text(to_date(&from)));
            clauses.push(format!("event_date >= ?{}", values.len()));
        }
        if let Some(to) = filter.date_to {
            values.push(SqlValue::Text(to_date(&to)));
            clauses.push(format!("event_date <= ?{}", values.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC");

        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::read)?;
        let mut rows = stmt
            .query(params_from_iter(values))
            .map_err(StorageError::read)?;
        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(StorageError::read)? {
            events.push(map_event_row(row)?);
        }
        Ok(events)
    }

    fn replace(&self, event: &EventRecord) -> Result<(), EventError> {
        let sql = "UPDATE events SET program_id = ?2, container_id = ?3, stage_id = ?4, event_date = ?5, status = ?6, data_values_json = ?7, linked_entity_id = ?8, server_id = ?9, created_at = ?10, updated_at = ?11, synced_at = ?12, sync_error = ?13 WHERE id = ?1";
        let updated = self
            .conn
            .execute(sql, event_params(event)?)
            .map_err(StorageError::write)?;
        if updated == 0 {
            return Err(EventError::NotFound);
        }
        Ok(())
    }

    fn delete(&self, id: &EventId) -> Result<bool, EventError> {
        let deleted = self
            .conn
            .execute("DELETE FROM events WHERE id = ?1", [id.as_str()])
            .map_err(StorageError::write)?;
        Ok(deleted > 0)
    }

    fn delete_with_status(&self, status: EventStatus) -> Result<u64, EventError> {
        let status = encode_enum(&status).map_err(StorageError::from)?;
        let deleted = self
            .conn
            .execute("DELETE FROM events WHERE status = ?1", [status])
            .map_err(StorageError::write)?;
        Ok(deleted as u64)
    }

    fn stats(&self) -> Result<EventStats, EventError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM events GROUP BY status")
            .map_err(StorageError::read)?;
        let mut rows = stmt.query([]).map_err(StorageError::read)?;
        let mut stats = EventStats::default();
        while let Some(row) = rows.next().map_err(StorageError::read)? {
            let status: String = row.get(0).map_err(StorageError::read)?;
            let count: i64 = row.get(1).map_err(StorageError::read)?;
            let status: EventStatus = decode_enum(&status).map_err(StorageError::from)?;
            stats.record(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(stats)
    }
}

type EventParams = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    Option<String>,
);

fn event_params(event: &EventRecord) -> Result<EventParams, EventError> {
    Ok((
        event.id.to_string(),
        event.program_id.clone(),
        event.container_id.clone(),
        event.stage_id.clone(),
        to_date(&event.event_date),
        encode_enum(&event.status).map_err(StorageError::from)?,
        encode_json(&event.data_values).map_err(StorageError::from)?,
        event.linked_entity_id.clone(),
        event.server_id.clone(),
        to_rfc3339(&event.created_at),
        to_rfc3339(&event.updated_at),
        event.synced_at.as_ref().map(to_rfc3339),
        event.sync_error.clone(),
    ))
}

fn map_event_row(row: &rusqlite::Row<'_>) -> Result<EventRecord, EventError> {
    let id: String = row.get(0).map_err(StorageError::read)?;
    let program_id: String = row.get(1).map_err(StorageError::read)?;
    let container_id: String = row.get(2).map_err(StorageError::read)?;
    let stage_id: String = row.get(3).map_err(StorageError::read)?;
    let event_date: String = row.get(4).map_err(StorageError::read)?;
    let status: String = row.get(5).map_err(StorageError::read)?;
    let data_values_json: String = row.get(6).map_err(StorageError::read)?;
    let linked_entity_id: Option<String> = row.get(7).map_err(StorageError::read)?;
    let server_id: Option<String> = row.get(8).map_err(StorageError::read)?;
    let created_at: String = row.get(9).map_err(StorageError::read)?;
    let updated_at: String = row.get(10).map_err(StorageError::read)?;
    let synced_at: Option<String> = row.get(11).map_err(StorageError::read)?;
    let sync_error: Option<String> = row.get(12).map_err(StorageError::read)?;

    Ok(EventRecord {
        id: EventId::new(id).map_err(StorageError::corrupt)?,
        program_id,
        container_id,
        stage_id,
        event_date: from_date(&event_date).map_err(StorageError::from)?,
        status: decode_enum(&status).map_err(StorageError::from)?,
        data_values: decode_json(&data_values_json).map_err(StorageError::from)?,
        linked_entity_id,
        server_id,
        created_at: from_rfc3339(&created_at).map_err(StorageError::from)?,
        updated_at: from_rfc3339(&updated_at).map_err(StorageError::from)?,
        synced_at: synced_at
            .as_deref()
            .map(from_rfc3339)
            .transpose()
            .map_err(StorageError::from)?,
        sync_error,
    })
}
