use crate::util::{decode_json, encode_json, from_rfc3339, to_rfc3339};
use chrono::{DateTime, Utc};
use fb_core::drafts::DraftRepository;
use fb_core::error::{DraftError, StorageError};
use fb_core::types::{Draft, DraftId, DraftMetadata, MetadataPatch, Owner, UserId};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::collections::BTreeMap;

const HEADER_COLUMNS: &str = "id, owner_user_id, owner_name, is_draft, completed_sections_json, current_section, submitted_at, created_at, last_updated";

pub struct DraftRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> DraftRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl DraftRepository for DraftRepo<'_> {
    fn upsert_fields(
        &self,
        id: &DraftId,
        owner: &Owner,
        fields: &[(String, Value)],
        patch: &MetadataPatch,
    ) -> Result<Draft, DraftError> {
        let now = Utc::now();
        match load_header(self.conn, id)? {
            Some(header) if header.owner.user_id != owner.user_id => {
                return Err(DraftError::OwnedByAnotherUser);
            }
            Some(mut header) => {
                header.metadata.apply(patch);
                let completed = encode_json(&header.metadata.completed_sections)
                    .map_err(StorageError::from)?;
                self.conn
                    .execute(
                        "UPDATE drafts SET owner_name = ?2, completed_sections_json = ?3, current_section = ?4, last_updated = ?5 WHERE id = ?1",
                        params![
                            id.as_str(),
                            owner.display_name,
                            completed,
                            header.metadata.current_section,
                            to_rfc3339(&now),
                        ],
                    )
                    .map_err(StorageError::write)?;
            }
            None => {
                let mut metadata = DraftMetadata::default();
                metadata.apply(patch);
                let completed =
                    encode_json(&metadata.completed_sections).map_err(StorageError::from)?;
                self.conn
                    .execute(
                        "INSERT INTO drafts (id, owner_user_id, owner_name, is_draft, completed_sections_json, current_section, submitted_at, created_at, last_updated) VALUES (?1, ?2, ?3, 1, ?4, ?5, NULL, ?6, ?6)",
                        params![
                            id.as_str(),
                            owner.user_id.as_str(),
                            owner.display_name,
                            completed,
                            metadata.current_section,
                            to_rfc3339(&now),
                        ],
                    )
                    .map_err(StorageError::write)?;
            }
        }

        let mut stmt = self
            .conn
            .prepare(
                "INSERT INTO draft_fields (draft_id, field_key, value_json, updated_at) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(draft_id, field_key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            )
            .map_err(StorageError::write)?;
        for (key, value) in fields {
            let value_json = encode_json(value).map_err(StorageError::from)?;
            stmt.execute(params![id.as_str(), key, value_json, to_rfc3339(&now)])
                .map_err(StorageError::write)?;
        }

        self.get(id)?.ok_or(DraftError::NotFound)
    }

    fn get(&self, id: &DraftId) -> Result<Option<Draft>, DraftError> {
        let Some(header) = load_header(self.conn, id)? else {
            return Ok(None);
        };
        let fields = load_fields(self.conn, &header.id)?;
        Ok(Some(header.into_draft(fields)))
    }

    fn list_for_user(&self, user_id: &UserId, only_active: bool) -> Result<Vec<Draft>, DraftError> {
        let mut sql = format!("SELECT {HEADER_COLUMNS} FROM drafts WHERE owner_user_id = ?1");
        if only_active {
            sql.push_str(" AND is_draft = 1");
        }
        sql.push_str(" ORDER BY last_updated DESC, id ASC");

        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::read)?;
        let mut rows = stmt.query([user_id.as_str()]).map_err(StorageError::read)?;
        let mut headers = Vec::new();
        while let Some(row) = rows.next().map_err(StorageError::read)? {
            headers.push(map_header_row(row)?);
        }

        let mut drafts = Vec::with_capacity(headers.len());
        for header in headers {
            let fields = load_fields(self.conn, &header.id)?;
            drafts.push(header.into_draft(fields));
        }
        Ok(drafts)
    }

    fn most_recent_for_user(&self, user_id: &UserId) -> Result<Option<Draft>, DraftError> {
        let sql = format!(
            "SELECT {HEADER_COLUMNS} FROM drafts WHERE owner_user_id = ?1 AND is_draft = 1 ORDER BY last_updated DESC, id ASC LIMIT 1"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(StorageError::read)?;
        let mut rows = stmt.query([user_id.as_str()]).map_err(StorageError::read)?;
        let Some(row) = rows.next().map_err(StorageError::read)? else {
            return Ok(None);
        };
        let header = map_header_row(row)?;
        let fields = load_fields(self.conn, &header.id)?;
        Ok(Some(header.into_draft(fields)))
    }

    fn delete(&self, id: &DraftId) -> Result<bool, DraftError> {
        self.conn
            .execute("DELETE FROM draft_fields WHERE draft_id = ?1", [id.as_str()])
            .map_err(StorageError::write)?;
        let deleted = self
            .conn
            .execute("DELETE FROM drafts WHERE id = ?1", [id.as_str()])
            .map_err(StorageError::write)?;
        Ok(deleted > 0)
    }

    fn mark_submitted(&self, id: &DraftId, at: DateTime<Utc>) -> Result<Draft, DraftError> {
        let updated = self
            .conn
            .execute(
                "UPDATE drafts SET is_draft = 0, submitted_at = ?2, last_updated = ?2 WHERE id = ?1",
                params![id.as_str(), to_rfc3339(&at)],
            )
            .map_err(StorageError::write)?;
        if updated == 0 {
            return Err(DraftError::NotFound);
        }
        self.get(id)?.ok_or(DraftError::NotFound)
    }
}

struct DraftHeader {
    id: DraftId,
    owner: Owner,
    metadata: DraftMetadata,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl DraftHeader {
    fn into_draft(self, fields: BTreeMap<String, Value>) -> Draft {
        Draft {
            id: self.id,
            owner: self.owner,
            fields,
            metadata: self.metadata,
            created_at: self.created_at,
            last_updated: self.last_updated,
        }
    }
}

fn load_header(conn: &Connection, id: &DraftId) -> Result<Option<DraftHeader>, DraftError> {
    let sql = format!("SELECT {HEADER_COLUMNS} FROM drafts WHERE id = ?1");
    let mut stmt = conn.prepare(&sql).map_err(StorageError::read)?;
    let header = stmt
        .query_row([id.as_str()], |row| Ok(map_header_row(row)))
        .optional()
        .map_err(StorageError::read)?;
    header.transpose()
}

fn load_fields(conn: &Connection, id: &DraftId) -> Result<BTreeMap<String, Value>, DraftError> {
    let mut stmt = conn
        .prepare("SELECT field_key, value_json FROM draft_fields WHERE draft_id = ?1")
        .map_err(StorageError::read)?;
    let mut rows = stmt.query([id.as_str()]).map_err(StorageError::read)?;
    let mut fields = BTreeMap::new();
    while let Some(row) = rows.next().map_err(StorageError::read)? {
        let key: String = row.get(0).map_err(StorageError::read)?;
        let value_json: String = row.get(1).map_err(StorageError::read)?;
        let value: Value = decode_json(&value_json).map_err(StorageError::from)?;
        fields.insert(key, value);
    }
    Ok(fields)
}

fn map_header_row(row: &rusqlite::Row<'_>) -> Result<DraftHeader, DraftError> {
    let id: String = row.get(0).map_err(StorageError::read)?;
    let owner_user_id: String = row.get(1).map_err(StorageError::read)?;
    let owner_name: String = row.get(2).map_err(StorageError::read)?;
    let is_draft: bool = row.get(3).map_err(StorageError::read)?;
    let completed_sections_json: String = row.get(4).map_err(StorageError::read)?;
    let current_section: Option<String> = row.get(5).map_err(StorageError::read)?;
    let submitted_at: Option<String> = row.get(6).map_err(StorageError::read)?;
    let created_at: String = row.get(7).map_err(StorageError::read)?;
    let last_updated: String = row.get(8).map_err(StorageError::read)?;

    let id = DraftId::new(id).map_err(StorageError::corrupt)?;
    let user_id = UserId::new(owner_user_id).map_err(StorageError::corrupt)?;
    let submitted_at = submitted_at
        .as_deref()
        .map(from_rfc3339)
        .transpose()
        .map_err(StorageError::from)?;

    Ok(DraftHeader {
        id,
        owner: Owner::new(user_id, owner_name),
        metadata: DraftMetadata {
            is_draft,
            completed_sections: decode_json(&completed_sections_json)
                .map_err(StorageError::from)?,
            current_section,
            submitted_at,
        },
        created_at: from_rfc3339(&created_at).map_err(StorageError::from)?,
        last_updated: from_rfc3339(&last_updated).map_err(StorageError::from)?,
    })
}
