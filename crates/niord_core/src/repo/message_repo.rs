//! Message repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist messages with their localized descriptions and JSON body.
//! - Serve the polling queries used by the index and the scheduler.
//! - Keep JSON history snapshots of every saved message version.
//!
//! # Invariants
//! - `start_date`/`end_date` columns are recomputed from date intervals on
//!   every write; stored values always agree with `Message::recompute_dates`.
//! - Every create, update and delete takes the next store-wide change
//!   sequence inside its own transaction. Sequences are handed out under the
//!   write lock, so they commit in ascending order.
//! - A hard delete leaves a tombstone in the change feed.
//! - Descriptions and history rows are removed together with their message.

use crate::db::NOW_MS_SQL;
use crate::model::message::{
    DateInterval, MainType, Message, MessageDesc, MessageId, MessagePart, MessageStatus,
    MessageType, Reference,
};
use crate::repo::series_repo::allocate_number;
use crate::repo::{
    bool_to_int, ensure_connection_ready, int_to_bool, map_constraint_error, parse_uuid,
    RepoError, RepoResult,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

const MESSAGE_SELECT_SQL: &str = "SELECT
    uuid,
    series_id,
    main_type,
    message_type,
    status,
    mrn,
    short_id,
    number,
    publish_date_from,
    publish_date_to,
    start_date,
    end_date,
    original_information,
    body_json,
    created_at,
    updated_at
FROM messages";

/// Position in the message change feed.
///
/// Incremental consumers resume strictly after the last change they
/// processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCursor {
    pub change_seq: i64,
}

impl UpdateCursor {
    pub fn of(change: &MessageChange) -> Self {
        Self {
            change_seq: change.change_seq,
        }
    }
}

/// Latest change of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageChange {
    pub change_seq: i64,
    pub message_id: MessageId,
    /// `None` once the message has been hard-deleted.
    pub message: Option<Message>,
}

/// Number to allocate while saving a message version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberRequest {
    pub series_id: String,
    pub year: i32,
}

/// Filter and pagination options for listing messages.
#[derive(Debug, Clone, Default)]
pub struct MessageListQuery {
    /// Empty means any status.
    pub statuses: Vec<MessageStatus>,
    pub series_id: Option<String>,
    pub main_type: Option<MainType>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// One stored snapshot of a message version.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHistory {
    pub message_id: MessageId,
    pub version: i64,
    pub status: MessageStatus,
    pub snapshot: Message,
    pub created_at: i64,
}

/// Repository interface for message persistence and polling queries.
pub trait MessageRepository {
    fn create_message(&self, message: &Message) -> RepoResult<MessageId>;
    /// Replaces all message fields and descriptions.
    fn update_message(&self, message: &Message) -> RepoResult<()>;
    fn get_message(&self, id: MessageId) -> RepoResult<Option<Message>>;
    fn get_message_by_mrn(&self, mrn: &str) -> RepoResult<Option<Message>>;
    fn list_messages(&self, query: &MessageListQuery) -> RepoResult<Vec<Message>>;
    /// Hard delete; descriptions, tag memberships and history cascade.
    fn delete_message(&self, id: MessageId) -> RepoResult<()>;
    /// Messages changed strictly after `after`, in change order.
    ///
    /// Each message appears once, at its latest change; deleted messages
    /// appear as tombstones.
    fn find_updated_messages(
        &self,
        after: Option<&UpdateCursor>,
        max_count: u32,
    ) -> RepoResult<Vec<MessageChange>>;
    /// Published messages whose date intervals or publish window have ended.
    fn find_expirable_messages(&self, now: i64) -> RepoResult<Vec<MessageId>>;
    /// Verified messages whose publish date has been reached.
    fn find_publishable_messages(&self, now: i64) -> RepoResult<Vec<MessageId>>;
    /// Creates a message and its first history version in one transaction.
    fn create_version(&self, message: &Message) -> RepoResult<Message>;
    /// Updates a message and appends its history snapshot in one
    /// transaction.
    ///
    /// With `number`, a message without a number gets the next number of
    /// that sequence first. `assign` then runs on the message before it is
    /// written. A failed write releases the allocated number.
    fn save_version(
        &self,
        message: &Message,
        number: Option<&NumberRequest>,
        assign: &dyn Fn(&mut Message),
    ) -> RepoResult<Message>;
    /// Snapshots for one message, oldest first.
    fn list_history(&self, id: MessageId) -> RepoResult<Vec<MessageHistory>>;
}

/// SQLite-backed message repository.
pub struct SqliteMessageRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteMessageRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

/// Non-indexed message fields stored as one JSON column.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MessageBody {
    #[serde(default)]
    date_intervals: Vec<DateInterval>,
    #[serde(default)]
    areas: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    charts: Vec<String>,
    #[serde(default)]
    aton_uids: Vec<String>,
    geometry: Option<String>,
    #[serde(default)]
    parts: Vec<MessagePart>,
    #[serde(default)]
    references: Vec<Reference>,
}

impl MessageBody {
    fn from_message(message: &Message) -> Self {
        Self {
            date_intervals: message.date_intervals.clone(),
            areas: message.areas.clone(),
            categories: message.categories.clone(),
            charts: message.charts.clone(),
            aton_uids: message.aton_uids.clone(),
            geometry: message.geometry.clone(),
            parts: message.parts.clone(),
            references: message.references.clone(),
        }
    }
}

impl MessageRepository for SqliteMessageRepository<'_> {
    fn create_message(&self, message: &Message) -> RepoResult<MessageId> {
        let message = prepare_for_write(message)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        insert_row(&tx, &message)?;
        tx.commit()?;

        Ok(message.id)
    }

    fn update_message(&self, message: &Message) -> RepoResult<()> {
        let message = prepare_for_write(message)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        update_row(&tx, &message)?;
        tx.commit()?;

        Ok(())
    }

    fn get_message(&self, id: MessageId) -> RepoResult<Option<Message>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MESSAGE_SELECT_SQL} WHERE uuid = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(self.load_message(row)?));
        }
        Ok(None)
    }

    fn get_message_by_mrn(&self, mrn: &str) -> RepoResult<Option<Message>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MESSAGE_SELECT_SQL} WHERE mrn = ?1;"))?;
        let mut rows = stmt.query([mrn])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(self.load_message(row)?));
        }
        Ok(None)
    }

    fn list_messages(&self, query: &MessageListQuery) -> RepoResult<Vec<Message>> {
        let mut sql = format!("{MESSAGE_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.statuses.is_empty() {
            let placeholders = vec!["?"; query.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({placeholders})"));
            bind_values.extend(
                query
                    .statuses
                    .iter()
                    .map(|status| Value::Text(status.as_str().to_string())),
            );
        }

        if let Some(series_id) = query.series_id.as_ref() {
            sql.push_str(" AND series_id = ?");
            bind_values.push(Value::Text(series_id.clone()));
        }

        if let Some(main_type) = query.main_type {
            sql.push_str(" AND main_type = ?");
            bind_values.push(Value::Text(main_type.as_str().to_string()));
        }

        sql.push_str(" ORDER BY updated_at DESC, uuid ASC");

        match (query.limit, query.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                bind_values.push(Value::Integer(i64::from(limit)));
                bind_values.push(Value::Integer(i64::from(offset)));
            }
            (None, offset) if offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                bind_values.push(Value::Integer(i64::from(offset)));
            }
            (None, _) => {}
        }

        self.query_messages(&sql, bind_values)
    }

    fn delete_message(&self, id: MessageId) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute("DELETE FROM messages WHERE uuid = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::MessageNotFound(id));
        }
        record_change(&tx, id, true)?;
        tx.commit()?;
        Ok(())
    }

    fn find_updated_messages(
        &self,
        after: Option<&UpdateCursor>,
        max_count: u32,
    ) -> RepoResult<Vec<MessageChange>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let after_seq = after.map_or(0, |cursor| cursor.change_seq);
        let mut stmt = self.conn.prepare(
            "SELECT message_uuid, change_seq, deleted
             FROM message_changes
             WHERE change_seq > ?1
             ORDER BY change_seq ASC
             LIMIT ?2;",
        )?;
        let mut rows = stmt.query(params![after_seq, i64::from(max_count)])?;
        let mut changes = Vec::new();
        while let Some(row) = rows.next()? {
            let uuid_text: String = row.get("message_uuid")?;
            let message_id = parse_uuid(&uuid_text, "message_changes.message_uuid")?;
            let deleted = int_to_bool(row.get("deleted")?, "message_changes.deleted")?;
            let message = if deleted {
                None
            } else {
                self.get_message(message_id)?
            };
            changes.push(MessageChange {
                change_seq: row.get("change_seq")?,
                message_id,
                message,
            });
        }
        Ok(changes)
    }

    fn find_expirable_messages(&self, now: i64) -> RepoResult<Vec<MessageId>> {
        self.query_ids(
            "SELECT uuid FROM messages
             WHERE status = 'published'
               AND (
                    (end_date IS NOT NULL AND end_date < ?1)
                 OR (publish_date_to IS NOT NULL AND publish_date_to <= ?1)
               )
             ORDER BY uuid ASC;",
            now,
        )
    }

    fn find_publishable_messages(&self, now: i64) -> RepoResult<Vec<MessageId>> {
        self.query_ids(
            "SELECT uuid FROM messages
             WHERE status = 'verified'
               AND publish_date_from IS NOT NULL
               AND publish_date_from <= ?1
             ORDER BY publish_date_from ASC, uuid ASC;",
            now,
        )
    }

    fn create_version(&self, message: &Message) -> RepoResult<Message> {
        let message = prepare_for_write(message)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        insert_row(&tx, &message)?;
        let stored = self.stored_message(message.id)?;
        insert_history(&tx, &stored)?;
        tx.commit()?;

        Ok(stored)
    }

    fn save_version(
        &self,
        message: &Message,
        number: Option<&NumberRequest>,
        assign: &dyn Fn(&mut Message),
    ) -> RepoResult<Message> {
        let mut next = message.clone();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if let Some(request) = number {
            if next.number.is_none() {
                next.number = Some(allocate_number(&tx, &request.series_id, request.year)?);
            }
        }
        assign(&mut next);
        let next = prepare_for_write(&next)?;
        update_row(&tx, &next)?;
        let stored = self.stored_message(next.id)?;
        insert_history(&tx, &stored)?;
        tx.commit()?;

        Ok(stored)
    }

    fn list_history(&self, id: MessageId) -> RepoResult<Vec<MessageHistory>> {
        let mut stmt = self.conn.prepare(
            "SELECT version, status, snapshot_json, created_at
             FROM message_history
             WHERE message_uuid = ?1
             ORDER BY version ASC;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        let mut history = Vec::new();
        while let Some(row) = rows.next()? {
            let status_text: String = row.get("status")?;
            let snapshot_text: String = row.get("snapshot_json")?;
            let snapshot = serde_json::from_str(&snapshot_text).map_err(|err| {
                RepoError::InvalidData(format!("invalid history snapshot for {id}: {err}"))
            })?;
            history.push(MessageHistory {
                message_id: id,
                version: row.get("version")?,
                status: parse_status(&status_text)?,
                snapshot,
                created_at: row.get("created_at")?,
            });
        }
        Ok(history)
    }
}

impl SqliteMessageRepository<'_> {
    fn query_messages(&self, sql: &str, bind_values: Vec<Value>) -> RepoResult<Vec<Message>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(self.load_message(row)?);
        }
        Ok(messages)
    }

    fn query_ids(&self, sql: &str, now: i64) -> RepoResult<Vec<MessageId>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([now])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let uuid_text: String = row.get(0)?;
            ids.push(parse_uuid(&uuid_text, "messages.uuid")?);
        }
        Ok(ids)
    }

    /// Reads a message on the repository connection, which also sees the
    /// uncommitted writes of an open transaction.
    fn stored_message(&self, id: MessageId) -> RepoResult<Message> {
        self.get_message(id)?.ok_or(RepoError::MessageNotFound(id))
    }

    fn load_message(&self, row: &Row<'_>) -> RepoResult<Message> {
        let mut message = parse_message_row(row)?;
        message.descs = load_descs(self.conn, &message.id.to_string())?;
        message.validate()?;
        Ok(message)
    }
}

fn prepare_for_write(message: &Message) -> RepoResult<Message> {
    message.validate()?;
    let mut prepared = message.clone();
    prepared.recompute_dates();
    Ok(prepared)
}

fn encode_body(message: &Message) -> RepoResult<String> {
    serde_json::to_string(&MessageBody::from_message(message)).map_err(|err| {
        RepoError::InvalidData(format!("cannot encode message {} body: {err}", message.id))
    })
}

fn insert_row(conn: &Connection, message: &Message) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO messages (
            uuid,
            series_id,
            main_type,
            message_type,
            status,
            mrn,
            short_id,
            number,
            publish_date_from,
            publish_date_to,
            start_date,
            end_date,
            original_information,
            body_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14);",
        params![
            message.id.to_string(),
            message.series_id.as_str(),
            message.main_type.as_str(),
            message.message_type.as_str(),
            message.status.as_str(),
            message.mrn.as_deref(),
            message.short_id.as_deref(),
            message.number,
            message.publish_date_from,
            message.publish_date_to,
            message.start_date,
            message.end_date,
            bool_to_int(message.original_information),
            encode_body(message)?,
        ],
    )
    .map_err(|err| map_constraint_error(err, format!("message {}", message.id)))?;
    insert_descs(conn, message)?;
    record_change(conn, message.id, false)
}

fn update_row(conn: &Connection, message: &Message) -> RepoResult<()> {
    let changed = conn
        .execute(
            &format!(
                "UPDATE messages
                 SET
                    series_id = ?2,
                    main_type = ?3,
                    message_type = ?4,
                    status = ?5,
                    mrn = ?6,
                    short_id = ?7,
                    number = ?8,
                    publish_date_from = ?9,
                    publish_date_to = ?10,
                    start_date = ?11,
                    end_date = ?12,
                    original_information = ?13,
                    body_json = ?14,
                    updated_at = MAX(updated_at + 1, {NOW_MS_SQL})
                 WHERE uuid = ?1;"
            ),
            params![
                message.id.to_string(),
                message.series_id.as_str(),
                message.main_type.as_str(),
                message.message_type.as_str(),
                message.status.as_str(),
                message.mrn.as_deref(),
                message.short_id.as_deref(),
                message.number,
                message.publish_date_from,
                message.publish_date_to,
                message.start_date,
                message.end_date,
                bool_to_int(message.original_information),
                encode_body(message)?,
            ],
        )
        .map_err(|err| map_constraint_error(err, format!("message {}", message.id)))?;
    if changed == 0 {
        return Err(RepoError::MessageNotFound(message.id));
    }

    conn.execute(
        "DELETE FROM message_descs WHERE message_uuid = ?1;",
        [message.id.to_string()],
    )?;
    insert_descs(conn, message)?;
    record_change(conn, message.id, false)
}

/// Moves `id` to the head of the change feed.
fn record_change(conn: &Connection, id: MessageId, deleted: bool) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO message_changes (message_uuid, change_seq, deleted)
         VALUES (?1, (SELECT COALESCE(MAX(change_seq), 0) + 1 FROM message_changes), ?2)
         ON CONFLICT (message_uuid) DO UPDATE SET
            change_seq = excluded.change_seq,
            deleted = excluded.deleted;",
        params![id.to_string(), bool_to_int(deleted)],
    )?;
    Ok(())
}

fn insert_history(conn: &Connection, message: &Message) -> RepoResult<i64> {
    let snapshot = serde_json::to_string(message).map_err(|err| {
        RepoError::InvalidData(format!("cannot encode message {} snapshot: {err}", message.id))
    })?;
    let version: i64 = conn.query_row(
        "INSERT INTO message_history (message_uuid, version, status, snapshot_json)
         VALUES (
            ?1,
            (SELECT COALESCE(MAX(version), 0) + 1 FROM message_history WHERE message_uuid = ?1),
            ?2,
            ?3
         )
         RETURNING version;",
        params![message.id.to_string(), message.status.as_str(), snapshot],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn insert_descs(conn: &Connection, message: &Message) -> RepoResult<()> {
    let message_uuid = message.id.to_string();
    for desc in &message.descs {
        conn.execute(
            "INSERT INTO message_descs (message_uuid, lang, title, vicinity, publication, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                message_uuid.as_str(),
                desc.lang.trim(),
                desc.title.as_deref(),
                desc.vicinity.as_deref(),
                desc.publication.as_deref(),
                desc.source.as_deref(),
            ],
        )?;
    }
    Ok(())
}

fn load_descs(conn: &Connection, message_uuid: &str) -> RepoResult<Vec<MessageDesc>> {
    let mut stmt = conn.prepare(
        "SELECT lang, title, vicinity, publication, source
         FROM message_descs
         WHERE message_uuid = ?1
         ORDER BY rowid ASC;",
    )?;
    let mut rows = stmt.query([message_uuid])?;
    let mut descs = Vec::new();
    while let Some(row) = rows.next()? {
        descs.push(MessageDesc {
            lang: row.get("lang")?,
            title: row.get("title")?,
            vicinity: row.get("vicinity")?,
            publication: row.get("publication")?,
            source: row.get("source")?,
        });
    }
    Ok(descs)
}

fn parse_message_row(row: &Row<'_>) -> RepoResult<Message> {
    let uuid_text: String = row.get("uuid")?;
    let id = parse_uuid(&uuid_text, "messages.uuid")?;

    let main_type_text: String = row.get("main_type")?;
    let main_type = MainType::parse(&main_type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid main type `{main_type_text}` in messages.main_type"))
    })?;

    let type_text: String = row.get("message_type")?;
    let message_type = MessageType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid message type `{type_text}` in messages.message_type"))
    })?;

    let status_text: String = row.get("status")?;
    let status = parse_status(&status_text)?;

    let body_text: String = row.get("body_json")?;
    let body: MessageBody = serde_json::from_str(&body_text).map_err(|err| {
        RepoError::InvalidData(format!("invalid body_json for message {id}: {err}"))
    })?;

    Ok(Message {
        id,
        series_id: row.get("series_id")?,
        main_type,
        message_type,
        status,
        mrn: row.get("mrn")?,
        short_id: row.get("short_id")?,
        number: row.get("number")?,
        publish_date_from: row.get("publish_date_from")?,
        publish_date_to: row.get("publish_date_to")?,
        date_intervals: body.date_intervals,
        start_date: row.get("start_date")?,
        end_date: row.get("end_date")?,
        areas: body.areas,
        categories: body.categories,
        charts: body.charts,
        aton_uids: body.aton_uids,
        geometry: body.geometry,
        descs: Vec::new(),
        parts: body.parts,
        references: body.references,
        original_information: int_to_bool(
            row.get("original_information")?,
            "messages.original_information",
        )?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_status(value: &str) -> RepoResult<MessageStatus> {
    MessageStatus::parse(value)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid message status `{value}`")))
}
