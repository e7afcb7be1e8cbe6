//! Message tag repository.
//!
//! A message tag is a named, optionally expiring collection of messages
//! used by editors to group work in progress.
//!
//! # Invariants
//! - `set_tag_messages` replaces the whole member set in one transaction.
//! - Member lists are returned in `message_uuid` order.
//! - Tag ids are trimmed and non-blank.

use crate::model::message::MessageId;
use crate::repo::{ensure_connection_ready, map_constraint_error, parse_uuid, RepoError, RepoResult};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTag {
    pub tag_id: String,
    pub name: String,
    /// Epoch milliseconds after which the tag may be purged.
    pub expiry_date: Option<i64>,
    pub message_ids: Vec<MessageId>,
}

impl MessageTag {
    pub fn new(tag_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tag_id: tag_id.into(),
            name: name.into(),
            expiry_date: None,
            message_ids: Vec::new(),
        }
    }
}

pub trait MessageTagRepository {
    /// Creates an empty tag. Members on the input are ignored.
    fn create_tag(&self, tag: &MessageTag) -> RepoResult<()>;
    fn get_tag(&self, tag_id: &str) -> RepoResult<Option<MessageTag>>;
    fn list_tags(&self) -> RepoResult<Vec<MessageTag>>;
    fn delete_tag(&self, tag_id: &str) -> RepoResult<()>;
    /// Replaces all members of the tag.
    fn set_tag_messages(&self, tag_id: &str, message_ids: &[MessageId]) -> RepoResult<()>;
    fn add_messages(&self, tag_id: &str, message_ids: &[MessageId]) -> RepoResult<()>;
    fn remove_messages(&self, tag_id: &str, message_ids: &[MessageId]) -> RepoResult<()>;
    /// Tag ids containing the message, sorted.
    fn tags_for_message(&self, message_id: MessageId) -> RepoResult<Vec<String>>;
    /// Deletes tags whose expiry date is before `now`; returns the count.
    fn delete_expired_tags(&self, now: i64) -> RepoResult<usize>;
}

pub struct SqliteTagRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTagRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl MessageTagRepository for SqliteTagRepository<'_> {
    fn create_tag(&self, tag: &MessageTag) -> RepoResult<()> {
        let tag_id = tag.tag_id.trim();
        if tag_id.is_empty() {
            return Err(RepoError::InvalidData("tag id must not be blank".to_string()));
        }
        self.conn
            .execute(
                "INSERT INTO message_tags (tag_id, name, expiry_date) VALUES (?1, ?2, ?3);",
                params![tag_id, tag.name.trim(), tag.expiry_date],
            )
            .map_err(|err| map_constraint_error(err, format!("tag {tag_id}")))?;
        Ok(())
    }

    fn get_tag(&self, tag_id: &str) -> RepoResult<Option<MessageTag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag_id, name, expiry_date FROM message_tags WHERE tag_id = ?1;")?;
        let mut rows = stmt.query([tag_id])?;
        if let Some(row) = rows.next()? {
            let tag_id: String = row.get("tag_id")?;
            let message_ids = load_members(self.conn, &tag_id)?;
            return Ok(Some(MessageTag {
                tag_id,
                name: row.get("name")?,
                expiry_date: row.get("expiry_date")?,
                message_ids,
            }));
        }
        Ok(None)
    }

    fn list_tags(&self) -> RepoResult<Vec<MessageTag>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag_id, name, expiry_date FROM message_tags ORDER BY name COLLATE NOCASE ASC, tag_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next()? {
            let tag_id: String = row.get("tag_id")?;
            let message_ids = load_members(self.conn, &tag_id)?;
            tags.push(MessageTag {
                tag_id,
                name: row.get("name")?,
                expiry_date: row.get("expiry_date")?,
                message_ids,
            });
        }
        Ok(tags)
    }

    fn delete_tag(&self, tag_id: &str) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM message_tags WHERE tag_id = ?1;", [tag_id])?;
        if changed == 0 {
            return Err(RepoError::TagNotFound(tag_id.to_string()));
        }
        Ok(())
    }

    fn set_tag_messages(&self, tag_id: &str, message_ids: &[MessageId]) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_tag_exists(&tx, tag_id)?;
        tx.execute("DELETE FROM message_tag_members WHERE tag_id = ?1;", [tag_id])?;
        insert_members(&tx, tag_id, message_ids)?;
        tx.commit()?;
        Ok(())
    }

    fn add_messages(&self, tag_id: &str, message_ids: &[MessageId]) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_tag_exists(&tx, tag_id)?;
        insert_members(&tx, tag_id, message_ids)?;
        tx.commit()?;
        Ok(())
    }

    fn remove_messages(&self, tag_id: &str, message_ids: &[MessageId]) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        ensure_tag_exists(&tx, tag_id)?;
        for message_id in message_ids {
            tx.execute(
                "DELETE FROM message_tag_members WHERE tag_id = ?1 AND message_uuid = ?2;",
                params![tag_id, message_id.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn tags_for_message(&self, message_id: MessageId) -> RepoResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag_id FROM message_tag_members WHERE message_uuid = ?1 ORDER BY tag_id ASC;",
        )?;
        let mut rows = stmt.query([message_id.to_string()])?;
        let mut tag_ids = Vec::new();
        while let Some(row) = rows.next()? {
            tag_ids.push(row.get(0)?);
        }
        Ok(tag_ids)
    }

    fn delete_expired_tags(&self, now: i64) -> RepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM message_tags WHERE expiry_date IS NOT NULL AND expiry_date < ?1;",
            [now],
        )?;
        Ok(deleted)
    }
}

fn ensure_tag_exists(tx: &Transaction<'_>, tag_id: &str) -> RepoResult<()> {
    let exists: i64 = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM message_tags WHERE tag_id = ?1);",
        [tag_id],
        |row| row.get(0),
    )?;
    if exists != 1 {
        return Err(RepoError::TagNotFound(tag_id.to_string()));
    }
    Ok(())
}

fn insert_members(tx: &Transaction<'_>, tag_id: &str, message_ids: &[MessageId]) -> RepoResult<()> {
    let unique: BTreeSet<MessageId> = message_ids.iter().copied().collect();
    for message_id in unique {
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO message_tag_members (tag_id, message_uuid)
                 SELECT ?1, uuid FROM messages WHERE uuid = ?2;",
                params![tag_id, message_id.to_string()],
            )?;
        if inserted == 0 && !message_exists(tx, message_id)? {
            return Err(RepoError::MessageNotFound(message_id));
        }
    }
    Ok(())
}

fn message_exists(tx: &Transaction<'_>, message_id: MessageId) -> RepoResult<bool> {
    let exists: i64 = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE uuid = ?1);",
        [message_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn load_members(conn: &Connection, tag_id: &str) -> RepoResult<Vec<MessageId>> {
    let mut stmt = conn.prepare(
        "SELECT message_uuid FROM message_tag_members WHERE tag_id = ?1 ORDER BY message_uuid ASC;",
    )?;
    let mut rows = stmt.query([tag_id])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        ids.push(parse_uuid(&value, "message_tag_members.message_uuid")?);
    }
    Ok(ids)
}
