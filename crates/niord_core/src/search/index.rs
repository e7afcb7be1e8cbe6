//! FTS5-backed message index.
//!
//! # Responsibility
//! - Mirror messages into per-language full-text documents.
//! - Track how far the store has been indexed in `index_commit`.
//! - Answer free-text queries with ranked, distinct message ids.
//!
//! # Invariants
//! - A message has at most one document per indexed language; updates
//!   delete all documents of the message before adding new ones.
//! - `index_documents` lists exactly the messages that have documents.
//! - The stored cursor is a change sequence of the store and is written in
//!   the same transaction as the documents it covers.
//! - Deleted messages, soft or hard, have no documents.

use crate::config::IndexSettings;
use crate::model::message::{Message, MessageId, MessageStatus};
use crate::repo::message_repo::{MessageChange, MessageRepository, UpdateCursor};
use crate::search::query::{parse_query, MAX_WILDCARD_EXPANSIONS};
use crate::search::{SearchError, SearchResult};
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const CURSOR_KEY: &str = "last_update";

const INDEX_SCHEMA_SQL: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS message_index USING fts5(
    message_id UNINDEXED,
    lang UNINDEXED,
    title,
    content,
    tokenize = 'unicode61 remove_diacritics 2'
);
CREATE VIRTUAL TABLE IF NOT EXISTS message_index_vocab USING fts5vocab(message_index, 'row');
CREATE TABLE IF NOT EXISTS index_documents (
    message_id TEXT PRIMARY KEY NOT NULL,
    change_seq INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS index_commit (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);";

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Free-text query against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub text: String,
    /// Restricts hits to documents of one language.
    pub lang: Option<String>,
    /// Falls back to the configured default when unset.
    pub max_hits: Option<u32>,
}

impl IndexQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: None,
            max_hits: None,
        }
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn with_max_hits(mut self, max_hits: u32) -> Self {
        self.max_hits = Some(max_hits);
        self
    }
}

/// Single ranked hit; higher scores are better matches.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub message_id: MessageId,
    pub score: f64,
}

/// Counters for one incremental update batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub fetched: usize,
    pub indexed: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl UpdateOutcome {
    pub fn processed(&self) -> usize {
        self.indexed + self.removed
    }
}

enum DocumentAction {
    Indexed,
    Removed,
}

/// Full-text index over messages, stored in its own SQLite database.
pub struct MessageIndex {
    conn: Connection,
    languages: Vec<String>,
    optimize_after: u32,
    updates_since_optimize: u32,
    default_max_hits: u32,
}

impl MessageIndex {
    /// Opens (or creates) a file-backed index.
    pub fn open(path: impl AsRef<Path>, settings: &IndexSettings) -> SearchResult<Self> {
        Self::open_with("file", || Connection::open(path), settings)
    }

    pub fn open_in_memory(settings: &IndexSettings) -> SearchResult<Self> {
        Self::open_with("memory", Connection::open_in_memory, settings)
    }

    fn open_with<F>(mode: &str, opener: F, settings: &IndexSettings) -> SearchResult<Self>
    where
        F: FnOnce() -> rusqlite::Result<Connection>,
    {
        let started_at = Instant::now();
        let conn = opener()
            .and_then(|conn| {
                conn.busy_timeout(BUSY_TIMEOUT)?;
                conn.execute_batch(INDEX_SCHEMA_SQL)?;
                Ok(conn)
            })
            .map_err(|err| {
                error!(
                    "event=index_open module=search status=error mode={mode} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                err
            })?;

        info!(
            "event=index_open module=search status=ok mode={mode} languages={} duration_ms={}",
            settings.languages.join(","),
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            conn,
            languages: settings
                .languages
                .iter()
                .map(|lang| lang.trim().to_string())
                .collect(),
            optimize_after: settings.optimize_after_updates.max(1),
            updates_since_optimize: 0,
            default_max_hits: settings.max_hits,
        })
    }

    /// Position of the last message covered by the index.
    pub fn last_cursor(&self) -> SearchResult<Option<UpdateCursor>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM index_commit WHERE key = ?1;",
                [CURSOR_KEY],
                |row| row.get(0),
            )
            .optional()?;
        value
            .map(|text| {
                serde_json::from_str(&text).map_err(|err| {
                    SearchError::InvalidData(format!("invalid index cursor `{text}`: {err}"))
                })
            })
            .transpose()
    }

    /// Moves the stored cursor; `None` makes the next update start over.
    ///
    /// Documents are kept, so re-processed messages replace their own
    /// documents instead of adding new ones.
    pub fn rewind(&mut self, cursor: Option<&UpdateCursor>) -> SearchResult<()> {
        match cursor {
            Some(cursor) => write_cursor(&self.conn, cursor),
            None => {
                self.conn
                    .execute("DELETE FROM index_commit WHERE key = ?1;", [CURSOR_KEY])?;
                Ok(())
            }
        }
    }

    /// Number of messages with documents.
    pub fn document_count(&self) -> SearchResult<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM index_documents;", [], |row| row.get(0))?;
        usize::try_from(count)
            .map_err(|_| SearchError::InvalidData(format!("negative document count {count}")))
    }

    /// Indexes up to `max_count` messages changed since the stored cursor.
    ///
    /// Returns the number of messages indexed or removed. Failures are
    /// logged: a failing document is skipped and a failing batch yields 0.
    pub fn update_index(&mut self, source: &dyn MessageRepository, max_count: u32) -> usize {
        self.update_index_outcome(source, max_count).processed()
    }

    /// Same as [`Self::update_index`], with the counters of the batch.
    ///
    /// A batch that fails as a whole reports all counters as 0; callers
    /// looping until the feed is drained stop on `fetched < max_count`.
    pub fn update_index_outcome(
        &mut self,
        source: &dyn MessageRepository,
        max_count: u32,
    ) -> UpdateOutcome {
        let started_at = Instant::now();
        match self.update_batch(source, max_count) {
            Ok(outcome) => {
                if outcome.fetched > 0 {
                    info!(
                        "event=index_update module=search status=ok fetched={} indexed={} removed={} skipped={} duration_ms={}",
                        outcome.fetched,
                        outcome.indexed,
                        outcome.removed,
                        outcome.skipped,
                        started_at.elapsed().as_millis()
                    );
                }
                outcome
            }
            Err(err) => {
                error!(
                    "event=index_update module=search status=error duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                UpdateOutcome::default()
            }
        }
    }

    /// Drops every document and the cursor, then indexes the whole store.
    pub fn recreate_index(
        &mut self,
        source: &dyn MessageRepository,
        batch_size: u32,
    ) -> SearchResult<usize> {
        let started_at = Instant::now();
        info!("event=index_recreate module=search status=start");

        {
            let tx = self.conn.transaction()?;
            tx.execute("DELETE FROM message_index;", [])?;
            tx.execute("DELETE FROM index_documents;", [])?;
            tx.execute("DELETE FROM index_commit;", [])?;
            tx.commit()?;
        }

        let batch_size = batch_size.max(1);
        let mut total = 0;
        loop {
            let outcome = self.update_batch(source, batch_size)?;
            total += outcome.indexed;
            if outcome.fetched < batch_size as usize {
                break;
            }
        }
        self.optimize()?;

        info!(
            "event=index_recreate module=search status=ok indexed={total} duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(total)
    }

    /// Removes all documents of one message.
    pub fn delete_message(&mut self, id: MessageId) -> SearchResult<()> {
        let tx = self.conn.transaction()?;
        remove_documents(&tx, &id.to_string())?;
        tx.commit()?;
        Ok(())
    }

    /// Merges index segments.
    pub fn optimize(&mut self) -> SearchResult<()> {
        let started_at = Instant::now();
        self.conn.execute(
            "INSERT INTO message_index(message_index) VALUES ('optimize');",
            [],
        )?;
        self.updates_since_optimize = 0;
        info!(
            "event=index_optimize module=search status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Runs a free-text query. Blank queries and queries that cannot match
    /// return no hits.
    pub fn search(&self, query: &IndexQuery) -> SearchResult<Vec<SearchHit>> {
        let max_hits = query.max_hits.unwrap_or(self.default_max_hits);
        let parsed = parse_query(&query.text)?;
        if parsed.is_empty() || max_hits == 0 {
            return Ok(Vec::new());
        }

        let conn = &self.conn;
        let Some(match_expr) =
            parsed.to_match_expression(&mut |pattern: &str| expand_terms(conn, pattern))?
        else {
            return Ok(Vec::new());
        };

        let lang = query
            .lang
            .as_deref()
            .map(str::trim)
            .filter(|lang| !lang.is_empty());
        // One row per document; a message may match in several languages.
        let mut stmt = self.conn.prepare(
            "SELECT message_id, bm25(message_index) AS score
             FROM message_index
             WHERE message_index MATCH ?1
               AND (?2 IS NULL OR lang = ?2)
             ORDER BY score ASC, message_id ASC;",
        )?;
        let mut rows = stmt
            .query(params![match_expr, lang])
            .map_err(|err| map_query_error(err, &query.text))?;

        let limit = usize::try_from(max_hits).unwrap_or(usize::MAX);
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|err| map_query_error(err, &query.text))?
        {
            let id_text: String = row.get(0)?;
            if !seen.insert(id_text.clone()) {
                continue;
            }
            let message_id = Uuid::parse_str(&id_text).map_err(|_| {
                SearchError::InvalidData(format!("invalid message id `{id_text}`"))
            })?;
            let rank: f64 = row.get(1)?;
            hits.push(SearchHit {
                message_id,
                score: -rank,
            });
            if hits.len() >= limit {
                break;
            }
        }
        Ok(hits)
    }

    fn update_batch(
        &mut self,
        source: &dyn MessageRepository,
        max_count: u32,
    ) -> SearchResult<UpdateOutcome> {
        let cursor = self.last_cursor()?;
        let changes = source.find_updated_messages(cursor.as_ref(), max_count)?;
        let mut outcome = UpdateOutcome {
            fetched: changes.len(),
            ..UpdateOutcome::default()
        };
        let Some(last) = changes.last() else {
            return Ok(outcome);
        };

        let mut tx = self.conn.transaction()?;
        for change in &changes {
            let savepoint = tx.savepoint()?;
            match index_change(&savepoint, change, &self.languages) {
                Ok(action) => {
                    savepoint.commit()?;
                    match action {
                        DocumentAction::Indexed => outcome.indexed += 1,
                        DocumentAction::Removed => outcome.removed += 1,
                    }
                }
                Err(err) => {
                    // Dropping the savepoint rolls back this document only.
                    warn!(
                        "event=index_document module=search status=skip message_id={} change_seq={} error={err}",
                        change.message_id, change.change_seq
                    );
                    outcome.skipped += 1;
                }
            }
        }
        write_cursor(&tx, &UpdateCursor::of(last))?;
        tx.commit()?;

        let processed = u32::try_from(outcome.processed()).unwrap_or(u32::MAX);
        self.updates_since_optimize = self.updates_since_optimize.saturating_add(processed);
        if self.updates_since_optimize >= self.optimize_after {
            self.optimize()?;
        }
        Ok(outcome)
    }
}

fn write_cursor(conn: &Connection, cursor: &UpdateCursor) -> SearchResult<()> {
    let value = serde_json::to_string(cursor)
        .map_err(|err| SearchError::InvalidData(format!("cannot encode cursor: {err}")))?;
    conn.execute(
        "INSERT INTO index_commit (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![CURSOR_KEY, value],
    )?;
    Ok(())
}

fn index_change(
    conn: &Connection,
    change: &MessageChange,
    languages: &[String],
) -> SearchResult<DocumentAction> {
    let message_id = change.message_id.to_string();
    remove_documents(conn, &message_id)?;
    let Some(message) = change
        .message
        .as_ref()
        .filter(|message| message.status != MessageStatus::Deleted)
    else {
        return Ok(DocumentAction::Removed);
    };

    for lang in languages {
        let title = message
            .desc(lang)
            .and_then(|desc| desc.title.as_deref())
            .or_else(|| message.title(lang))
            .unwrap_or_default();
        conn.execute(
            "INSERT INTO message_index (message_id, lang, title, content)
             VALUES (?1, ?2, ?3, ?4);",
            params![message_id.as_str(), lang, title, document_content(message, lang)],
        )?;
    }
    conn.execute(
        "INSERT INTO index_documents (message_id, change_seq) VALUES (?1, ?2);",
        params![message_id.as_str(), change.change_seq],
    )?;
    Ok(DocumentAction::Indexed)
}

fn remove_documents(conn: &Connection, message_id: &str) -> SearchResult<()> {
    conn.execute(
        "DELETE FROM message_index WHERE message_id = ?1;",
        [message_id],
    )?;
    conn.execute(
        "DELETE FROM index_documents WHERE message_id = ?1;",
        [message_id],
    )?;
    Ok(())
}

/// Searchable text of one message in one language.
fn document_content(message: &Message, lang: &str) -> String {
    let mut fields: Vec<String> = Vec::new();
    let mut push = |value: Option<&str>| {
        if let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) {
            fields.push(value.to_string());
        }
    };

    push(Some(message.series_id.as_str()));
    push(message.short_id.as_deref());
    push(message.mrn.as_deref());
    if let Some(desc) = message.desc(lang) {
        push(desc.title.as_deref());
        push(desc.vicinity.as_deref());
        push(desc.publication.as_deref());
        push(desc.source.as_deref());
    }
    for part in &message.parts {
        if let Some(desc) = part.desc(lang) {
            push(desc.subject.as_deref());
            push(desc.details.as_deref().map(strip_html).as_deref());
        }
    }
    for value in message
        .areas
        .iter()
        .chain(&message.categories)
        .chain(&message.charts)
        .chain(&message.aton_uids)
    {
        push(Some(value.as_str()));
    }
    for reference in &message.references {
        push(Some(reference.message_id.as_str()));
        push(reference.description.as_deref());
    }

    fields.join("\n")
}

fn strip_html(html: &str) -> String {
    HTML_TAG_RE
        .replace_all(html, " ")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn expand_terms(conn: &Connection, pattern: &str) -> SearchResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT term FROM message_index_vocab
         WHERE term LIKE ?1 ESCAPE '\\'
         ORDER BY doc DESC, term ASC
         LIMIT ?2;",
    )?;
    let limit = i64::try_from(MAX_WILDCARD_EXPANSIONS).unwrap_or(i64::MAX);
    let terms = stmt
        .query_map(params![pattern, limit], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(terms)
}

fn map_query_error(err: rusqlite::Error, query: &str) -> SearchError {
    if is_match_syntax_error(&err) {
        return SearchError::InvalidQuery {
            query: query.to_string(),
            message: err.to_string(),
        };
    }
    SearchError::from(err)
}

fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            let msg = message.to_lowercase();
            (msg.contains("fts5") && msg.contains("syntax"))
                || msg.contains("malformed match expression")
                || msg.contains("unterminated")
                || msg.contains("no such column")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_removes_tags_and_entities() {
        assert_eq!(
            strip_html("<p>Buoy&nbsp;<b>missing</b> &amp; unlit</p>").trim(),
            "Buoy  missing  & unlit"
        );
    }
}
