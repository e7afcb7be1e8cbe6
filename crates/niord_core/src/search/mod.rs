//! Free-text message index.
//!
//! # Responsibility
//! - Keep an FTS5 index of messages in sync with the message store.
//! - Parse user queries and return ranked message ids.
//! - Run index maintenance on a dedicated worker that owns the index.

pub mod actor;
pub mod index;
pub mod query;

pub use actor::IndexActor;
pub use index::{IndexQuery, MessageIndex, SearchHit, UpdateOutcome};
pub use query::{parse_query, ParsedQuery};

use crate::db::DbError;
use crate::repo::RepoError;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type for search APIs.
pub type SearchResult<T> = Result<T, SearchError>;

/// Search-layer error for query parsing, index storage and source reads.
#[derive(Debug)]
pub enum SearchError {
    /// User-provided query cannot be parsed.
    InvalidQuery {
        query: String,
        message: String,
    },
    Db(DbError),
    /// Reading messages from the store failed.
    Source(RepoError),
    InvalidData(String),
    /// The index worker thread could not be started.
    Spawn(std::io::Error),
    /// The index worker has stopped and no longer accepts commands.
    ActorStopped,
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery { query, message } => {
                write!(f, "invalid search query `{query}`: {message}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::Source(err) => write!(f, "message source error: {err}"),
            Self::InvalidData(message) => write!(f, "invalid index data: {message}"),
            Self::Spawn(err) => write!(f, "cannot start index worker: {err}"),
            Self::ActorStopped => write!(f, "index worker is not running"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Source(err) => Some(err),
            Self::Spawn(err) => Some(err),
            Self::InvalidQuery { .. } | Self::InvalidData(_) | Self::ActorStopped => None,
        }
    }
}

impl From<DbError> for SearchError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RepoError> for SearchError {
    fn from(value: RepoError) -> Self {
        Self::Source(value)
    }
}
