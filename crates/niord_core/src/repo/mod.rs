//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts for messages, series,
//!   message tags and AtoN data.
//! - Isolate SQL details from service orchestration.
//!
//! # Invariants
//! - Write paths validate domain records before SQL mutations.
//! - Read paths reject invalid persisted state instead of masking it.
//! - Repositories only accept connections migrated to `latest_version()`.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::aton::AtonValidationError;
use crate::model::message::{MessageId, MessageValidationError};
use crate::model::series::SeriesValidationError;
use rusqlite::{Connection, ErrorCode};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod aton_repo;
pub mod message_repo;
pub mod series_repo;
pub mod tag_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by all store repositories.
#[derive(Debug)]
pub enum RepoError {
    Validation(MessageValidationError),
    SeriesValidation(SeriesValidationError),
    AtonValidation(AtonValidationError),
    Db(DbError),
    MessageNotFound(MessageId),
    SeriesNotFound(String),
    TagNotFound(String),
    AtonNotFound(i64),
    LinkNotFound(Uuid),
    /// A uniqueness constraint rejected the write.
    Conflict(String),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::SeriesValidation(err) => write!(f, "{err}"),
            Self::AtonValidation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::MessageNotFound(id) => write!(f, "message not found: {id}"),
            Self::SeriesNotFound(id) => write!(f, "message series not found: {id}"),
            Self::TagNotFound(id) => write!(f, "message tag not found: {id}"),
            Self::AtonNotFound(id) => write!(f, "aton not found: {id}"),
            Self::LinkNotFound(id) => write!(f, "aton link not found: {id}"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::SeriesValidation(err) => Some(err),
            Self::AtonValidation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MessageValidationError> for RepoError {
    fn from(value: MessageValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<SeriesValidationError> for RepoError {
    fn from(value: SeriesValidationError) -> Self {
        Self::SeriesValidation(value)
    }
}

impl From<AtonValidationError> for RepoError {
    fn from(value: AtonValidationError) -> Self {
        Self::AtonValidation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

/// Maps unique/check constraint failures to `Conflict`, everything else to `Db`.
pub(crate) fn map_constraint_error(err: rusqlite::Error, context: impl Into<String>) -> RepoError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            RepoError::Conflict(format!("{}: {err}", context.into()))
        }
        _ => RepoError::from(err),
    }
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}
