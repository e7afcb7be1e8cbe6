//! Message use-case service.
//!
//! # Responsibility
//! - Validate messages against their series before persisting them.
//! - Drive the status lifecycle, including publication numbering.
//! - Record a history snapshot for every saved change.
//!
//! # Invariants
//! - Status changes only follow `MessageStatus::can_transition_to`.
//! - A published message has a publish start no later than its
//!   publication time, and an MRN derived from its series.
//! - Number allocation, the row write and the history snapshot of one
//!   change commit together.
//! - Plain updates never change the stored status.

use crate::model::message::{MainType, Message, MessageId, MessageStatus};
use crate::model::series::{format_identifier, uses_number, IdentifierContext, NumberSequenceType};
use crate::repo::message_repo::{MessageHistory, MessageRepository, NumberRequest};
use crate::repo::series_repo::SeriesRepository;
use crate::repo::RepoError;
use chrono::{Datelike, TimeZone, Utc};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Service error for message use-cases.
#[derive(Debug)]
pub enum ServiceError {
    MessageNotFound(MessageId),
    SeriesNotFound(String),
    /// Message and series disagree on NW/NM.
    MainTypeMismatch {
        series_id: String,
        series_main_type: MainType,
        message_main_type: MainType,
    },
    InvalidTransition {
        id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },
    /// The series formats need a number the message does not have.
    MissingNumber {
        id: MessageId,
        series_id: String,
    },
    /// A background worker thread could not be started.
    Spawn(std::io::Error),
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MessageNotFound(id) => write!(f, "message not found: {id}"),
            Self::SeriesNotFound(id) => write!(f, "message series not found: {id}"),
            Self::MainTypeMismatch {
                series_id,
                series_main_type,
                message_main_type,
            } => write!(
                f,
                "series {series_id} holds {} messages, got {}",
                series_main_type.as_str(),
                message_main_type.as_str()
            ),
            Self::InvalidTransition { id, from, to } => write!(
                f,
                "message {id} cannot change status from {} to {}",
                from.as_str(),
                to.as_str()
            ),
            Self::MissingNumber { id, series_id } => write!(
                f,
                "message {id} needs a number to publish in series {series_id}"
            ),
            Self::Spawn(err) => write!(f, "cannot start worker: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::MessageNotFound(id) => Self::MessageNotFound(id),
            RepoError::SeriesNotFound(id) => Self::SeriesNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Message service facade over repository implementations.
pub struct MessageService<R: MessageRepository, S: SeriesRepository> {
    messages: R,
    series: S,
}

impl<R: MessageRepository, S: SeriesRepository> MessageService<R, S> {
    pub fn new(messages: R, series: S) -> Self {
        Self { messages, series }
    }

    pub fn messages(&self) -> &R {
        &self.messages
    }

    pub fn series(&self) -> &S {
        &self.series
    }

    /// Creates a message and records its first history version.
    ///
    /// # Errors
    /// - `SeriesNotFound` when the series does not exist.
    /// - `MainTypeMismatch` when the message type belongs to the other
    ///   main type.
    pub fn create_message(&self, message: &Message) -> ServiceResult<Message> {
        self.check_series(message)?;
        let stored = self.messages.create_version(message)?;
        info!(
            "event=message_create module=service status=ok message_id={} series={}",
            stored.id, stored.series_id
        );
        Ok(stored)
    }

    /// Replaces message content. The stored status is kept; use
    /// [`Self::update_status`] to change it.
    pub fn update_message(&self, message: &Message) -> ServiceResult<Message> {
        let current = self.get_message(message.id)?;
        self.check_series(message)?;

        let mut next = message.clone();
        next.status = current.status;
        self.save(&next)
    }

    pub fn get_message(&self, id: MessageId) -> ServiceResult<Message> {
        self.messages
            .get_message(id)?
            .ok_or(ServiceError::MessageNotFound(id))
    }

    /// Moves a message to `status` at time `now` (epoch ms).
    ///
    /// Publishing assigns number, MRN and short id from the series when
    /// missing. Expiring and cancelling close the publish window at `now`.
    /// Setting the current status again is a no-op.
    ///
    /// # Errors
    /// - `InvalidTransition` when the lifecycle forbids the change.
    /// - `MissingNumber` when publishing an unnumbered message of a manual
    ///   or unnumbered series whose formats expand `${number}`.
    pub fn update_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        now: i64,
    ) -> ServiceResult<Message> {
        let current = self.get_message(id)?;
        if current.status == status {
            return Ok(current);
        }
        if !current.status.can_transition_to(status) {
            return Err(ServiceError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }

        let mut next = current.clone();
        next.status = status;
        let saved = match status {
            MessageStatus::Published => self.save_publication(next, now)?,
            MessageStatus::Expired | MessageStatus::Cancelled => {
                if next.publish_date_to.map_or(true, |to| to > now) {
                    // Never end the window before it started.
                    let start = next.publish_date_from.unwrap_or(now);
                    next.publish_date_to = Some(now.max(start));
                }
                self.save(&next)?
            }
            _ => self.save(&next)?,
        };
        info!(
            "event=message_status module=service status=ok message_id={id} from={} to={}",
            current.status.as_str(),
            status.as_str()
        );
        Ok(saved)
    }

    pub fn publish(&self, id: MessageId, now: i64) -> ServiceResult<Message> {
        self.update_status(id, MessageStatus::Published, now)
    }

    pub fn expire(&self, id: MessageId, now: i64) -> ServiceResult<Message> {
        self.update_status(id, MessageStatus::Expired, now)
    }

    pub fn cancel(&self, id: MessageId, now: i64) -> ServiceResult<Message> {
        self.update_status(id, MessageStatus::Cancelled, now)
    }

    /// History snapshots of one message, oldest first.
    pub fn history(&self, id: MessageId) -> ServiceResult<Vec<MessageHistory>> {
        Ok(self.messages.list_history(id)?)
    }

    fn save(&self, message: &Message) -> ServiceResult<Message> {
        Ok(self.messages.save_version(message, None, &|_: &mut Message| {})?)
    }

    fn check_series(&self, message: &Message) -> ServiceResult<()> {
        let series = self
            .series
            .get_series(&message.series_id)?
            .ok_or_else(|| ServiceError::SeriesNotFound(message.series_id.clone()))?;
        if series.main_type != message.main_type {
            return Err(ServiceError::MainTypeMismatch {
                series_id: series.series_id,
                series_main_type: series.main_type,
                message_main_type: message.main_type,
            });
        }
        Ok(())
    }

    fn save_publication(&self, mut message: Message, now: i64) -> ServiceResult<Message> {
        let series = self
            .series
            .get_series(&message.series_id)?
            .ok_or_else(|| ServiceError::SeriesNotFound(message.series_id.clone()))?;

        if message.publish_date_from.map_or(true, |from| from > now) {
            message.publish_date_from = Some(now);
        }
        let year = year_of(message.publish_date_from.unwrap_or(now));

        let numbered = matches!(
            series.number_sequence_type,
            NumberSequenceType::Yearly | NumberSequenceType::Continuous
        );
        if message.number.is_none() && !numbered {
            let mrn_needs_number = message.mrn.is_none() && uses_number(&series.mrn_format);
            let short_needs_number = message.short_id.is_none()
                && series.short_format.as_deref().is_some_and(uses_number);
            if mrn_needs_number || short_needs_number {
                return Err(ServiceError::MissingNumber {
                    id: message.id,
                    series_id: series.series_id,
                });
            }
        }

        let request = numbered.then(|| NumberRequest {
            series_id: series.series_id.clone(),
            year,
        });
        let assign = |message: &mut Message| {
            let ctx = IdentifierContext {
                series_id: &series.series_id,
                main_type: series.main_type,
                message_id: message.id,
                year,
                number: message.number,
            };
            if message.mrn.is_none() {
                message.mrn = Some(format_identifier(&series.mrn_format, &ctx));
            }
            if message.short_id.is_none() {
                message.short_id = series
                    .short_format
                    .as_deref()
                    .map(|format| format_identifier(format, &ctx));
            }
        };
        Ok(self
            .messages
            .save_version(&message, request.as_ref(), &assign)?)
    }
}

/// Calendar year (UTC) of an epoch-millisecond timestamp.
fn year_of(epoch_ms: i64) -> i32 {
    Utc.timestamp_millis_opt(epoch_ms)
        .single()
        .map(|date| date.year())
        .unwrap_or_else(|| Utc::now().year())
}
