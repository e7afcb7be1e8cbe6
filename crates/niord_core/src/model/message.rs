//! Message domain model.
//!
//! # Responsibility
//! - Define NM/NW messages with their localized descriptions, parts,
//!   references and date intervals.
//! - Own the status state machine and derived date computation.
//!
//! # Invariants
//! - `start_date`/`end_date` are derived from `date_intervals` by
//!   `recompute_dates()` and never edited directly.
//! - `message_type.main_type() == main_type`.
//! - Description languages are non-blank and unique per message.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a message.
pub type MessageId = Uuid;

/// Top-level message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MainType {
    /// Navigational warning.
    Nw,
    /// Notice to mariners.
    Nm,
}

impl MainType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nw => "nw",
            Self::Nm => "nm",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nw" => Some(Self::Nw),
            "nm" => Some(Self::Nm),
            _ => None,
        }
    }
}

/// Concrete message sub-type. Each variant belongs to exactly one [`MainType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    TemporaryNotice,
    PreliminaryNotice,
    PermanentNotice,
    MiscellaneousNotice,
    LocalWarning,
    CoastalWarning,
    SubareaWarning,
    NavareaWarning,
}

impl MessageType {
    pub fn main_type(self) -> MainType {
        match self {
            Self::TemporaryNotice
            | Self::PreliminaryNotice
            | Self::PermanentNotice
            | Self::MiscellaneousNotice => MainType::Nm,
            Self::LocalWarning
            | Self::CoastalWarning
            | Self::SubareaWarning
            | Self::NavareaWarning => MainType::Nw,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TemporaryNotice => "temporary_notice",
            Self::PreliminaryNotice => "preliminary_notice",
            Self::PermanentNotice => "permanent_notice",
            Self::MiscellaneousNotice => "miscellaneous_notice",
            Self::LocalWarning => "local_warning",
            Self::CoastalWarning => "coastal_warning",
            Self::SubareaWarning => "subarea_warning",
            Self::NavareaWarning => "navarea_warning",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "temporary_notice" => Some(Self::TemporaryNotice),
            "preliminary_notice" => Some(Self::PreliminaryNotice),
            "permanent_notice" => Some(Self::PermanentNotice),
            "miscellaneous_notice" => Some(Self::MiscellaneousNotice),
            "local_warning" => Some(Self::LocalWarning),
            "coastal_warning" => Some(Self::CoastalWarning),
            "subarea_warning" => Some(Self::SubareaWarning),
            "navarea_warning" => Some(Self::NavareaWarning),
            _ => None,
        }
    }
}

/// Message lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Draft,
    Verified,
    Published,
    Expired,
    Cancelled,
    Imported,
    Deleted,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Verified => "verified",
            Self::Published => "published",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Imported => "imported",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "verified" => Some(Self::Verified),
            "published" => Some(Self::Published),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            "imported" => Some(Self::Imported),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Returns whether a message in this status may move to `next`.
    ///
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Draft, Verified | Published | Deleted)
                | (Verified, Draft | Published | Deleted)
                | (Imported, Draft | Published | Expired | Cancelled | Deleted)
                | (Published, Expired | Cancelled)
                | (Deleted, Draft)
        )
    }

    /// Statuses visible to the public (published or historical).
    pub fn is_public(self) -> bool {
        matches!(self, Self::Published | Self::Expired | Self::Cancelled)
    }
}

/// Active period of a message, in epoch milliseconds. Either end may be open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateInterval {
    pub from: Option<i64>,
    pub to: Option<i64>,
    #[serde(default)]
    pub all_day: bool,
}

impl DateInterval {
    pub fn new(from: Option<i64>, to: Option<i64>) -> Self {
        Self {
            from,
            to,
            all_day: false,
        }
    }

    /// Whether the interval ended strictly before `now`.
    pub fn has_elapsed(&self, now: i64) -> bool {
        matches!(self.to, Some(to) if to < now)
    }
}

/// Localized message-level texts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessageDesc {
    pub lang: String,
    pub title: Option<String>,
    pub vicinity: Option<String>,
    pub publication: Option<String>,
    pub source: Option<String>,
}

impl MessageDesc {
    pub fn new(lang: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            lang: lang.into(),
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagePartType {
    Details,
    Time,
    Positions,
    Note,
    Prohibition,
    Signals,
}

/// Localized texts of one message part. `details` may carry HTML markup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessagePartDesc {
    pub lang: String,
    pub subject: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub part_type: MessagePartType,
    #[serde(default)]
    pub descs: Vec<MessagePartDesc>,
    /// GeoJSON feature collection, stored verbatim.
    pub geometry: Option<String>,
}

impl MessagePart {
    pub fn new(part_type: MessagePartType) -> Self {
        Self {
            part_type,
            descs: Vec::new(),
            geometry: None,
        }
    }

    pub fn desc(&self, lang: &str) -> Option<&MessagePartDesc> {
        self.descs.iter().find(|desc| desc.lang == lang)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
    Reference,
    Repetition,
    RepetitionNewTime,
    Cancellation,
    Update,
}

/// Link to another message by MRN or short ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub message_id: String,
    #[serde(rename = "type")]
    pub ref_type: ReferenceType,
    pub description: Option<String>,
}

/// Structural validation failure for [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageValidationError {
    NilId,
    BlankSeries,
    MainTypeMismatch {
        main_type: MainType,
        message_type: MessageType,
    },
    InvalidDateInterval {
        from: i64,
        to: i64,
    },
    InvalidPublishWindow {
        from: i64,
        to: i64,
    },
    BlankLanguage,
    DuplicateLanguage(String),
}

impl Display for MessageValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "message id must not be nil"),
            Self::BlankSeries => write!(f, "message series must not be blank"),
            Self::MainTypeMismatch {
                main_type,
                message_type,
            } => write!(
                f,
                "message type {} does not belong to main type {}",
                message_type.as_str(),
                main_type.as_str()
            ),
            Self::InvalidDateInterval { from, to } => {
                write!(f, "date interval end ({to}) must be >= start ({from})")
            }
            Self::InvalidPublishWindow { from, to } => {
                write!(f, "publish_date_to ({to}) must be >= publish_date_from ({from})")
            }
            Self::BlankLanguage => write!(f, "description language must not be blank"),
            Self::DuplicateLanguage(lang) => {
                write!(f, "duplicate description language `{lang}`")
            }
        }
    }
}

impl Error for MessageValidationError {}

/// Canonical NM/NW message record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub series_id: String,
    pub main_type: MainType,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: MessageStatus,
    /// Assigned on publication from the series MRN format.
    pub mrn: Option<String>,
    /// Assigned on publication from the series short format.
    pub short_id: Option<String>,
    pub number: Option<i64>,
    pub publish_date_from: Option<i64>,
    pub publish_date_to: Option<i64>,
    #[serde(default)]
    pub date_intervals: Vec<DateInterval>,
    /// Derived; see [`Message::recompute_dates`].
    pub start_date: Option<i64>,
    /// Derived; see [`Message::recompute_dates`].
    pub end_date: Option<i64>,
    #[serde(default)]
    pub areas: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub charts: Vec<String>,
    #[serde(default)]
    pub aton_uids: Vec<String>,
    /// GeoJSON feature collection, stored verbatim.
    pub geometry: Option<String>,
    #[serde(default)]
    pub descs: Vec<MessageDesc>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub references: Vec<Reference>,
    #[serde(default)]
    pub original_information: bool,
    /// Epoch milliseconds, owned by the store.
    pub created_at: i64,
    /// Epoch milliseconds, owned by the store.
    pub updated_at: i64,
}

impl Message {
    /// Creates a draft message with a generated stable ID.
    pub fn new(series_id: impl Into<String>, message_type: MessageType) -> Self {
        Self::with_id(Uuid::new_v4(), series_id, message_type)
    }

    /// Creates a draft message with a caller-provided ID (import paths).
    pub fn with_id(id: MessageId, series_id: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            id,
            series_id: series_id.into(),
            main_type: message_type.main_type(),
            message_type,
            status: MessageStatus::Draft,
            mrn: None,
            short_id: None,
            number: None,
            publish_date_from: None,
            publish_date_to: None,
            date_intervals: Vec::new(),
            start_date: None,
            end_date: None,
            areas: Vec::new(),
            categories: Vec::new(),
            charts: Vec::new(),
            aton_uids: Vec::new(),
            geometry: None,
            descs: Vec::new(),
            parts: Vec::new(),
            references: Vec::new(),
            original_information: false,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Recomputes `start_date` and `end_date` from `date_intervals`.
    ///
    /// - start: earliest `from` over all intervals.
    /// - end: latest `to`; `None` when any interval is open-ended or when
    ///   there are no intervals.
    pub fn recompute_dates(&mut self) {
        self.start_date = self
            .date_intervals
            .iter()
            .filter_map(|interval| interval.from)
            .min();

        let open_ended = self.date_intervals.iter().any(|i| i.to.is_none());
        self.end_date = if open_ended {
            None
        } else {
            self.date_intervals.iter().filter_map(|i| i.to).max()
        };
    }

    /// Whether every date interval ended strictly before `now`.
    ///
    /// Messages without date intervals never elapse.
    pub fn has_elapsed(&self, now: i64) -> bool {
        !self.date_intervals.is_empty()
            && self
                .date_intervals
                .iter()
                .all(|interval| interval.has_elapsed(now))
    }

    /// Returns the description for `lang`, if present.
    pub fn desc(&self, lang: &str) -> Option<&MessageDesc> {
        self.descs.iter().find(|desc| desc.lang == lang)
    }

    /// Returns the description for `lang`, creating an empty one if missing.
    pub fn desc_mut(&mut self, lang: &str) -> &mut MessageDesc {
        if let Some(index) = self.descs.iter().position(|desc| desc.lang == lang) {
            return &mut self.descs[index];
        }
        self.descs.push(MessageDesc {
            lang: lang.to_string(),
            ..MessageDesc::default()
        });
        let last = self.descs.len() - 1;
        &mut self.descs[last]
    }

    /// Title in `lang`, falling back to the first description with a title.
    pub fn title(&self, lang: &str) -> Option<&str> {
        self.desc(lang)
            .and_then(|desc| desc.title.as_deref())
            .or_else(|| self.descs.iter().find_map(|desc| desc.title.as_deref()))
    }

    /// Checks structural invariants.
    pub fn validate(&self) -> Result<(), MessageValidationError> {
        if self.id.is_nil() {
            return Err(MessageValidationError::NilId);
        }
        if self.series_id.trim().is_empty() {
            return Err(MessageValidationError::BlankSeries);
        }
        if self.message_type.main_type() != self.main_type {
            return Err(MessageValidationError::MainTypeMismatch {
                main_type: self.main_type,
                message_type: self.message_type,
            });
        }
        for interval in &self.date_intervals {
            if let (Some(from), Some(to)) = (interval.from, interval.to) {
                if to < from {
                    return Err(MessageValidationError::InvalidDateInterval { from, to });
                }
            }
        }
        if let (Some(from), Some(to)) = (self.publish_date_from, self.publish_date_to) {
            if to < from {
                return Err(MessageValidationError::InvalidPublishWindow { from, to });
            }
        }

        let mut seen = Vec::with_capacity(self.descs.len());
        for desc in &self.descs {
            let lang = desc.lang.trim();
            if lang.is_empty() {
                return Err(MessageValidationError::BlankLanguage);
            }
            if seen.contains(&lang) {
                return Err(MessageValidationError::DuplicateLanguage(lang.to_string()));
            }
            seen.push(lang);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_lifecycle() {
        assert!(MessageStatus::Verified.can_transition_to(MessageStatus::Published));
        assert!(MessageStatus::Published.can_transition_to(MessageStatus::Expired));
        assert!(MessageStatus::Draft.can_transition_to(MessageStatus::Draft));
        assert!(!MessageStatus::Expired.can_transition_to(MessageStatus::Published));
        assert!(!MessageStatus::Published.can_transition_to(MessageStatus::Draft));
    }

    #[test]
    fn recompute_dates_treats_open_interval_as_unbounded() {
        let mut message = Message::new("dma-nw", MessageType::LocalWarning);
        message.date_intervals = vec![
            DateInterval::new(Some(200), Some(300)),
            DateInterval::new(Some(100), None),
        ];
        message.recompute_dates();
        assert_eq!(message.start_date, Some(100));
        assert_eq!(message.end_date, None);

        message.date_intervals[1].to = Some(500);
        message.recompute_dates();
        assert_eq!(message.end_date, Some(500));
    }

    #[test]
    fn desc_mut_creates_missing_language() {
        let mut message = Message::new("dma-nm", MessageType::PermanentNotice);
        message.desc_mut("da").title = Some("Fyr slukket".to_string());
        message.desc_mut("da").vicinity = Some("Skagen".to_string());
        assert_eq!(message.descs.len(), 1);
        assert_eq!(message.title("en"), Some("Fyr slukket"));
    }
}
