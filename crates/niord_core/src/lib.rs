//! Core domain logic for Niord maritime safety information.
//! This crate is the single source of truth for message, AtoN and index
//! invariants.

pub mod config;
pub mod db;
pub mod filter;
pub mod light;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;

pub use config::{ConfigError, IndexSettings, NiordConfig, ScheduleSettings};
pub use filter::{AtonFilter, Filter, FilterParseError, FilterTarget, MessageFilter, Predicate};
pub use light::{describe_light, parse_light_character, LightModel, LightParseError};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status};
pub use model::aton::{AtonLink, AtonLinkType, AtonNode, AtonTag};
pub use model::message::{
    DateInterval, MainType, Message, MessageDesc, MessageId, MessageStatus, MessageType,
};
pub use model::series::{MessageSeries, NumberSequenceType};
pub use repo::message_repo::{
    MessageChange, MessageRepository, NumberRequest, SqliteMessageRepository, UpdateCursor,
};
pub use repo::{RepoError, RepoResult};
pub use search::{
    IndexActor, IndexQuery, MessageIndex, SearchError, SearchHit, SearchResult, UpdateOutcome,
};
pub use service::message_service::{MessageService, ServiceError, ServiceResult};
pub use service::schedule_service::{ScheduleReport, ScheduledMessageService, SchedulerRunner};
