//! Domain model for maritime safety messages, series and AtoN data.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep derived fields (message start/end dates) computable from source
//!   fields only.
//!
//! # Invariants
//! - Every message is identified by a stable `MessageId`.
//! - Status changes follow `MessageStatus::can_transition_to`.

pub mod aton;
pub mod message;
pub mod series;
