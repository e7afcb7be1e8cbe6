//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into message lifecycle operations.
//! - Run the scheduled expiry and publication checks.

pub mod message_service;
pub mod schedule_service;
