//! Typed predicate filters over AtoN nodes and messages.
//!
//! # Responsibility
//! - Parse the filter expression syntax into a [`Predicate`] tree.
//! - Evaluate predicates against any [`FilterTarget`].
//!
//! # Invariants
//! - Parsing is the only fallible step; evaluation never errors. A field
//!   the target does not have yields no values.

pub mod ast;
pub mod parser;
mod targets;

pub use ast::{CompareOp, FilterTarget, Pattern, Predicate};
pub use parser::{parse_filter, FilterParseError};

use crate::model::aton::AtonNode;
use crate::model::message::Message;
use std::marker::PhantomData;

/// Parsed filter bound to the record type it evaluates.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter<T> {
    source: String,
    predicate: Predicate,
    _target: PhantomData<fn(&T)>,
}

/// Filter over AtoN nodes, e.g. `seamark:type ~ "light.*" && has(seamark:ref)`.
pub type AtonFilter = Filter<AtonNode>;
/// Filter over messages, e.g. `status = published && area = "Kattegat"`.
pub type MessageFilter = Filter<Message>;

impl<T: FilterTarget> Filter<T> {
    pub fn parse(source: &str) -> Result<Self, FilterParseError> {
        let predicate = parse_filter(source)?;
        Ok(Self {
            source: source.trim().to_string(),
            predicate,
            _target: PhantomData,
        })
    }

    pub fn from_predicate(predicate: Predicate) -> Self {
        Self {
            source: String::new(),
            predicate,
            _target: PhantomData,
        }
    }

    pub fn matches(&self, target: &T) -> bool {
        self.predicate.evaluate(target)
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Expression text; empty for filters built from a predicate.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Returns the nodes accepted by `filter`, preserving input order.
pub fn filter_atons<'a>(
    nodes: impl IntoIterator<Item = &'a AtonNode>,
    filter: &AtonFilter,
) -> Vec<&'a AtonNode> {
    nodes.into_iter().filter(|node| filter.matches(node)).collect()
}

/// Returns the messages accepted by `filter`, preserving input order.
pub fn filter_messages<'a>(
    messages: impl IntoIterator<Item = &'a Message>,
    filter: &MessageFilter,
) -> Vec<&'a Message> {
    messages
        .into_iter()
        .filter(|message| filter.matches(message))
        .collect()
}
