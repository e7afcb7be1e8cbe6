//! Predicate tree and its evaluation.

use regex::Regex;
use std::borrow::Cow;
use std::fmt::{Debug, Formatter};

/// Read access to named, possibly multi-valued fields of a filtered record.
pub trait FilterTarget {
    /// All values of `field`; empty when the field is absent.
    fn field_values(&self, field: &str) -> Vec<Cow<'_, str>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }
}

/// Compiled regex matched against the whole field value.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{source})$"))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl Debug for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pattern({:?})", self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        field: String,
        op: CompareOp,
        value: String,
    },
    Matches {
        field: String,
        pattern: Pattern,
    },
    Exists(String),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists(field.into())
    }

    pub fn matches(field: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Matches {
            field: field.into(),
            pattern: Pattern::new(pattern)?,
        })
    }

    /// Evaluates the predicate. Multi-valued fields match when any value does;
    /// `!=` holds when no value equals.
    pub fn evaluate(&self, target: &dyn FilterTarget) -> bool {
        match self {
            Self::And(items) => items.iter().all(|item| item.evaluate(target)),
            Self::Or(items) => items.iter().any(|item| item.evaluate(target)),
            Self::Not(inner) => !inner.evaluate(target),
            Self::Exists(field) => !target.field_values(field).is_empty(),
            Self::Matches { field, pattern } => target
                .field_values(field)
                .iter()
                .any(|value| pattern.is_match(value)),
            Self::Compare { field, op, value } => {
                let values = target.field_values(field);
                match op {
                    CompareOp::Eq => values.iter().any(|v| v.eq_ignore_ascii_case(value)),
                    CompareOp::Ne => !values.iter().any(|v| v.eq_ignore_ascii_case(value)),
                    numeric => {
                        let Ok(expected) = value.parse::<f64>() else {
                            return false;
                        };
                        values
                            .iter()
                            .filter_map(|v| v.trim().parse::<f64>().ok())
                            .any(|actual| compare_numbers(*numeric, actual, expected))
                    }
                }
            }
        }
    }
}

fn compare_numbers(op: CompareOp, actual: f64, expected: f64) -> bool {
    match op {
        CompareOp::Lt => actual < expected,
        CompareOp::Le => actual <= expected,
        CompareOp::Gt => actual > expected,
        CompareOp::Ge => actual >= expected,
        CompareOp::Eq => actual == expected,
        CompareOp::Ne => actual != expected,
    }
}
