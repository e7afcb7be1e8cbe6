//! Message series and identifier formatting.
//!
//! A series decides how published messages get their number, short ID and
//! MRN. Formats are plain strings with `${token}` placeholders.

use crate::model::message::{MainType, MessageId};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

const UNIQUE_MRN_TOKENS: &[&str] = &["${number}", "${number-3-digits}", "${id}"];

/// How message numbers are allocated within a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NumberSequenceType {
    /// Sequence restarts at 1 every calendar year.
    Yearly,
    /// One sequence for the lifetime of the series.
    Continuous,
    /// Number is entered by the editor before publication.
    Manual,
    /// Messages are not numbered.
    None,
}

impl NumberSequenceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yearly => "yearly",
            Self::Continuous => "continuous",
            Self::Manual => "manual",
            Self::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "yearly" => Some(Self::Yearly),
            "continuous" => Some(Self::Continuous),
            "manual" => Some(Self::Manual),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSeries {
    pub series_id: String,
    pub main_type: MainType,
    /// e.g. `urn:mrn:iho:nw:dk:dma:${year}:${number}`
    pub mrn_format: String,
    /// e.g. `NW-${number-3-digits}-${year-2-digits}`
    pub short_format: Option<String>,
    pub number_sequence_type: NumberSequenceType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesValidationError {
    BlankSeriesId,
    BlankMrnFormat,
    /// MRN format lacks a token that makes each generated MRN unique.
    NonUniqueMrnFormat(String),
}

impl Display for SeriesValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankSeriesId => write!(f, "series id must not be blank"),
            Self::BlankMrnFormat => write!(f, "series MRN format must not be blank"),
            Self::NonUniqueMrnFormat(format) => write!(
                f,
                "series MRN format `{format}` must contain one of {}",
                UNIQUE_MRN_TOKENS.join(", ")
            ),
        }
    }
}

impl Error for SeriesValidationError {}

impl MessageSeries {
    pub fn new(
        series_id: impl Into<String>,
        main_type: MainType,
        mrn_format: impl Into<String>,
        number_sequence_type: NumberSequenceType,
    ) -> Self {
        Self {
            series_id: series_id.into(),
            main_type,
            mrn_format: mrn_format.into(),
            short_format: None,
            number_sequence_type,
        }
    }

    pub fn validate(&self) -> Result<(), SeriesValidationError> {
        if self.series_id.trim().is_empty() {
            return Err(SeriesValidationError::BlankSeriesId);
        }
        let format = self.mrn_format.trim();
        if format.is_empty() {
            return Err(SeriesValidationError::BlankMrnFormat);
        }
        if !UNIQUE_MRN_TOKENS.iter().any(|token| format.contains(token)) {
            return Err(SeriesValidationError::NonUniqueMrnFormat(format.to_string()));
        }
        Ok(())
    }
}

/// Whether `format` expands a message number.
pub fn uses_number(format: &str) -> bool {
    format.contains("${number}") || format.contains("${number-3-digits}")
}

/// Values substituted into series formats.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierContext<'a> {
    pub series_id: &'a str,
    pub main_type: MainType,
    pub message_id: MessageId,
    pub year: i32,
    pub number: Option<i64>,
}

/// Expands `${...}` tokens in a series format.
///
/// Unknown tokens are left untouched; number tokens expand to an empty
/// string for unnumbered messages.
pub fn format_identifier(format: &str, ctx: &IdentifierContext<'_>) -> String {
    let number = ctx.number.map(|n| n.to_string()).unwrap_or_default();
    let number_3 = ctx.number.map(|n| format!("{n:03}")).unwrap_or_default();
    let year_2 = format!("{:02}", ctx.year.rem_euclid(100));

    format
        .replace("${series-id}", ctx.series_id)
        .replace("${main-type}", ctx.main_type.as_str())
        .replace("${year-2-digits}", &year_2)
        .replace("${year}", &ctx.year.to_string())
        .replace("${number-3-digits}", &number_3)
        .replace("${number}", &number)
        .replace("${id}", &ctx.message_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn format_identifier_expands_known_tokens() {
        let ctx = IdentifierContext {
            series_id: "dma-nw",
            main_type: MainType::Nw,
            message_id: Uuid::nil(),
            year: 2026,
            number: Some(7),
        };
        assert_eq!(
            format_identifier("urn:mrn:iho:${main-type}:dk:${year}:${number}", &ctx),
            "urn:mrn:iho:nw:dk:2026:7"
        );
        assert_eq!(
            format_identifier("NW-${number-3-digits}-${year-2-digits}", &ctx),
            "NW-007-26"
        );
    }

    #[test]
    fn uses_number_detects_number_tokens() {
        assert!(uses_number("urn:mrn:test:${number}"));
        assert!(uses_number("NW-${number-3-digits}"));
        assert!(!uses_number("urn:mrn:test:${id}"));
    }

    #[test]
    fn validate_requires_unique_token_in_mrn_format() {
        let series = MessageSeries::new(
            "dma-nm",
            MainType::Nm,
            "urn:mrn:iho:nm:dk:${year}",
            NumberSequenceType::Yearly,
        );
        assert!(matches!(
            series.validate(),
            Err(SeriesValidationError::NonUniqueMrnFormat(_))
        ));
    }
}
