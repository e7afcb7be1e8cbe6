//! Regex grammar for light characteristic notation.
//!
//! The input is normalized, then phase tokens (optionally joined by `+`) are
//! consumed from the front, then period/elevation/range suffixes. Anything
//! left over is an error.

use crate::light::model::{LightColor, LightGroup, LightModel, LightPhase};
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));
static PAREN_SPACING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(\s*([^)]*?)\s*\)").expect("valid paren regex"));
static PLUS_SPACING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\+\s*").expect("valid plus regex"));
static PHASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<alt>Al\.?\s*)?(?P<phase>FFl|LFl|Fl|F|IVQ|IUQ|IQ|VQ|UQ|Q|Iso|Oc|Mo)(?:\((?P<group>[^)]*)\))?\.?\s*(?P<colors>(?:(?:Bu|Am|Vi|Or|W|R|G|Y)\.?)+)?\s*",
    )
    .expect("valid phase regex")
});
static COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Bu|Am|Vi|Or|W|R|G|Y").expect("valid color regex"));
static SUFFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:(?P<period>\d+(?:\.\d+)?)\s?s|(?P<elevation>\d+(?:\.\d+)?)\s?m|(?P<range>\d+)\s?M)\b\.?\s*",
    )
    .expect("valid suffix regex")
});
static GROUP_SPEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\+\d+)*$").expect("valid group spec regex"));
static MORSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("valid morse regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LightParseError {
    Empty,
    /// Input does not start with a known phase.
    MissingPhase(String),
    InvalidGroup(String),
    DuplicateSuffix(&'static str),
    /// Text left after phases and suffixes were consumed.
    Unparsed(String),
}

impl Display for LightParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "light character must not be blank"),
            Self::MissingPhase(input) => write!(f, "no light phase found in `{input}`"),
            Self::InvalidGroup(group) => write!(f, "invalid light group `({group})`"),
            Self::DuplicateSuffix(name) => write!(f, "light {name} given more than once"),
            Self::Unparsed(rest) => write!(f, "unparsed light character text `{rest}`"),
        }
    }
}

impl Error for LightParseError {}

/// Parses a light characteristic such as `Fl(2+1)G. 5s 12m 8M`.
pub fn parse_light_character(input: &str) -> Result<LightModel, LightParseError> {
    let normalized = normalize(input);
    if normalized.is_empty() {
        return Err(LightParseError::Empty);
    }

    let mut model = LightModel::default();
    let mut rest = normalized.as_str();
    let mut after_plus = false;

    loop {
        let Some(caps) = PHASE_RE.captures(rest) else {
            // A `+` must join two phases.
            if after_plus {
                return Err(LightParseError::Unparsed(format!("+{rest}")));
            }
            break;
        };
        let phase = caps
            .name("phase")
            .and_then(|m| LightPhase::from_code(m.as_str()))
            .ok_or_else(|| LightParseError::MissingPhase(normalized.clone()))?;

        let mut group = LightGroup::new(phase);
        group.alternating = caps.name("alt").is_some();
        if let Some(spec) = caps.name("group") {
            apply_group(&mut group, spec.as_str())?;
        }
        if let Some(colors) = caps.name("colors") {
            group.colors = COLOR_RE
                .find_iter(colors.as_str())
                .filter_map(|m| LightColor::from_code(m.as_str()))
                .collect();
        }
        model.groups.push(group);

        let consumed = caps.get(0).map_or(0, |m| m.end());
        rest = &rest[consumed..];
        match rest.strip_prefix('+') {
            Some(next) => {
                rest = next;
                after_plus = true;
            }
            None => break,
        }
    }

    if model.groups.is_empty() {
        return Err(LightParseError::MissingPhase(normalized.clone()));
    }

    while let Some(caps) = SUFFIX_RE.captures(rest) {
        if let Some(period) = caps.name("period") {
            set_once(&mut model.period, parse_number(period.as_str()), "period")?;
        } else if let Some(elevation) = caps.name("elevation") {
            set_once(&mut model.elevation, parse_number(elevation.as_str()), "elevation")?;
        } else if let Some(range) = caps.name("range") {
            let value = range
                .as_str()
                .parse::<u32>()
                .map_err(|_| LightParseError::Unparsed(rest.to_string()))?;
            set_once(&mut model.range, value, "range")?;
        }
        let consumed = caps.get(0).map_or(0, |m| m.end());
        if consumed == 0 {
            break;
        }
        rest = &rest[consumed..];
    }

    let leftover = rest.trim().trim_end_matches('.');
    if !leftover.is_empty() {
        return Err(LightParseError::Unparsed(leftover.to_string()));
    }

    Ok(model)
}

fn normalize(input: &str) -> String {
    let collapsed = WHITESPACE_RE.replace_all(input.trim(), " ");
    let parens = PAREN_SPACING_RE.replace_all(&collapsed, "($1)");
    PLUS_SPACING_RE.replace_all(&parens, "+").into_owned()
}

fn apply_group(group: &mut LightGroup, spec: &str) -> Result<(), LightParseError> {
    let spec = spec.trim();
    if group.phase == LightPhase::Mo {
        if !MORSE_RE.is_match(spec) {
            return Err(LightParseError::InvalidGroup(spec.to_string()));
        }
        group.morse_code = Some(spec.to_ascii_uppercase());
        return Ok(());
    }

    if !GROUP_SPEC_RE.is_match(spec) {
        return Err(LightParseError::InvalidGroup(spec.to_string()));
    }
    let counts = spec
        .split('+')
        .map(|part| part.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LightParseError::InvalidGroup(spec.to_string()))?;
    if counts.contains(&0) {
        return Err(LightParseError::InvalidGroup(spec.to_string()));
    }
    group.grouped = true;
    group.group_spec = counts;
    Ok(())
}

fn parse_number(value: &str) -> f64 {
    // The suffix regex only admits digits with an optional fraction.
    value.parse().unwrap_or_default()
}

fn set_once<T>(slot: &mut Option<T>, value: T, name: &'static str) -> Result<(), LightParseError> {
    if slot.is_some() {
        return Err(LightParseError::DuplicateSuffix(name));
    }
    *slot = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_tightens_parentheses_and_plus() {
        assert_eq!(normalize("  Fl ( 2 + 1 )  G   5s "), "Fl(2+1) G 5s");
        assert_eq!(normalize("Q(6) + LFl 15s"), "Q(6)+LFl 15s");
    }

    #[test]
    fn zero_count_group_is_rejected() {
        assert_eq!(
            parse_light_character("Fl(0)"),
            Err(LightParseError::InvalidGroup("0".to_string()))
        );
    }
}
