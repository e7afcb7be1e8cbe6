//! Human-readable rendering of light models and conversion from AtoN tags.

use crate::light::model::{LightColor, LightGroup, LightModel, LightPhase};
use crate::light::parser::{parse_light_character, LightParseError};
use crate::model::aton::AtonNode;

const LIGHT_TAG_PREFIXES: &[&str] = &["seamark:light:", "seamark:light:1:"];

/// Renders an English description, e.g.
/// `Green light, group flashing (2+1), period 5 s`.
pub fn describe_light(model: &LightModel) -> String {
    let mut text = model
        .groups
        .iter()
        .map(describe_group)
        .collect::<Vec<_>>()
        .join(", followed by ");

    if let Some(period) = model.period {
        text.push_str(&format!(", period {period} s"));
    }
    if let Some(elevation) = model.elevation {
        text.push_str(&format!(", elevation {elevation} m"));
    }
    if let Some(range) = model.range {
        let unit = if range == 1 { "nautical mile" } else { "nautical miles" };
        text.push_str(&format!(", range {range} {unit}"));
    }
    capitalize(&text)
}

fn describe_group(group: &LightGroup) -> String {
    let light = if group.colors.is_empty() {
        "light".to_string()
    } else {
        format!("{} light", join_colors(&group.colors))
    };
    let rhythm = describe_rhythm(group);
    if group.alternating {
        format!("alternating {light}, {rhythm}")
    } else {
        format!("{light}, {rhythm}")
    }
}

fn describe_rhythm(group: &LightGroup) -> String {
    if let (LightPhase::Mo, Some(code)) = (group.phase, group.morse_code.as_deref()) {
        return format!("morse code ({code})");
    }

    let base = match group.phase {
        LightPhase::F => "fixed",
        LightPhase::Fl => "flashing",
        LightPhase::LFl => "long-flashing",
        LightPhase::FFl => "fixed and flashing",
        LightPhase::Q => "quick flashing",
        LightPhase::VQ => "very quick flashing",
        LightPhase::UQ => "ultra quick flashing",
        LightPhase::IQ => "interrupted quick flashing",
        LightPhase::IVQ => "interrupted very quick flashing",
        LightPhase::IUQ => "interrupted ultra quick flashing",
        LightPhase::Iso => "isophase",
        LightPhase::Oc => "occulting",
        LightPhase::Mo => "morse code",
    };

    if group.grouped {
        let spec = group
            .group_spec
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join("+");
        format!("group {base} ({spec})")
    } else {
        base.to_string()
    }
}

fn join_colors(colors: &[LightColor]) -> String {
    let names = colors.iter().map(|color| color.name()).collect::<Vec<_>>();
    match names.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Builds a light model from OSM `seamark:light:*` tags.
///
/// Returns `Ok(None)` when the node carries no light character tag. The
/// unnumbered tag family wins over the first numbered sector.
pub fn light_from_aton(node: &AtonNode) -> Result<Option<LightModel>, LightParseError> {
    for prefix in LIGHT_TAG_PREFIXES {
        let tag = |name: &str| node.tag(&format!("{prefix}{name}"));
        let Some(character) = tag("character") else {
            continue;
        };

        let mut notation = character.trim().to_string();
        if let Some(group) = tag("group").map(str::trim).filter(|g| !g.is_empty()) {
            notation.push_str(&format!("({group})"));
        }
        if let Some(colours) = tag("colour") {
            for colour in colours.split(';') {
                // Unknown colour names surface as unparsed text.
                match LightColor::from_name(colour) {
                    Some(color) => notation.push_str(color.code()),
                    None => notation.push_str(&format!(" {}", colour.trim())),
                }
            }
        }
        if let Some(period) = tag("period") {
            notation.push_str(&format!(" {}s", period.trim()));
        }
        if let Some(height) = tag("height") {
            notation.push_str(&format!(" {}m", height.trim()));
        }
        if let Some(range) = tag("range") {
            notation.push_str(&format!(" {}M", range.trim()));
        }
        return parse_light_character(&notation).map(Some);
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_colors_uses_oxford_free_list() {
        assert_eq!(
            join_colors(&[LightColor::W, LightColor::R, LightColor::G]),
            "white, red and green"
        );
        assert_eq!(join_colors(&[LightColor::Y]), "yellow");
    }
}
