//! Structured light characteristic.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Light rhythm, using the abbreviations of the IALA/IHO notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightPhase {
    /// Fixed.
    F,
    /// Flashing.
    Fl,
    /// Long-flashing.
    LFl,
    /// Fixed and flashing.
    FFl,
    /// Quick.
    Q,
    /// Very quick.
    VQ,
    /// Ultra quick.
    UQ,
    /// Interrupted quick.
    IQ,
    /// Interrupted very quick.
    IVQ,
    /// Interrupted ultra quick.
    IUQ,
    /// Isophase.
    Iso,
    /// Occulting.
    Oc,
    /// Morse code.
    Mo,
}

impl LightPhase {
    pub fn code(self) -> &'static str {
        match self {
            Self::F => "F",
            Self::Fl => "Fl",
            Self::LFl => "LFl",
            Self::FFl => "FFl",
            Self::Q => "Q",
            Self::VQ => "VQ",
            Self::UQ => "UQ",
            Self::IQ => "IQ",
            Self::IVQ => "IVQ",
            Self::IUQ => "IUQ",
            Self::Iso => "Iso",
            Self::Oc => "Oc",
            Self::Mo => "Mo",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "F" => Some(Self::F),
            "Fl" => Some(Self::Fl),
            "LFl" => Some(Self::LFl),
            "FFl" => Some(Self::FFl),
            "Q" => Some(Self::Q),
            "VQ" => Some(Self::VQ),
            "UQ" => Some(Self::UQ),
            "IQ" => Some(Self::IQ),
            "IVQ" => Some(Self::IVQ),
            "IUQ" => Some(Self::IUQ),
            "Iso" => Some(Self::Iso),
            "Oc" => Some(Self::Oc),
            "Mo" => Some(Self::Mo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightColor {
    W,
    R,
    G,
    Bu,
    Y,
    Vi,
    Am,
    Or,
}

impl LightColor {
    pub fn code(self) -> &'static str {
        match self {
            Self::W => "W",
            Self::R => "R",
            Self::G => "G",
            Self::Bu => "Bu",
            Self::Y => "Y",
            Self::Vi => "Vi",
            Self::Am => "Am",
            Self::Or => "Or",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "W" => Some(Self::W),
            "R" => Some(Self::R),
            "G" => Some(Self::G),
            "Bu" => Some(Self::Bu),
            "Y" => Some(Self::Y),
            "Vi" => Some(Self::Vi),
            "Am" => Some(Self::Am),
            "Or" => Some(Self::Or),
            _ => None,
        }
    }

    /// English colour name, also the OSM `seamark:light:colour` value.
    pub fn name(self) -> &'static str {
        match self {
            Self::W => "white",
            Self::R => "red",
            Self::G => "green",
            Self::Bu => "blue",
            Self::Y => "yellow",
            Self::Vi => "violet",
            Self::Am => "amber",
            Self::Or => "orange",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "white" => Some(Self::W),
            "red" => Some(Self::R),
            "green" => Some(Self::G),
            "blue" => Some(Self::Bu),
            "yellow" => Some(Self::Y),
            "violet" => Some(Self::Vi),
            "amber" => Some(Self::Am),
            "orange" => Some(Self::Or),
            _ => None,
        }
    }
}

/// One phase of a (possibly composite) light characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightGroup {
    pub phase: LightPhase,
    /// `Al.` prefix: colours alternate.
    pub alternating: bool,
    /// A group specification was given in parentheses.
    pub grouped: bool,
    /// e.g. `[2, 1]` for `Fl(2+1)`.
    pub group_spec: Vec<u32>,
    /// Letters shown by a `Mo` light.
    pub morse_code: Option<String>,
    pub colors: Vec<LightColor>,
}

impl LightGroup {
    pub fn new(phase: LightPhase) -> Self {
        Self {
            phase,
            alternating: false,
            grouped: false,
            group_spec: Vec::new(),
            morse_code: None,
            colors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LightModel {
    pub groups: Vec<LightGroup>,
    /// Metres above datum.
    pub elevation: Option<f64>,
    /// Seconds.
    pub period: Option<f64>,
    /// Nautical miles.
    pub range: Option<u32>,
}

impl Display for LightGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.alternating {
            write!(f, "Al.")?;
        }
        write!(f, "{}", self.phase.code())?;
        if let Some(code) = self.morse_code.as_deref() {
            write!(f, "({code})")?;
        } else if self.grouped {
            let spec = self
                .group_spec
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join("+");
            write!(f, "({spec})")?;
        }
        for color in &self.colors {
            write!(f, "{}", color.code())?;
        }
        Ok(())
    }
}

/// Canonical notation, e.g. `Fl(2+1)G 5s 12m 8M`.
impl Display for LightModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, group) in self.groups.iter().enumerate() {
            if index > 0 {
                write!(f, "+")?;
            }
            write!(f, "{group}")?;
        }
        if let Some(period) = self.period {
            write!(f, " {period}s")?;
        }
        if let Some(elevation) = self.elevation {
            write!(f, " {elevation}m")?;
        }
        if let Some(range) = self.range {
            write!(f, " {range}M")?;
        }
        Ok(())
    }
}
