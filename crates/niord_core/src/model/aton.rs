//! Aid-to-Navigation model using OSM seamark key/value tags.
//!
//! # Invariants
//! - Tag keys are unique within one node.
//! - `lat` is within [-90, 90] and `lon` within [-180, 180].

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Tag holding the AtoN UID referenced from messages.
pub const ATON_UID_KEY: &str = "seamark:ref";
/// Tag holding the seamark type, e.g. `light_minor`, `buoy_lateral`.
pub const SEAMARK_TYPE_KEY: &str = "seamark:type";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtonTag {
    pub k: String,
    pub v: String,
}

impl AtonTag {
    pub fn new(k: impl Into<String>, v: impl Into<String>) -> Self {
        Self {
            k: k.into(),
            v: v.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtonNode {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
    pub user: Option<String>,
    pub visible: bool,
    pub version: i64,
    pub changeset: Option<i64>,
    /// Epoch milliseconds of the last edit.
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub tags: Vec<AtonTag>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AtonValidationError {
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
    BlankTagKey,
    DuplicateTagKey(String),
}

impl Display for AtonValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LatitudeOutOfRange(lat) => write!(f, "latitude {lat} out of range"),
            Self::LongitudeOutOfRange(lon) => write!(f, "longitude {lon} out of range"),
            Self::BlankTagKey => write!(f, "tag key must not be blank"),
            Self::DuplicateTagKey(key) => write!(f, "duplicate tag key `{key}`"),
        }
    }
}

impl Error for AtonValidationError {}

impl AtonNode {
    pub fn new(id: i64, lat: f64, lon: f64) -> Self {
        Self {
            id,
            lat,
            lon,
            user: None,
            visible: true,
            version: 1,
            changeset: None,
            timestamp: None,
            tags: Vec::new(),
        }
    }

    /// Builder-style tag setter used by import code and tests.
    pub fn with_tag(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.set_tag(k, v);
        self
    }

    pub fn tag(&self, k: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.k == k)
            .map(|tag| tag.v.as_str())
    }

    /// Sets or replaces the value for key `k`.
    pub fn set_tag(&mut self, k: impl Into<String>, v: impl Into<String>) {
        let k = k.into();
        let v = v.into();
        match self.tags.iter_mut().find(|tag| tag.k == k) {
            Some(tag) => tag.v = v,
            None => self.tags.push(AtonTag { k, v }),
        }
    }

    /// Removes key `k`; returns the removed value.
    pub fn remove_tag(&mut self, k: &str) -> Option<String> {
        let index = self.tags.iter().position(|tag| tag.k == k)?;
        Some(self.tags.remove(index).v)
    }

    pub fn uid(&self) -> Option<&str> {
        self.tag(ATON_UID_KEY)
    }

    pub fn seamark_type(&self) -> Option<&str> {
        self.tag(SEAMARK_TYPE_KEY)
    }

    pub fn validate(&self) -> Result<(), AtonValidationError> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(AtonValidationError::LatitudeOutOfRange(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(AtonValidationError::LongitudeOutOfRange(self.lon));
        }
        for (index, tag) in self.tags.iter().enumerate() {
            if tag.k.trim().is_empty() {
                return Err(AtonValidationError::BlankTagKey);
            }
            if self.tags[..index].iter().any(|other| other.k == tag.k) {
                return Err(AtonValidationError::DuplicateTagKey(tag.k.clone()));
            }
        }
        Ok(())
    }
}

/// Kind of grouping expressed by an [`AtonLink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AtonLinkType {
    /// Parts of one physical structure, e.g. a light and its beacon.
    Aggregation,
    /// Loosely related AtoNs, e.g. a leading line.
    Association,
}

impl AtonLinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aggregation => "aggregation",
            Self::Association => "association",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "aggregation" => Some(Self::Aggregation),
            "association" => Some(Self::Association),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtonLink {
    pub link_id: Uuid,
    pub name: String,
    pub link_type: AtonLinkType,
    #[serde(default)]
    pub tags: Vec<AtonTag>,
    /// Member node ids, in link order.
    #[serde(default)]
    pub node_ids: Vec<i64>,
}

impl AtonLink {
    pub fn new(name: impl Into<String>, link_type: AtonLinkType) -> Self {
        Self {
            link_id: Uuid::new_v4(),
            name: name.into(),
            link_type,
            tags: Vec::new(),
            node_ids: Vec::new(),
        }
    }
}
