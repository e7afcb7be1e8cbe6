//! Light characteristic notation.
//!
//! # Responsibility
//! - Parse nautical light characteristics (`Fl(2+1)G 5s`) into a typed model.
//! - Render the model back to canonical notation and to English text.
//! - Derive light models from AtoN `seamark:light:*` tags.

pub mod describe;
pub mod model;
pub mod parser;

pub use describe::{describe_light, light_from_aton};
pub use model::{LightColor, LightGroup, LightModel, LightPhase};
pub use parser::{parse_light_character, LightParseError};
