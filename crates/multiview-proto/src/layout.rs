use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ModelError;

pub const MAX_GAP: u8 = 32;
pub const DEFAULT_GAP: u8 = 4;
pub const DEFAULT_BORDER_COLOR: &str = "#000000";

const NAMED_COLORS: &[&str] = &[
    "black",
    "white",
    "gray",
    "grey",
    "silver",
    "red",
    "orange",
    "yellow",
    "green",
    "lime",
    "teal",
    "cyan",
    "blue",
    "navy",
    "purple",
    "magenta",
    "pink",
    "transparent",
];

/// A border color accepted by the display: hex (`#rgb`, `#rgba`, `#rrggbb`,
/// `#rrggbbaa`) or one of a fixed set of CSS color names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BorderColor(String);

impl BorderColor {
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let value = raw.trim().to_ascii_lowercase();
        let valid = match value.strip_prefix('#') {
            Some(hex) => {
                matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit())
            }
            None => NAMED_COLORS.contains(&value.as_str()),
        };
        if valid {
            Ok(Self(value))
        } else {
            Err(ModelError::InvalidColor(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BorderColor {
    fn default() -> Self {
        Self(DEFAULT_BORDER_COLOR.to_string())
    }
}

impl TryFrom<String> for BorderColor {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BorderColor> for String {
    fn from(color: BorderColor) -> Self {
        color.0
    }
}

/// Display preferences that do not depend on slot content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    #[serde(default = "default_gap", deserialize_with = "deserialize_gap")]
    gap: u8,
    #[serde(default)]
    border_color: BorderColor,
    #[serde(default)]
    chat_enabled: bool,
}

impl Layout {
    pub fn gap(&self) -> u8 {
        self.gap
    }

    pub fn border_color(&self) -> &BorderColor {
        &self.border_color
    }

    pub fn chat_enabled(&self) -> bool {
        self.chat_enabled
    }

    pub fn set_gap(&mut self, gap: u32) -> Result<(), ModelError> {
        if gap > MAX_GAP as u32 {
            return Err(ModelError::GapOutOfRange(gap));
        }
        self.gap = gap as u8;
        Ok(())
    }

    pub fn set_border_color(&mut self, color: BorderColor) {
        self.border_color = color;
    }

    pub fn set_chat_enabled(&mut self, enabled: bool) {
        self.chat_enabled = enabled;
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            gap: DEFAULT_GAP,
            border_color: BorderColor::default(),
            chat_enabled: false,
        }
    }
}

fn default_gap() -> u8 {
    DEFAULT_GAP
}

fn deserialize_gap<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let gap = u32::deserialize(deserializer)?;
    if gap > MAX_GAP as u32 {
        return Err(serde::de::Error::custom(ModelError::GapOutOfRange(gap)));
    }
    Ok(gap as u8)
}
