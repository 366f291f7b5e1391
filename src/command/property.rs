//! Property kinds with per-kind validation and clamping

use crate::registry::{Capability, PropertyDescription, PropertyValue};

const DEFAULT_LEVEL_RANGE: (f64, f64) = (0.0, 100.0);
const DEFAULT_KELVIN_RANGE: (f64, f64) = (1700.0, 6500.0);

/// Closed set of property kinds the engine can drive
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyKind {
    OnOff,
    /// Brightness-like level
    Level { min: f64, max: f64 },
    /// Kelvin
    ColorTemperature { min: f64, max: f64 },
    /// `#rrggbb`
    Color,
    /// Read-only sensor state (alarm, leak, motion, open, pushed, boolean)
    State(Capability),
}

/// Why a value was refused for a property kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("expected {expected}, got {got}")]
    WrongType { expected: &'static str, got: String },

    #[error("invalid color '{0}'")]
    InvalidColor(String),

    #[error("{0} cannot be written")]
    ReadOnly(Capability),

    #[error("{0} cannot be adjusted")]
    NotAdjustable(&'static str),
}

impl PropertyKind {
    /// Derive the kind from a property description
    #[must_use]
    pub fn from_description(description: &PropertyDescription) -> Option<Self> {
        let range = |default: (f64, f64)| {
            (
                description.minimum.unwrap_or(default.0),
                description.maximum.unwrap_or(default.1),
            )
        };

        Some(match description.capability()? {
            Capability::OnOff => Self::OnOff,
            Capability::Brightness => {
                let (min, max) = range(DEFAULT_LEVEL_RANGE);
                Self::Level { min, max }
            }
            Capability::ColorTemperature => {
                let (min, max) = range(DEFAULT_KELVIN_RANGE);
                Self::ColorTemperature { min, max }
            }
            Capability::Color => Self::Color,
            cap @ (Capability::Alarm
            | Capability::Boolean
            | Capability::Leak
            | Capability::Motion
            | Capability::Open
            | Capability::Pushed) => Self::State(cap),
        })
    }

    const fn name(self) -> &'static str {
        match self {
            Self::OnOff => "on/off",
            Self::Level { .. } => "level",
            Self::ColorTemperature { .. } => "color temperature",
            Self::Color => "color",
            Self::State(_) => "state",
        }
    }

    /// Check that a value has the right shape for this kind
    ///
    /// # Errors
    ///
    /// Returns the reason the value is unacceptable
    pub fn validate(self, value: &PropertyValue) -> Result<(), ValueError> {
        let wrong = |expected| ValueError::WrongType {
            expected,
            got: value.to_string(),
        };

        match self {
            Self::OnOff | Self::State(_) => value.as_bool().map(|_| ()).ok_or_else(|| wrong("boolean")),
            Self::Level { .. } | Self::ColorTemperature { .. } => {
                value.as_number().map(|_| ()).ok_or_else(|| wrong("number"))
            }
            Self::Color => match value {
                PropertyValue::Text(s) if is_hex_color(s) => Ok(()),
                PropertyValue::Text(s) => Err(ValueError::InvalidColor(s.clone())),
                _ => Err(wrong("color")),
            },
        }
    }

    /// Bring a value into the kind's range; numbers are rounded to integers
    #[must_use]
    pub fn clamp(self, value: PropertyValue) -> PropertyValue {
        match (self, value) {
            (Self::Level { min, max } | Self::ColorTemperature { min, max }, PropertyValue::Number(n)) => {
                PropertyValue::Number(n.round().clamp(min, max.max(min)))
            }
            (Self::Color, PropertyValue::Text(s)) => PropertyValue::Text(s.to_lowercase()),
            (_, value) => value,
        }
    }

    /// Validate and clamp a value about to be written
    ///
    /// # Errors
    ///
    /// Returns error for read-only kinds or ill-typed values
    pub fn prepare(self, value: PropertyValue) -> Result<PropertyValue, ValueError> {
        if let Self::State(cap) = self {
            return Err(ValueError::ReadOnly(cap));
        }
        self.validate(&value)?;
        Ok(self.clamp(value))
    }

    /// Apply a relative delta to the current value
    ///
    /// # Errors
    ///
    /// Returns error if the kind is not numeric or `current` is not a number
    pub fn adjust(self, current: &PropertyValue, delta: f64) -> Result<PropertyValue, ValueError> {
        match self {
            Self::Level { .. } | Self::ColorTemperature { .. } => {
                let current = current.as_number().ok_or_else(|| ValueError::WrongType {
                    expected: "number",
                    got: current.to_string(),
                })?;
                Ok(self.clamp(PropertyValue::Number(current + delta)))
            }
            other => Err(ValueError::NotAdjustable(other.name())),
        }
    }
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}
