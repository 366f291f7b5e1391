//! Device and property types shared by the registry and command engine

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic capability type of a device property (`@type` in the thing description)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "OnOffProperty")]
    OnOff,
    #[serde(rename = "BrightnessProperty")]
    Brightness,
    #[serde(rename = "ColorTemperatureProperty")]
    ColorTemperature,
    #[serde(rename = "ColorProperty")]
    Color,
    #[serde(rename = "AlarmProperty")]
    Alarm,
    #[serde(rename = "BooleanProperty")]
    Boolean,
    #[serde(rename = "LeakProperty")]
    Leak,
    #[serde(rename = "MotionProperty")]
    Motion,
    #[serde(rename = "OpenProperty")]
    Open,
    #[serde(rename = "PushedProperty")]
    Pushed,
}

impl Capability {
    /// The `@type` string used by the gateway
    #[must_use]
    pub const fn as_type(self) -> &'static str {
        match self {
            Self::OnOff => "OnOffProperty",
            Self::Brightness => "BrightnessProperty",
            Self::ColorTemperature => "ColorTemperatureProperty",
            Self::Color => "ColorProperty",
            Self::Alarm => "AlarmProperty",
            Self::Boolean => "BooleanProperty",
            Self::Leak => "LeakProperty",
            Self::Motion => "MotionProperty",
            Self::Open => "OpenProperty",
            Self::Pushed => "PushedProperty",
        }
    }

    /// Parse a gateway `@type` string; unknown types yield `None`
    #[must_use]
    pub fn from_type(s: &str) -> Option<Self> {
        [
            Self::OnOff,
            Self::Brightness,
            Self::ColorTemperature,
            Self::Color,
            Self::Alarm,
            Self::Boolean,
            Self::Leak,
            Self::Motion,
            Self::Open,
            Self::Pushed,
        ]
        .into_iter()
        .find(|c| c.as_type() == s)
    }

    /// Property types that satisfy a command targeting this capability
    ///
    /// "active"/"inactive" is spoken for both alarms and plain boolean sensors
    #[must_use]
    pub const fn accepted(self) -> &'static [Self] {
        match self {
            Self::Alarm => &[Self::Alarm, Self::Boolean],
            Self::OnOff => &[Self::OnOff],
            Self::Brightness => &[Self::Brightness],
            Self::ColorTemperature => &[Self::ColorTemperature],
            Self::Color => &[Self::Color],
            Self::Boolean => &[Self::Boolean],
            Self::Leak => &[Self::Leak],
            Self::Motion => &[Self::Motion],
            Self::Open => &[Self::Open],
            Self::Pushed => &[Self::Pushed],
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_type())
    }
}

/// A property value as exchanged with the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl PropertyValue {
    /// Numeric view of the value, if it is a number
    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean view of the value, if it is a boolean
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Description of one property on a registered device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescription {
    /// Raw `@type`, kept even when it is not a known capability
    #[serde(rename = "@type", default)]
    pub at_type: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    /// JSON schema type ("boolean", "integer", "number", "string")
    #[serde(rename = "type", default)]
    pub value_type: Option<String>,

    #[serde(default)]
    pub minimum: Option<f64>,

    #[serde(default)]
    pub maximum: Option<f64>,

    #[serde(rename = "readOnly", default)]
    pub read_only: bool,
}

impl PropertyDescription {
    /// Known capability of this property
    #[must_use]
    pub fn capability(&self) -> Option<Capability> {
        self.at_type.as_deref().and_then(Capability::from_type)
    }
}

/// A device as reported by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Stable device identifier
    pub id: String,

    /// Human-facing title, the source of the device tag
    pub title: String,

    /// Properties keyed by property name
    pub properties: BTreeMap<String, PropertyDescription>,
}

impl Device {
    /// Create a device with no properties
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach a property
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, description: PropertyDescription) -> Self {
        self.properties.insert(name.into(), description);
        self
    }

    /// First property (by name) whose capability satisfies `capability`
    #[must_use]
    pub fn property_for(&self, capability: Capability) -> Option<(&str, &PropertyDescription)> {
        let accepted = capability.accepted();
        self.properties
            .iter()
            .find(|(_, p)| p.capability().is_some_and(|c| accepted.contains(&c)))
            .map(|(name, p)| (name.as_str(), p))
    }
}

/// Reference to a property on a device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    pub device_id: String,
    pub property: String,
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.property)
    }
}

impl PropertyDescription {
    /// Minimal description carrying only a capability
    #[must_use]
    pub fn of(capability: Capability) -> Self {
        Self {
            at_type: Some(capability.as_type().to_string()),
            title: None,
            value_type: None,
            minimum: None,
            maximum: None,
            read_only: false,
        }
    }

    /// Attach a numeric range
    #[must_use]
    pub const fn with_range(mut self, minimum: f64, maximum: f64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_roundtrip() {
        for s in ["OnOffProperty", "ColorProperty", "PushedProperty"] {
            let cap = Capability::from_type(s).unwrap();
            assert_eq!(cap.as_type(), s);
        }
        assert!(Capability::from_type("TemperatureProperty").is_none());
    }

    #[test]
    fn test_property_value_untagged() {
        let v: PropertyValue = serde_json::from_str("true").unwrap();
        assert_eq!(v, PropertyValue::Bool(true));
        let v: PropertyValue = serde_json::from_str("42").unwrap();
        assert_eq!(v.as_number(), Some(42.0));
        let v: PropertyValue = serde_json::from_str("\"#ff0000\"").unwrap();
        assert_eq!(v, PropertyValue::Text("#ff0000".to_string()));
    }

    #[test]
    fn test_alarm_accepts_boolean_property() {
        let device = Device::new("sensor-1", "Hall Sensor")
            .with_property("state", PropertyDescription::of(Capability::Boolean));

        assert!(device.property_for(Capability::Alarm).is_some());
        assert!(device.property_for(Capability::Leak).is_none());
    }
}
