//! Device registry collaborator
//!
//! The gateway owns device state; this module lists devices and reads and
//! writes property values over its REST API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::types::{Device, PropertyDescription, PropertyRef, PropertyValue};
use crate::{Error, Result};

/// Access to the gateway's devices and property values
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// List every device known to the gateway
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Read the current value of a property
    async fn get_value(&self, property: &PropertyRef) -> Result<PropertyValue>;

    /// Write a property value, returning the value the device settled on
    async fn set_value(&self, property: &PropertyRef, value: PropertyValue) -> Result<PropertyValue>;
}

/// Thing description as returned by `GET /things`
#[derive(Debug, Deserialize)]
struct ThingDescription {
    href: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, PropertyDescription>,
}

impl ThingDescription {
    fn into_device(self) -> Option<Device> {
        let id = self.href.rsplit('/').find(|s| !s.is_empty())?.to_string();
        let title = self.title.unwrap_or_else(|| id.clone());
        Some(Device {
            id,
            title,
            properties: self.properties,
        })
    }
}

/// REST client for a WebThings-style gateway
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl GatewayClient {
    /// Create a gateway client
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, token: Option<SecretString>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn property_url(&self, property: &PropertyRef) -> String {
        format!(
            "{}/things/{}/properties/{}",
            self.base_url,
            urlencoding::encode(&property.device_id),
            urlencoding::encode(&property.property)
        )
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Unwrap a `{ "<name>": value }` property body
    fn extract_value(body: serde_json::Value, name: &str) -> Result<PropertyValue> {
        let value = match body {
            serde_json::Value::Object(mut map) => map
                .remove(name)
                .ok_or_else(|| Error::Registry(format!("response missing property '{name}'")))?,
            other => other,
        };
        Ok(serde_json::from_value(value)?)
    }
}

#[async_trait]
impl DeviceClient for GatewayClient {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        let url = format!("{}/things", self.base_url);
        let response = self.request(self.client.get(&url)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Registry(format!("device listing failed {status}: {body}")));
        }

        let things: Vec<ThingDescription> = response.json().await?;
        let devices: Vec<Device> = things
            .into_iter()
            .filter_map(ThingDescription::into_device)
            .collect();

        tracing::debug!(count = devices.len(), "listed gateway devices");
        Ok(devices)
    }

    async fn get_value(&self, property: &PropertyRef) -> Result<PropertyValue> {
        let response = self
            .request(self.client.get(self.property_url(property)))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Registry(format!("read of {property} failed {status}: {body}")));
        }

        let body: serde_json::Value = response.json().await?;
        Self::extract_value(body, &property.property)
    }

    async fn set_value(&self, property: &PropertyRef, value: PropertyValue) -> Result<PropertyValue> {
        let mut body = serde_json::Map::new();
        body.insert(property.property.clone(), serde_json::to_value(&value)?);

        let response = self
            .request(self.client.put(self.property_url(property)))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(property = %property, status = %status, body = %text, "property write rejected");
            return Err(Error::PropertyApply(format!("write of {property} failed {status}: {text}")));
        }

        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        if body.is_null() {
            return Ok(value);
        }
        Self::extract_value(body, &property.property)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thing_description_into_device() {
        let json = r#"[{
            "href": "/things/virtual-things-2",
            "title": "Living Room",
            "properties": {
                "on": {"@type": "OnOffProperty", "type": "boolean", "title": "On/Off"},
                "level": {"@type": "BrightnessProperty", "type": "integer", "minimum": 0, "maximum": 100}
            }
        }]"#;

        let things: Vec<ThingDescription> = serde_json::from_str(json).unwrap();
        let device = things.into_iter().next().unwrap().into_device().unwrap();

        assert_eq!(device.id, "virtual-things-2");
        assert_eq!(device.title, "Living Room");
        assert_eq!(device.properties["level"].maximum, Some(100.0));
    }

    #[test]
    fn test_extract_value() {
        let body = serde_json::json!({"on": true});
        assert_eq!(
            GatewayClient::extract_value(body, "on").unwrap(),
            PropertyValue::Bool(true)
        );

        let body = serde_json::json!({"level": 40});
        assert!(GatewayClient::extract_value(body, "on").is_err());
    }

    #[test]
    fn test_property_url_is_encoded() {
        let client = GatewayClient::new("http://gateway.local/", None).unwrap();
        let url = client.property_url(&PropertyRef {
            device_id: "zb 1".to_string(),
            property: "on".to_string(),
        });
        assert_eq!(url, "http://gateway.local/things/zb%201/properties/on");
    }
}
