//! Device registry
//!
//! Owns the known devices keyed by id, in registration order, together with
//! their spoken tags. Any change to the tag set is reported to the caller so
//! the grammar can be rebuilt.

mod client;
mod debounce;
mod types;

use indexmap::IndexMap;

pub use client::{DeviceClient, GatewayClient};
pub use debounce::Debouncer;
pub use types::{Capability, Device, PropertyDescription, PropertyRef, PropertyValue};

/// Normalize a device title into its spoken tag
///
/// Lower-cases, turns punctuation into spaces and collapses whitespace
#[must_use]
pub fn normalize_device_name(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
struct Entry {
    device: Device,
    /// `None` once a later registration claimed the same tag
    tag: Option<String>,
}

/// Registry of devices that can be addressed by voice
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: IndexMap<String, Entry>,
}

impl DeviceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update a device
    ///
    /// Returns true if the tag set changed. When another device already owns
    /// the same tag, the latest registration takes it over.
    pub fn register(&mut self, device: Device) -> bool {
        let tag = normalize_device_name(&device.title);
        let tag = (!tag.is_empty()).then_some(tag);

        let previous_tag = self.devices.get(&device.id).and_then(|e| e.tag.clone());
        let mut changed = previous_tag != tag;

        if let Some(tag) = &tag {
            for (id, entry) in &mut self.devices {
                if *id != device.id && entry.tag.as_ref() == Some(tag) {
                    tracing::warn!(
                        tag,
                        previous = %id,
                        device = %device.id,
                        "device tag collision, latest registration wins"
                    );
                    entry.tag = None;
                    changed = true;
                }
            }
        }

        tracing::debug!(device = %device.id, tag = ?tag, "device registered");

        // IndexMap keeps the original position when the key already exists
        self.devices.insert(device.id.clone(), Entry { device, tag });
        changed
    }

    /// Remove a device; returns true if it carried a tag
    ///
    /// A freed tag goes back to the most recently registered device that
    /// lost it in a collision.
    pub fn unregister(&mut self, device_id: &str) -> bool {
        let Some(tag) = self.devices.shift_remove(device_id).and_then(|e| e.tag) else {
            return false;
        };

        if let Some((id, entry)) = self
            .devices
            .iter_mut()
            .rev()
            .find(|(_, e)| e.tag.is_none() && normalize_device_name(&e.device.title) == tag)
        {
            tracing::debug!(tag = %tag, device = %id, "device tag reclaimed");
            entry.tag = Some(tag);
        }
        true
    }

    /// Replace the registry contents with a fresh device listing
    ///
    /// New and changed devices are registered in listing order; devices
    /// missing from the listing are removed. Returns true if the tag set changed.
    pub fn sync(&mut self, devices: Vec<Device>) -> bool {
        let listed: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();
        let stale: Vec<String> = self
            .devices
            .keys()
            .filter(|id| !listed.contains(id))
            .cloned()
            .collect();

        let mut changed = false;
        for id in stale {
            changed |= self.unregister(&id);
        }

        for device in devices {
            let unchanged = self
                .devices
                .get(&device.id)
                .is_some_and(|e| e.device == device);
            if !unchanged {
                changed |= self.register(device);
            }
        }

        changed
    }

    /// Look up a device by id
    #[must_use]
    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id).map(|e| &e.device)
    }

    /// `(device id, tag)` pairs in registration order
    #[must_use]
    pub fn tags(&self) -> Vec<(String, String)> {
        self.devices
            .iter()
            .filter_map(|(id, e)| e.tag.clone().map(|t| (id.clone(), t)))
            .collect()
    }

    /// Tags only, in registration order
    #[must_use]
    pub fn tag_names(&self) -> Vec<String> {
        self.devices.values().filter_map(|e| e.tag.clone()).collect()
    }

    /// Find the property on a device that serves `capability`
    #[must_use]
    pub fn property(&self, device_id: &str, capability: Capability) -> Option<(PropertyRef, PropertyDescription)> {
        let device = self.get(device_id)?;
        device.property_for(capability).map(|(name, description)| {
            (
                PropertyRef {
                    device_id: device_id.to_string(),
                    property: name.to_string(),
                },
                description.clone(),
            )
        })
    }

    /// Number of registered devices
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
