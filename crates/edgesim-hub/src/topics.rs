//! MQTT topic layout for device identities

use url::form_urlencoded;

/// Filter for desired property patches
pub const DESIRED_PATCH_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";

const DESIRED_PATCH_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";

/// Topics for one device
#[derive(Debug, Clone)]
pub struct Topics {
    device_id: String,
}

impl Topics {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    /// Telemetry topic with the application and system properties appended
    pub fn telemetry(&self, properties: &[(String, String)]) -> String {
        format!(
            "devices/{}/messages/events/{}",
            self.device_id,
            property_bag(properties)
        )
    }

    /// Subscription filter for cloud-to-device messages
    pub fn cloud_to_device_filter(&self) -> String {
        format!("devices/{}/messages/devicebound/#", self.device_id)
    }

    fn cloud_to_device_prefix(&self) -> String {
        format!("devices/{}/messages/devicebound/", self.device_id)
    }

    /// Classify an inbound publish by topic
    pub fn classify(&self, topic: &str) -> Inbound {
        if let Some(bag) = topic.strip_prefix(&self.cloud_to_device_prefix()) {
            return Inbound::CloudMessage {
                properties: parse_property_bag(bag),
            };
        }

        if let Some(rest) = topic.strip_prefix(DESIRED_PATCH_PREFIX) {
            let version = rest
                .strip_prefix('?')
                .map(parse_property_bag)
                .and_then(|props| {
                    props
                        .into_iter()
                        .find(|(k, _)| k == "$version")
                        .and_then(|(_, v)| v.parse().ok())
                });
            return Inbound::DesiredPatch { version };
        }

        Inbound::Other
    }
}

/// Kind of an inbound publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    CloudMessage { properties: Vec<(String, String)> },
    DesiredPatch { version: Option<u64> },
    Other,
}

/// Encode properties as `k1=v1&k2=v2`
///
/// System properties (`$.` prefix) keep their key literal; their values are
/// expected to be encoded by the caller.
pub fn property_bag(properties: &[(String, String)]) -> String {
    properties
        .iter()
        .map(|(k, v)| {
            if k.starts_with("$.") {
                format!("{}={}", k, v)
            } else {
                format!("{}={}", encode(k), encode(v))
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn parse_property_bag(bag: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(bag.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}
