//! Device client interface
//!
//! Every transport (IoT Hub, JSONL file, in-memory recorder) implements
//! [`DeviceClient`]. The session only talks to this trait.

use crate::readings::{EvaluatedReading, StartupMetadata};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Client is closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Cloud-to-device message as delivered by the transport
#[derive(Debug, Clone, Default)]
pub struct CloudMessage {
    /// Raw payload bytes
    pub payload: Vec<u8>,

    /// Message properties carried alongside the payload
    pub properties: Vec<(String, String)>,
}

impl CloudMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            properties: Vec::new(),
        }
    }

    /// Payload decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Desired-property patch pushed by the cloud
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPatch {
    /// Twin version, when the transport reports one
    pub version: Option<u64>,

    /// Patch document
    pub body: serde_json::Value,
}

/// Handler invoked for every cloud-to-device message
pub type CloudMessageHandler = Arc<dyn Fn(CloudMessage) + Send + Sync>;

/// Handler invoked for every desired-property patch
pub type PropertyPatchHandler = Arc<dyn Fn(PropertyPatch) + Send + Sync>;

/// Kind of outbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Startup,
    Telemetry,
}

/// Serialized outbound message with its application properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub kind: MessageKind,

    /// Application properties, in the order they are attached
    pub properties: Vec<(String, String)>,

    /// JSON body
    pub body: String,
}

impl OutboundMessage {
    /// Startup metadata message, tagged `startup=true`
    pub fn startup(metadata: &StartupMetadata) -> ClientResult<Self> {
        Ok(Self {
            kind: MessageKind::Startup,
            properties: vec![("startup".to_string(), "true".to_string())],
            body: serde_json::to_string(metadata)?,
        })
    }

    /// Telemetry message, tagged with the sensor name and anomaly flag
    pub fn telemetry(reading: &EvaluatedReading) -> ClientResult<Self> {
        Ok(Self {
            kind: MessageKind::Telemetry,
            properties: vec![
                ("sensor_type".to_string(), reading.sensor.clone()),
                ("anomaly".to_string(), anomaly_tag(reading.anomaly).to_string()),
            ],
            body: serde_json::to_string(reading)?,
        })
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// String form of the anomaly flag used in message properties
pub fn anomaly_tag(anomaly: bool) -> &'static str {
    if anomaly {
        "True"
    } else {
        "False"
    }
}

/// Connection to the telemetry sink
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Transport name, for logging
    fn name(&self) -> &str;

    /// Send the one-time startup metadata message
    async fn send_startup(&self, metadata: &StartupMetadata) -> ClientResult<()>;

    /// Send one evaluated reading
    async fn send_reading(&self, reading: &EvaluatedReading) -> ClientResult<()>;

    /// Register the cloud-to-device message handler
    async fn on_cloud_message(&self, handler: CloudMessageHandler) -> ClientResult<()>;

    /// Register the desired-property patch handler
    async fn on_property_patch(&self, handler: PropertyPatchHandler) -> ClientResult<()>;

    /// Close the connection
    async fn shutdown(&self) -> ClientResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_message() {
        let msg = OutboundMessage::startup(&StartupMetadata::default()).unwrap();
        assert_eq!(msg.kind, MessageKind::Startup);
        assert_eq!(msg.property("startup"), Some("true"));
        assert!(msg.body.contains("\"type\":\"Industrial-Edge-Node\""));
    }

    #[test]
    fn test_telemetry_message_tags() {
        let reading = EvaluatedReading {
            sensor: "VIBRATION".to_string(),
            value: 1.92,
            cpu_delay_ms: 255.0,
            anomaly: true,
        };
        let msg = OutboundMessage::telemetry(&reading).unwrap();
        assert_eq!(msg.kind, MessageKind::Telemetry);
        assert_eq!(msg.property("sensor_type"), Some("VIBRATION"));
        assert_eq!(msg.property("anomaly"), Some("True"));
        let body: EvaluatedReading = serde_json::from_str(&msg.body).unwrap();
        assert_eq!(body, reading);
    }

    #[test]
    fn test_cloud_message_text_is_lossy() {
        let msg = CloudMessage::new(vec![b'o', b'k', 0xff]);
        assert_eq!(msg.text(), "ok\u{fffd}");
    }
}
