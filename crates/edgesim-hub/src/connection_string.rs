//! Device connection string parsing

use crate::error::{HubError, HubResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Parsed device connection string
///
/// Only symmetric-key device identities are supported.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// IoT Hub host, e.g. `my-hub.azure-devices.net`
    pub host_name: String,

    /// Device identity
    pub device_id: String,

    /// Base64 shared access key
    pub shared_access_key: String,

    /// Edge gateway to connect through instead of the hub
    pub gateway_host_name: Option<String>,
}

impl ConnectionString {
    /// Host the MQTT connection is opened to
    pub fn endpoint_host(&self) -> &str {
        self.gateway_host_name.as_deref().unwrap_or(&self.host_name)
    }

    /// Resource the SAS token is scoped to
    pub fn resource_uri(&self) -> String {
        format!("{}/devices/{}", self.host_name, self.device_id)
    }

    /// Connection string with the shared access key masked
    pub fn redacted(&self) -> String {
        let mut out = format!(
            "HostName={};DeviceId={};SharedAccessKey=***",
            self.host_name, self.device_id
        );
        if let Some(gateway) = &self.gateway_host_name {
            out.push_str(&format!(";GatewayHostName={}", gateway));
        }
        out
    }
}

impl FromStr for ConnectionString {
    type Err = HubError;

    fn from_str(s: &str) -> HubResult<Self> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;
        let mut gateway_host_name = None;

        for part in s.trim().split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                HubError::ConnectionString(format!("segment without '=': {}", key_only(part)))
            })?;

            match key {
                "HostName" => host_name = Some(value.to_string()),
                "DeviceId" => device_id = Some(value.to_string()),
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                "GatewayHostName" => gateway_host_name = Some(value.to_string()),
                "ModuleId" => {
                    return Err(HubError::ConnectionString(
                        "module identities are not supported".to_string(),
                    ))
                }
                "x509" => {
                    return Err(HubError::ConnectionString(
                        "x509 authentication is not supported".to_string(),
                    ))
                }
                other => debug!("Ignoring connection string field: {}", other),
            }
        }

        let host_name = required(host_name, "HostName")?;
        let device_id = required(device_id, "DeviceId")?;
        let shared_access_key = required(shared_access_key, "SharedAccessKey")?;

        // Reject keys that cannot sign a token before any connection attempt
        STANDARD.decode(&shared_access_key)?;

        Ok(Self {
            host_name,
            device_id,
            shared_access_key,
            gateway_host_name,
        })
    }
}

// Never echo the value of a segment, it may be the key
fn key_only(segment: &str) -> &str {
    if segment.len() > 16 {
        "<redacted>"
    } else {
        segment
    }
}

fn required(value: Option<String>, name: &str) -> HubResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| HubError::ConnectionString(format!("missing {}", name)))
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("shared_access_key", &"***")
            .field("gateway_host_name", &self.gateway_host_name)
            .finish()
    }
}
