//! IoT Hub client configuration

use crate::connection_string::ConnectionString;
use crate::error::{HubError, HubResult};
use chrono::Utc;
use edgesim_core::config::HubSettings;
use std::time::Duration;

/// MQTT API version appended to the username
pub const DEFAULT_API_VERSION: &str = "2021-04-12";

/// IoT Hub client configuration
#[derive(Debug, Clone)]
pub struct IotHubConfig {
    /// Device identity and key
    pub connection_string: ConnectionString,

    /// MQTT keep-alive interval
    pub keep_alive: Duration,

    /// Time allowed for CONNACK
    pub connect_timeout: Duration,

    /// Lifetime of the SAS token used as the password
    pub sas_ttl: Duration,

    /// API version sent in the username
    pub api_version: String,
}

impl IotHubConfig {
    pub fn new(connection_string: ConnectionString) -> Self {
        let defaults = HubSettings::default();
        Self {
            connection_string,
            keep_alive: Duration::from_secs(defaults.keep_alive_secs),
            connect_timeout: Duration::from_millis(defaults.connect_timeout_ms),
            sas_ttl: Duration::from_secs(defaults.sas_ttl_secs),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Build from the `[hub]` section of the simulator config
    pub fn from_settings(settings: &HubSettings) -> HubResult<Self> {
        let raw = settings.connection_string.as_deref().ok_or_else(|| {
            HubError::Config(
                "no connection string (set hub.connection_string or EDGESIM_CONNECTION_STRING)"
                    .to_string(),
            )
        })?;

        let config = Self {
            connection_string: raw.parse()?,
            keep_alive: Duration::from_secs(settings.keep_alive_secs),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            sas_ttl: Duration::from_secs(settings.sas_ttl_secs),
            api_version: DEFAULT_API_VERSION.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HubResult<()> {
        // rumqttc rejects keep-alive below 5 seconds
        if self.keep_alive < Duration::from_secs(5) {
            return Err(HubError::Config(format!(
                "keep-alive must be at least 5s, got {:?}",
                self.keep_alive
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(HubError::Config("connect timeout cannot be 0".to_string()));
        }
        if self.sas_ttl.is_zero() {
            return Err(HubError::Config("SAS token lifetime cannot be 0".to_string()));
        }
        self.token_expiry(Utc::now().timestamp())?;
        Ok(())
    }

    /// Unix time at which a token issued at `now` expires
    pub fn token_expiry(&self, now: i64) -> HubResult<i64> {
        i64::try_from(self.sas_ttl.as_secs())
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| {
                HubError::Config(format!(
                    "SAS token lifetime out of range: {}s",
                    self.sas_ttl.as_secs()
                ))
            })
    }

    /// MQTT username for the device identity
    pub fn username(&self) -> String {
        format!(
            "{}/{}/?api-version={}",
            self.connection_string.host_name, self.connection_string.device_id, self.api_version
        )
    }
}
