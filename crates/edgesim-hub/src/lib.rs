//! edgesim-hub - Azure IoT Hub transport
//!
//! Connects the simulated device to IoT Hub over MQTT 3.1.1 using a device
//! connection string with a shared access key.
//!
//! ## Features
//!
//! - **Connection strings** - parsing and validation of `HostName=...;DeviceId=...;SharedAccessKey=...`
//! - **SAS tokens** - HMAC-SHA256 signed tokens used as the MQTT password
//! - **Topics** - telemetry property bags, cloud-to-device and twin patch routing
//! - **Client** - [`IotHubClient`], the production `DeviceClient`
//!
//! ## Quick Start
//!
//! ```no_run
//! use edgesim_core::{Session, SessionConfig};
//! use edgesim_hub::{IotHubClient, IotHubConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IotHubConfig::new(
//!         "HostName=hub.azure-devices.net;DeviceId=edge-device;SharedAccessKey=c2VjcmV0".parse()?,
//!     );
//!     let client = IotHubClient::connect(config).await?;
//!
//!     let stop = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!     Session::new(client, SessionConfig::default()).run(stop).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection_string;
pub mod error;
pub mod sas;
pub mod topics;

// Re-exports for convenience
pub use client::{HubStats, IotHubClient};
pub use config::IotHubConfig;
pub use connection_string::ConnectionString;
pub use error::{HubError, HubResult};
