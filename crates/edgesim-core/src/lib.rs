//! edgesim core - sensor model, pipeline stages, and the device session
//!
//! This crate provides the building blocks shared by every transport:
//!
//! - **Readings**: sensor table, reading generation, scaling and anomaly evaluation
//! - **Client**: the `DeviceClient` trait implemented by each transport adapter
//! - **Session**: the startup → telemetry loop → shutdown lifecycle
//! - **Config**: TOML configuration with environment overrides
//! - **Recording**: an in-memory client used by tests and the self-test command

pub mod client;
pub mod config;
pub mod readings;
pub mod recording;
pub mod session;

// Re-export commonly used types
pub use client::{
    ClientError, ClientResult, CloudMessage, CloudMessageHandler, DeviceClient, MessageKind,
    OutboundMessage, PropertyPatch, PropertyPatchHandler,
};
pub use config::{ConfigLoader, SimulatorConfig};
pub use readings::{EvaluatedReading, Readings, Sensor, StartupMetadata};
pub use recording::RecordingClient;
pub use session::{Session, SessionConfig, SessionExit, SessionReport};

/// Simulator version
pub const SIMULATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
