//! JSONL file client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edgesim_core::config::RecordSettings;
use edgesim_core::{
    ClientError, ClientResult, CloudMessageHandler, DeviceClient, EvaluatedReading, MessageKind,
    OutboundMessage, PropertyPatchHandler, StartupMetadata,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// JSONL client configuration
#[derive(Debug, Clone)]
pub struct JsonlClientConfig {
    /// Output file path
    pub path: PathBuf,

    /// Whether to append to existing file
    pub append: bool,

    /// Pretty print JSON (one record then spans several lines)
    pub pretty: bool,

    /// Flush after each write
    pub flush_each: bool,
}

impl Default for JsonlClientConfig {
    fn default() -> Self {
        Self::from(&RecordSettings::default())
    }
}

impl From<&RecordSettings> for JsonlClientConfig {
    fn from(settings: &RecordSettings) -> Self {
        Self {
            path: PathBuf::from(&settings.path),
            append: settings.append,
            pretty: settings.pretty,
            flush_each: settings.flush_each,
        }
    }
}

/// One line of output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonlRecord {
    pub ts: DateTime<Utc>,
    pub kind: MessageKind,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub body: serde_json::Value,
}

impl JsonlRecord {
    fn from_message(message: &OutboundMessage) -> ClientResult<Self> {
        let properties = message
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();

        Ok(Self {
            ts: Utc::now(),
            kind: message.kind,
            properties,
            body: serde_json::from_str(&message.body)?,
        })
    }
}

/// Device client that writes every outbound message to a JSONL file
pub struct JsonlClient {
    config: JsonlClientConfig,
    writer: Mutex<Option<BufWriter<File>>>,
    messages_written: AtomicU64,
}

impl JsonlClient {
    /// Open (or create) the output file
    pub fn open(config: JsonlClientConfig) -> ClientResult<Self> {
        let file = if config.append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)?
        } else {
            File::create(&config.path)?
        };
        info!("JSONL client writing to: {:?}", config.path);

        Ok(Self {
            config,
            writer: Mutex::new(Some(BufWriter::new(file))),
            messages_written: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn messages_written(&self) -> u64 {
        self.messages_written.load(Ordering::Relaxed)
    }

    fn write(&self, message: &OutboundMessage) -> ClientResult<()> {
        let record = JsonlRecord::from_message(message)?;
        let json = if self.config.pretty {
            serde_json::to_string_pretty(&record)?
        } else {
            serde_json::to_string(&record)?
        };

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(ClientError::Closed)?;
        writeln!(writer, "{}", json)?;
        if self.config.flush_each {
            writer.flush()?;
        }

        self.messages_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl DeviceClient for JsonlClient {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn send_startup(&self, metadata: &StartupMetadata) -> ClientResult<()> {
        self.write(&OutboundMessage::startup(metadata)?)
    }

    async fn send_reading(&self, reading: &EvaluatedReading) -> ClientResult<()> {
        self.write(&OutboundMessage::telemetry(reading)?)
    }

    async fn on_cloud_message(&self, _handler: CloudMessageHandler) -> ClientResult<()> {
        debug!("JSONL client receives no cloud-to-device messages");
        Ok(())
    }

    async fn on_property_patch(&self, _handler: PropertyPatchHandler) -> ClientResult<()> {
        debug!("JSONL client receives no property patches");
        Ok(())
    }

    async fn shutdown(&self) -> ClientResult<()> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush()?;
            info!(
                "JSONL client closed after {} messages",
                self.messages_written()
            );
        }
        Ok(())
    }
}
