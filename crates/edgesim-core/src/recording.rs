//! In-memory device client
//!
//! Records everything the session sends and lets the caller push inbound
//! messages through the registered handlers. Clones share the same record,
//! so a handle kept outside the session can inspect it after the run.

use crate::client::{
    ClientError, ClientResult, CloudMessage, CloudMessageHandler, DeviceClient, OutboundMessage,
    PropertyPatch, PropertyPatchHandler,
};
use crate::readings::{EvaluatedReading, StartupMetadata};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct Recorded {
    messages: Vec<OutboundMessage>,
    readings: Vec<EvaluatedReading>,
    startups: Vec<StartupMetadata>,
    shutdown_calls: usize,
    cloud_handler: Option<CloudMessageHandler>,
    patch_handler: Option<PropertyPatchHandler>,
}

/// Failure injection for the recording client
#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    startup: bool,
    /// Fail the reading send after this many successful ones
    readings_after: Option<usize>,
    shutdown: bool,
}

/// Recording client
#[derive(Clone, Default)]
pub struct RecordingClient {
    inner: Arc<Mutex<Recorded>>,
    faults: Faults,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `send_startup`
    pub fn failing_startup(mut self) -> Self {
        self.faults.startup = true;
        self
    }

    /// Fail `send_reading` once `count` readings have been recorded
    pub fn failing_after(mut self, count: usize) -> Self {
        self.faults.readings_after = Some(count);
        self
    }

    /// Fail `shutdown` (the call is still counted)
    pub fn failing_shutdown(mut self) -> Self {
        self.faults.shutdown = true;
        self
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.inner.lock().messages.clone()
    }

    pub fn readings(&self) -> Vec<EvaluatedReading> {
        self.inner.lock().readings.clone()
    }

    pub fn startups(&self) -> Vec<StartupMetadata> {
        self.inner.lock().startups.clone()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.inner.lock().shutdown_calls
    }

    pub fn has_cloud_handler(&self) -> bool {
        self.inner.lock().cloud_handler.is_some()
    }

    pub fn has_patch_handler(&self) -> bool {
        self.inner.lock().patch_handler.is_some()
    }

    /// Deliver a cloud-to-device message. Returns false if no handler is registered.
    pub fn deliver_cloud_message(&self, message: CloudMessage) -> bool {
        // Clone the handler out so it runs without the lock held
        let handler = self.inner.lock().cloud_handler.clone();
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }

    /// Deliver a desired-property patch. Returns false if no handler is registered.
    pub fn deliver_property_patch(&self, patch: PropertyPatch) -> bool {
        let handler = self.inner.lock().patch_handler.clone();
        match handler {
            Some(handler) => {
                handler(patch);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl DeviceClient for RecordingClient {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_startup(&self, metadata: &StartupMetadata) -> ClientResult<()> {
        if self.faults.startup {
            return Err(ClientError::Send("injected startup failure".into()));
        }
        let message = OutboundMessage::startup(metadata)?;
        let mut recorded = self.inner.lock();
        recorded.messages.push(message);
        recorded.startups.push(metadata.clone());
        Ok(())
    }

    async fn send_reading(&self, reading: &EvaluatedReading) -> ClientResult<()> {
        let message = OutboundMessage::telemetry(reading)?;
        let mut recorded = self.inner.lock();
        if let Some(limit) = self.faults.readings_after {
            if recorded.readings.len() >= limit {
                return Err(ClientError::Send(format!(
                    "injected failure after {} readings",
                    limit
                )));
            }
        }
        recorded.messages.push(message);
        recorded.readings.push(reading.clone());
        Ok(())
    }

    async fn on_cloud_message(&self, handler: CloudMessageHandler) -> ClientResult<()> {
        self.inner.lock().cloud_handler = Some(handler);
        Ok(())
    }

    async fn on_property_patch(&self, handler: PropertyPatchHandler) -> ClientResult<()> {
        self.inner.lock().patch_handler = Some(handler);
        Ok(())
    }

    async fn shutdown(&self) -> ClientResult<()> {
        self.inner.lock().shutdown_calls += 1;
        if self.faults.shutdown {
            return Err(ClientError::Connection("injected shutdown failure".into()));
        }
        Ok(())
    }
}
