//! Device session - owns the client and drives startup, the telemetry loop and shutdown

use crate::client::{ClientResult, CloudMessage, DeviceClient, PropertyPatch};
use crate::readings::{evaluate, generate, transform, StartupMetadata};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay after each published batch
    pub interval: Duration,

    /// Number of iterations to run (0 = until stopped)
    pub max_iterations: u64,

    /// Metadata sent once at startup
    pub metadata: StartupMetadata,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_iterations: 0,
            metadata: StartupMetadata::default(),
        }
    }
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// The stop signal fired
    Interrupted,
    /// `max_iterations` was reached
    Completed,
}

/// Summary returned by a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub exit: SessionExit,
    pub iterations: u64,
    pub messages_sent: u64,
}

/// A single device session
///
/// `run` consumes the session and always shuts the client down before
/// returning, whichever way the loop ended.
pub struct Session<C: DeviceClient> {
    client: C,
    config: SessionConfig,
    rng: StdRng,
    iterations: u64,
    messages_sent: u64,
}

impl<C: DeviceClient> Session<C> {
    pub fn new(client: C, config: SessionConfig) -> Self {
        Self {
            client,
            config,
            rng: StdRng::from_os_rng(),
            iterations: 0,
            messages_sent: 0,
        }
    }

    /// Use a specific random source (for reproducible runs)
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Run until `stop` resolves, `max_iterations` is reached, or an error occurs
    pub async fn run<S>(mut self, stop: S) -> ClientResult<SessionReport>
    where
        S: Future<Output = ()>,
    {
        info!("Industrial edge device starting up ({})", self.client.name());

        let outcome = tokio::select! {
            result = self.drive() => result,
            _ = stop => {
                info!("Simulation stopped by user");
                Ok(SessionExit::Interrupted)
            }
        };

        if let Err(e) = &outcome {
            error!("Telemetry loop failed: {}", e);
        }

        let closed = self.client.shutdown().await;
        match &closed {
            Ok(()) => info!("Device disconnected ({})", self.client.name()),
            Err(e) => error!("Shutdown failed: {}", e),
        }

        // A loop error takes precedence over a shutdown error
        let exit = outcome?;
        closed?;

        Ok(SessionReport {
            exit,
            iterations: self.iterations,
            messages_sent: self.messages_sent,
        })
    }

    async fn drive(&mut self) -> ClientResult<SessionExit> {
        self.start_up().await?;

        info!(
            "Sending industrial telemetry every {:?}...",
            self.config.interval
        );

        loop {
            self.iterate().await?;
            self.iterations += 1;

            if self.config.max_iterations > 0 && self.iterations >= self.config.max_iterations {
                info!("Completed {} iterations", self.iterations);
                return Ok(SessionExit::Completed);
            }

            tokio::time::sleep(self.config.interval).await;
        }
    }

    async fn start_up(&mut self) -> ClientResult<()> {
        self.client.send_startup(&self.config.metadata).await?;
        self.messages_sent += 1;
        info!(
            device = %self.config.metadata.device,
            location = %self.config.metadata.location,
            "Sent device startup metadata"
        );

        self.client
            .on_property_patch(Arc::new(|patch: PropertyPatch| {
                info!(
                    version = ?patch.version,
                    "Desired properties updated from cloud: {}",
                    patch.body
                );
            }))
            .await?;

        self.client
            .on_cloud_message(Arc::new(|message: CloudMessage| {
                info!("Cloud-to-device message received: {}", message.text());
            }))
            .await?;

        debug!("Inbound handlers registered");
        Ok(())
    }

    async fn iterate(&mut self) -> ClientResult<()> {
        let raw = generate(&mut self.rng);
        info!("Raw sensor data: {}", raw);

        let preprocessed = transform(&raw);
        info!("Preprocessed: {}", preprocessed);

        for reading in evaluate(&preprocessed, &mut self.rng) {
            self.client.send_reading(&reading).await?;
            self.messages_sent += 1;
            info!(
                sensor = %reading.sensor,
                value = reading.value,
                cpu_delay_ms = reading.cpu_delay_ms,
                anomaly = reading.anomaly,
                "Sent telemetry"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MessageKind;
    use crate::readings::Sensor;
    use crate::recording::RecordingClient;

    fn config(max_iterations: u64) -> SessionConfig {
        SessionConfig {
            interval: Duration::from_secs(5),
            max_iterations,
            metadata: StartupMetadata::default(),
        }
    }

    fn seeded<C: DeviceClient>(client: C, config: SessionConfig) -> Session<C> {
        Session::new(client, config).with_rng(StdRng::seed_from_u64(42))
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_run_completes() {
        let client = RecordingClient::new();
        let report = seeded(client.clone(), config(2))
            .run(std::future::pending::<()>())
            .await
            .unwrap();

        assert_eq!(report.exit, SessionExit::Completed);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.messages_sent, 11);
        assert_eq!(client.startups().len(), 1);
        assert_eq!(client.readings().len(), 2 * Sensor::ALL.len());
        assert_eq!(client.shutdown_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_precedes_telemetry() {
        let client = RecordingClient::new();
        seeded(client.clone(), config(1))
            .run(std::future::pending::<()>())
            .await
            .unwrap();

        let messages = client.messages();
        assert_eq!(messages[0].kind, MessageKind::Startup);
        assert!(messages[1..]
            .iter()
            .all(|m| m.kind == MessageKind::Telemetry));
        assert!(client.has_cloud_handler());
        assert!(client.has_patch_handler());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_shuts_down_once() {
        let client = RecordingClient::new();
        let stop = tokio::time::sleep(Duration::from_secs(12));
        let report = seeded(client.clone(), config(0)).run(stop).await.unwrap();

        // Iterations publish at t=0s, 5s and 10s; the stop fires at 12s
        assert_eq!(report.exit, SessionExit::Interrupted);
        assert_eq!(report.iterations, 3);
        assert_eq!(client.readings().len(), 15);
        assert_eq!(client.shutdown_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_error_shuts_down_once() {
        let client = RecordingClient::new().failing_after(7);
        let result = seeded(client.clone(), config(0))
            .run(std::future::pending::<()>())
            .await;

        assert!(result.is_err());
        assert_eq!(client.readings().len(), 7);
        assert_eq!(client.shutdown_calls(), 1);
    }

    #[tokio::test]
    async fn test_startup_error_shuts_down_once() {
        let client = RecordingClient::new().failing_startup();
        let result = seeded(client.clone(), config(0))
            .run(std::future::pending::<()>())
            .await;

        assert!(result.is_err());
        assert!(client.readings().is_empty());
        assert!(!client.has_cloud_handler());
        assert_eq!(client.shutdown_calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_error_is_reported() {
        let client = RecordingClient::new().failing_shutdown();
        let result = seeded(client.clone(), config(1))
            .run(std::future::pending::<()>())
            .await;

        assert!(result.is_err());
        assert_eq!(client.readings().len(), 5);
        assert_eq!(client.shutdown_calls(), 1);
    }

    #[tokio::test]
    async fn test_loop_error_wins_over_shutdown_error() {
        let client = RecordingClient::new().failing_after(0).failing_shutdown();
        let err = seeded(client.clone(), config(0))
            .run(std::future::pending::<()>())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("injected failure"));
        assert_eq!(client.shutdown_calls(), 1);
    }

    #[tokio::test]
    async fn test_registered_handlers_only_log() {
        let client = RecordingClient::new();
        seeded(client.clone(), config(1))
            .run(std::future::pending::<()>())
            .await
            .unwrap();

        assert!(client.deliver_cloud_message(CloudMessage::new("reboot")));
        assert!(client.deliver_property_patch(PropertyPatch {
            version: Some(3),
            body: serde_json::json!({"telemetryInterval": 10}),
        }));
        // Nothing inbound is ever sent back
        assert_eq!(client.messages().len(), 6);
    }
}
