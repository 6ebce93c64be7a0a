//! IoT Hub device client over MQTT
//!
//! One background task owns the rumqttc event loop. It dispatches inbound
//! publishes to the registered handlers and records the first fatal error;
//! every later send reports that error instead of silently queueing.

use crate::config::IotHubConfig;
use crate::error::{HubError, HubResult};
use crate::sas::generate_sas_token;
use crate::topics::{Inbound, Topics, DESIRED_PATCH_FILTER};
use async_trait::async_trait;
use chrono::Utc;
use edgesim_core::{
    ClientError, ClientResult, CloudMessage, CloudMessageHandler, DeviceClient, EvaluatedReading,
    OutboundMessage, PropertyPatch, PropertyPatchHandler, StartupMetadata,
};
use parking_lot::{Mutex, RwLock};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};
use ulid::Ulid;

/// IoT Hub MQTT over TLS
const MQTT_TLS_PORT: u16 = 8883;

/// IoT Hub message size limit
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Capacity of the request channel between client and event loop
const REQUEST_CAPACITY: usize = 64;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Message counters
#[derive(Debug, Default)]
pub struct HubStats {
    sent: AtomicU64,
    acknowledged: AtomicU64,
    received: AtomicU64,
}

impl HubStats {
    /// Messages handed to the event loop
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// PUBACKs received from the hub
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }

    /// Inbound publishes (C2D messages and twin patches)
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct Handlers {
    cloud: RwLock<Option<CloudMessageHandler>>,
    patch: RwLock<Option<PropertyPatchHandler>>,
}

/// State shared with the event loop task
struct Shared {
    topics: Topics,
    handlers: Handlers,
    failure: Mutex<Option<String>>,
    closing: AtomicBool,
    stats: HubStats,
}

/// Device client connected to Azure IoT Hub
pub struct IotHubClient {
    client: AsyncClient,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IotHubClient {
    /// Connect and wait for the hub to accept the session
    pub async fn connect(config: IotHubConfig) -> HubResult<Self> {
        config.validate()?;
        let cs = &config.connection_string;

        let expiry = config.token_expiry(Utc::now().timestamp())?;
        let password = generate_sas_token(&cs.resource_uri(), &cs.shared_access_key, expiry)?;

        let mut options = MqttOptions::new(cs.device_id.clone(), cs.endpoint_host(), MQTT_TLS_PORT);
        options.set_credentials(config.username(), password);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(false);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options.set_transport(Transport::tls_with_default_config());

        info!(
            "Connecting to {} as {}",
            cs.endpoint_host(),
            cs.device_id
        );

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        match timeout(config.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(result) => result?,
            Err(_) => return Err(HubError::Timeout(config.connect_timeout)),
        }
        info!("Connected to IoT Hub");

        let shared = Arc::new(Shared {
            topics: Topics::new(cs.device_id.clone()),
            handlers: Handlers::default(),
            failure: Mutex::new(None),
            closing: AtomicBool::new(false),
            stats: HubStats::default(),
        });

        let task = tokio::spawn(run_event_loop(eventloop, shared.clone()));

        Ok(Self {
            client,
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn stats(&self) -> &HubStats {
        &self.shared.stats
    }

    fn ensure_open(&self) -> ClientResult<()> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if let Some(reason) = self.shared.failure.lock().clone() {
            return Err(HubError::ConnectionLost(reason).into());
        }
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> ClientResult<()> {
        self.ensure_open()?;

        let properties = with_system_properties(message.properties, Ulid::new());
        let topic = self.shared.topics.telemetry(&properties);
        trace!("Publishing to {}", topic);

        self.client
            .publish(topic, QoS::AtLeastOnce, false, message.body.into_bytes())
            .await
            .map_err(HubError::from)?;
        self.shared.stats.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn subscribe(&self, filter: String) -> ClientResult<()> {
        self.ensure_open()?;
        debug!("Subscribing to {}", filter);
        self.client
            .subscribe(filter.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| ClientError::Subscribe(format!("{}: {}", filter, e)))
    }
}

#[async_trait]
impl DeviceClient for IotHubClient {
    fn name(&self) -> &str {
        "iothub"
    }

    async fn send_startup(&self, metadata: &StartupMetadata) -> ClientResult<()> {
        self.publish(OutboundMessage::startup(metadata)?).await
    }

    async fn send_reading(&self, reading: &EvaluatedReading) -> ClientResult<()> {
        self.publish(OutboundMessage::telemetry(reading)?).await
    }

    async fn on_cloud_message(&self, handler: CloudMessageHandler) -> ClientResult<()> {
        *self.shared.handlers.cloud.write() = Some(handler);
        self.subscribe(self.shared.topics.cloud_to_device_filter())
            .await
    }

    async fn on_property_patch(&self, handler: PropertyPatchHandler) -> ClientResult<()> {
        *self.shared.handlers.patch.write() = Some(handler);
        self.subscribe(DESIRED_PATCH_FILTER.to_string()).await
    }

    async fn shutdown(&self) -> ClientResult<()> {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Disconnecting from IoT Hub");

        let disconnect = self.client.disconnect().await;

        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if timeout(SHUTDOWN_TIMEOUT, &mut task).await.is_err() {
                warn!("MQTT event loop did not stop in time, aborting");
                task.abort();
            }
        }

        match disconnect {
            Ok(()) => Ok(()),
            // The event loop is already gone; nothing left to close
            Err(e) if self.shared.failure.lock().is_some() => {
                debug!("Disconnect after connection loss: {}", e);
                Ok(())
            }
            Err(e) => Err(HubError::from(e).into()),
        }
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> HubResult<()> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(HubError::Refused(format!("{:?}", ack.code)));
            }
            event => trace!("Pre-connect event: {:?}", event),
        }
    }
}

async fn run_event_loop(mut eventloop: EventLoop, shared: Arc<Shared>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                shared.stats.received.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = dispatch(&shared, &publish.topic, publish.payload.to_vec()) {
                    error!("Failed to handle message on {}: {}", publish.topic, e);
                    *shared.failure.lock() = Some(e.to_string());
                    break;
                }
            }
            Ok(Event::Incoming(Packet::PubAck(_))) => {
                shared.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnect sent, stopping event loop");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if shared.closing.load(Ordering::SeqCst) {
                    debug!("Event loop closed: {}", e);
                } else {
                    error!("IoT Hub connection lost: {}", e);
                    *shared.failure.lock() = Some(e.to_string());
                }
                break;
            }
        }
    }
}

/// Route one inbound publish to its handler
fn dispatch(shared: &Shared, topic: &str, payload: Vec<u8>) -> HubResult<()> {
    match shared.topics.classify(topic) {
        Inbound::CloudMessage { properties } => {
            let handler = shared.handlers.cloud.read().clone();
            match handler {
                Some(handler) => handler(CloudMessage {
                    payload,
                    properties,
                }),
                None => debug!("No cloud message handler, dropping message"),
            }
        }
        Inbound::DesiredPatch { version } => {
            let body: serde_json::Value = serde_json::from_slice(&payload)?;
            let handler = shared.handlers.patch.read().clone();
            match handler {
                Some(handler) => handler(PropertyPatch { version, body }),
                None => debug!("No property patch handler, dropping patch"),
            }
        }
        Inbound::Other => debug!("Ignoring publish on {}", topic),
    }
    Ok(())
}

/// Append message id, content type and encoding
fn with_system_properties(mut properties: Vec<(String, String)>, id: Ulid) -> Vec<(String, String)> {
    properties.push(("$.mid".to_string(), id.to_string()));
    properties.push(("$.ct".to_string(), "application%2Fjson".to_string()));
    properties.push(("$.ce".to_string(), "utf-8".to_string()));
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn shared() -> Shared {
        Shared {
            topics: Topics::new("d1"),
            handlers: Handlers::default(),
            failure: Mutex::new(None),
            closing: AtomicBool::new(false),
            stats: HubStats::default(),
        }
    }

    #[test]
    fn test_system_properties_follow_application_properties() {
        let id = Ulid::new();
        let props = with_system_properties(
            vec![("sensor_type".to_string(), "TORQUE".to_string())],
            id,
        );
        let topic = Topics::new("d1").telemetry(&props);
        assert_eq!(
            topic,
            format!(
                "devices/d1/messages/events/sensor_type=TORQUE&$.mid={}&$.ct=application%2Fjson&$.ce=utf-8",
                id
            )
        );
    }

    #[test]
    fn test_dispatch_cloud_message() {
        let shared = shared();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        *shared.handlers.cloud.write() = Some(Arc::new(move |msg: CloudMessage| {
            sink.lock().push(msg.text().into_owned());
        }));

        dispatch(&shared, "devices/d1/messages/devicebound/k=v", b"reboot".to_vec()).unwrap();
        assert_eq!(*seen.lock(), vec!["reboot".to_string()]);
    }

    #[test]
    fn test_dispatch_desired_patch() {
        let shared = shared();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        *shared.handlers.patch.write() = Some(Arc::new(move |patch: PropertyPatch| {
            *sink.lock() = Some(patch);
        }));

        dispatch(
            &shared,
            "$iothub/twin/PATCH/properties/desired/?$version=3",
            br#"{"interval":10}"#.to_vec(),
        )
        .unwrap();

        let patch = seen.lock().clone().unwrap();
        assert_eq!(patch.version, Some(3));
        assert_eq!(patch.body["interval"], 10);
    }

    #[test]
    fn test_dispatch_malformed_patch_fails() {
        let shared = shared();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        *shared.handlers.patch.write() = Some(Arc::new(move |_: PropertyPatch| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let result = dispatch(
            &shared,
            "$iothub/twin/PATCH/properties/desired/?$version=4",
            b"not json".to_vec(),
        );
        assert!(matches!(result, Err(HubError::Serialization(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_without_handler_is_ok() {
        let shared = shared();
        assert!(dispatch(&shared, "devices/d1/messages/devicebound/", b"x".to_vec()).is_ok());
        assert!(dispatch(&shared, "devices/other/messages/devicebound/", b"x".to_vec()).is_ok());
    }
}
