//! Speaker command client
//!
//! Keeps one authenticated broker connection alive on a background task and
//! publishes MP3 player commands with an immediate success/failure result.
//!
//! # Connection lifecycle
//!
//! - Construction connects synchronously; failure there is returned to the caller
//! - A dropped connection is retried after 1, 2, 4 ... 60s, at most 12 times
//! - Exhausting the attempts leaves the client in `Failed` for good
//! - Publishing while not `Connected` fails at once instead of queueing
//!
//! A successful result means the message was queued on the connection at
//! QoS 1. It does not confirm the speaker executed it.

mod driver;
mod link;
mod speaker;
mod state;

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};

pub use link::{
    mqtt_transport, BrokerLink, CommandPublisher, LinkError, LinkEvent, MqttLink, MqttPublisher,
};
pub use speaker::{CommandResult, SpeakerCommand, MAX_VOLUME};
pub use state::{ConnectionState, Transition};

use crate::backoff::Backoff;
use crate::config::{BrokerConfig, ConfigError};
use crate::telemetry::TelemetrySink;
use driver::{wait_for_connack, ConnectionDriver};
use state::StateTracker;

/// How long shutdown waits for telemetry mirrors still in flight.
const MIRROR_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("broker configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Settings the client needs beyond the transport itself.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Device id used in topic paths
    pub device: String,
    pub connect_timeout: Duration,
    pub reconnect: Backoff,
}

impl ClientOptions {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            device: config.device.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs.max(1)),
            reconnect: Backoff::from(&config.reconnect),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&BrokerConfig::default())
    }
}

/// Publishes speaker commands over a self-healing broker connection.
pub struct CommandClient {
    device: String,
    publisher: Arc<dyn CommandPublisher>,
    state: watch::Receiver<ConnectionState>,
    transitions: broadcast::Sender<Transition>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    mirrors: Mutex<JoinSet<()>>,
    runtime: Handle,
    shutdown_tx: watch::Sender<()>,
    driver: Option<JoinHandle<()>>,
}

impl CommandClient {
    /// Connect to the MQTT broker described by `config`.
    pub async fn connect(
        config: &BrokerConfig,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Result<Self, CommandError> {
        config.validate()?;
        log::info!("Connecting to broker {}:{}", config.host, config.port);
        let (publisher, link) = mqtt_transport(config);
        Self::connect_with(
            Arc::new(publisher),
            Box::new(link),
            ClientOptions::from_config(config),
            telemetry,
        )
        .await
    }

    /// Connect over an arbitrary transport pair.
    pub async fn connect_with(
        publisher: Arc<dyn CommandPublisher>,
        mut link: Box<dyn BrokerLink>,
        options: ClientOptions,
        telemetry: Option<Arc<dyn TelemetrySink>>,
    ) -> Result<Self, CommandError> {
        let (tracker, state_rx) = StateTracker::new(ConnectionState::Disconnected);
        tracker.transition(ConnectionState::Connecting);

        let connected =
            tokio::time::timeout(options.connect_timeout, wait_for_connack(link.as_mut())).await;
        let failure = match connected {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "no CONNACK within {}s",
                options.connect_timeout.as_secs()
            )),
        };
        if let Some(reason) = failure {
            log::error!("Failed to connect to broker: {}", reason);
            tracker.transition(ConnectionState::Disconnected);
            return Err(CommandError::Connect(reason));
        }
        tracker.transition(ConnectionState::Connected);
        let transitions = tracker.changes();

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let driver = ConnectionDriver {
            link,
            state: tracker,
            backoff: options.reconnect,
        };
        let driver = tokio::spawn(driver.run(shutdown_rx));

        Ok(Self {
            device: options.device,
            publisher,
            state: state_rx,
            transitions,
            telemetry,
            mirrors: Mutex::new(JoinSet::new()),
            runtime: Handle::current(),
            shutdown_tx,
            driver: Some(driver),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions, e.g. to show a "restart required" banner.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Every transition from now on, in order, without coalescing.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    pub fn play_test_sound(&self) -> CommandResult {
        self.send(SpeakerCommand::PlayTestSound)
    }

    pub fn stop_sound(&self) -> CommandResult {
        self.send(SpeakerCommand::StopSound)
    }

    pub fn set_default_sound_file(&self, file_number: i64) -> CommandResult {
        self.send_checked(SpeakerCommand::set_default_sound_file(file_number))
    }

    /// Volume 0..=30. Out-of-range values never reach the broker.
    pub fn set_volume(&self, level: i64) -> CommandResult {
        self.send_checked(SpeakerCommand::set_volume(level))
    }

    pub fn play_sound_file(&self, file_number: i64) -> CommandResult {
        self.send_checked(SpeakerCommand::play_sound_file(file_number))
    }

    fn send_checked(&self, command: Result<SpeakerCommand, CommandError>) -> CommandResult {
        match command {
            Ok(command) => self.send(command),
            Err(e) => {
                log::warn!("Rejected speaker command: {}", e);
                CommandResult::failed(e.to_string())
            }
        }
    }

    /// Publish `command` at QoS 1 without waiting on the network.
    pub fn send(&self, command: SpeakerCommand) -> CommandResult {
        let topic = command.topic(&self.device);

        let state = self.state();
        if !state.is_connected() {
            log::error!("Not publishing to {}: broker is {}", topic, state);
            return CommandResult::failed(format!(
                "Broker is {}, message to topic {} not sent",
                state, topic
            ));
        }

        let payload = command.payload().to_string().into_bytes();
        match self.publisher.try_publish(&topic, payload) {
            Ok(()) => {
                log::info!("Successfully published to {}", topic);
                self.mirror(&command);
                CommandResult::ok(command.success_message())
            }
            Err(e) => {
                log::error!("Failed to publish to {}: {}", topic, e);
                CommandResult::failed(format!("Failed to send message to topic {}", topic))
            }
        }
    }

    fn mirror(&self, command: &SpeakerCommand) {
        let (Some(sink), Some((key, value))) = (&self.telemetry, command.telemetry()) else {
            return;
        };
        let sink = sink.clone();
        let mut mirrors = self.mirrors.lock().unwrap_or_else(|e| e.into_inner());
        while mirrors.try_join_next().is_some() {}
        mirrors.spawn_on(
            async move {
                if let Err(e) = sink.send(json!({ key: value })).await {
                    log::warn!("Error sending {} to telemetry: {}", key, e);
                }
            },
            &self.runtime,
        );
    }

    /// Give in-flight telemetry mirrors a bounded chance to finish.
    async fn drain_mirrors(&self) {
        let mut mirrors = {
            let mut guard = self.mirrors.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if mirrors.is_empty() {
            return;
        }
        let drained = async { while mirrors.join_next().await.is_some() {} };
        if tokio::time::timeout(MIRROR_GRACE, drained).await.is_err() {
            log::warn!("Telemetry mirror still pending at shutdown, dropping it");
        }
    }

    /// Stop the network loop and close the broker session.
    pub async fn shutdown(mut self) {
        self.drain_mirrors().await;
        self.publisher.disconnect();
        let _ = self.shutdown_tx.send(());
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                log::warn!("Broker network loop ended abnormally: {}", e);
            }
        }
        log::info!("Broker client shut down");
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        if self.driver.take().is_some() {
            self.publisher.disconnect();
            let _ = self.shutdown_tx.send(());
        }
        // Mirrors stay best-effort after a plain drop
        self.mirrors
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .detach_all();
    }
}
