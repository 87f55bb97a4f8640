//! Process-wide handles built once from `AppConfig`.

use std::sync::Arc;

use crate::camera::{CameraControl, CameraError};
use crate::command::{CommandClient, CommandError};
use crate::config::AppConfig;
use crate::relay::{FrameRelay, RelayError};
use crate::telemetry::{TelemetryError, TelemetrySink, UbidotsSink};

/// Owns the frame relay, the optional broker client and the telemetry sink.
///
/// Pass it explicitly to whatever drives presentation.
pub struct AppContext {
    config: AppConfig,
    relay: FrameRelay,
    commands: Option<CommandClient>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
}

impl AppContext {
    /// Nothing touches the network here.
    pub fn new(config: AppConfig) -> Result<Self, TelemetryError> {
        let telemetry = match UbidotsSink::from_config(&config.telemetry)? {
            Some(sink) => {
                log::info!("Telemetry mirror enabled ({})", sink.url());
                Some(Arc::new(sink) as Arc<dyn TelemetrySink>)
            }
            None => {
                log::info!("Telemetry mirror disabled");
                None
            }
        };
        Ok(Self::with_telemetry(config, telemetry))
    }

    pub fn with_telemetry(config: AppConfig, telemetry: Option<Arc<dyn TelemetrySink>>) -> Self {
        Self {
            relay: FrameRelay::new(config.relay.clone()),
            config,
            commands: None,
            telemetry,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn relay(&self) -> &FrameRelay {
        &self.relay
    }

    pub fn relay_mut(&mut self) -> &mut FrameRelay {
        &mut self.relay
    }

    /// Start the relay against the configured stream address.
    pub fn start_relay(&mut self) -> Result<(), RelayError> {
        let url = self.config.relay.url.clone();
        self.relay.start(&url)
    }

    /// Connect the command client if not already connected.
    pub async fn connect_broker(&mut self) -> Result<&CommandClient, CommandError> {
        if self.commands.is_none() {
            let client = CommandClient::connect(&self.config.broker, self.telemetry.clone()).await?;
            self.commands = Some(client);
        }
        self.commands
            .as_ref()
            .ok_or_else(|| CommandError::Connect("broker client unavailable".to_string()))
    }

    pub fn commands(&self) -> Option<&CommandClient> {
        self.commands.as_ref()
    }

    pub fn telemetry(&self) -> Option<Arc<dyn TelemetrySink>> {
        self.telemetry.clone()
    }

    pub fn camera(&self) -> Result<CameraControl, CameraError> {
        CameraControl::from_config(&self.config.camera)
    }

    /// Stop the relay and close the broker session.
    pub async fn shutdown(mut self) {
        self.relay.shutdown().await;
        if let Some(commands) = self.commands.take() {
            commands.shutdown().await;
        }
    }
}
