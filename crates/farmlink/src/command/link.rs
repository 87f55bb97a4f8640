//! Broker transport seam and its rumqttc implementation.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    Transport,
};
use std::time::Duration;

use crate::config::BrokerConfig;

/// Requests the client can queue while the event loop owns the socket.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// What one turn of the network loop produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Broker accepted the (re)connection
    Connected,
    /// Broker closed the session
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
    /// Acks, pings and other housekeeping
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection refused by broker: {0}")]
    Refused(String),

    #[error("publish rejected: {0}")]
    Publish(String),
}

/// The network half: drives the connection, one event per `poll`.
///
/// Polling again after an error attempts a reconnect.
#[async_trait]
pub trait BrokerLink: Send {
    async fn poll(&mut self) -> Result<LinkEvent, LinkError>;
}

/// The request half: queues outgoing messages without waiting on the network.
///
/// Implementations must be safe to call from several threads at once.
pub trait CommandPublisher: Send + Sync {
    /// Queue an at-least-once publish. Must not block.
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError>;

    /// Ask the broker session to close.
    fn disconnect(&self);
}

/// rumqttc event loop.
pub struct MqttLink {
    eventloop: EventLoop,
}

/// rumqttc request handle. `AsyncClient` is internally a channel sender and
/// can be shared across threads.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

/// Build the rumqttc client pair for `config`. Nothing touches the network
/// until the link is polled.
pub fn mqtt_transport(config: &BrokerConfig) -> (MqttPublisher, MqttLink) {
    let client_id = config
        .client_id
        .clone()
        .unwrap_or_else(|| format!("dashboard-{}", uuid::Uuid::new_v4()));
    log::info!("Initializing MQTT client with client id {}", client_id);

    let mut options = MqttOptions::new(client_id, config.host.as_str(), config.port);
    options.set_credentials(config.username.as_str(), config.password.as_str());
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    if config.tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
    (MqttPublisher { client }, MqttLink { eventloop })
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn poll(&mut self) -> Result<LinkEvent, LinkError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    Ok(LinkEvent::Connected)
                } else {
                    Err(LinkError::Refused(format!("{:?}", ack.code)))
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(LinkEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }),
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                log::debug!("Broker acknowledged message id {}", ack.pkid);
                Ok(LinkEvent::Other)
            }
            Ok(Event::Incoming(Packet::Disconnect)) => Ok(LinkEvent::Disconnected),
            Ok(_) => Ok(LinkEvent::Other),
            Err(ConnectionError::ConnectionRefused(code)) => {
                Err(LinkError::Refused(format!("{:?}", code)))
            }
            Err(e) => Err(LinkError::Connection(e.to_string())),
        }
    }
}

impl CommandPublisher for MqttPublisher {
    fn try_publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), LinkError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| LinkError::Publish(e.to_string()))
    }

    fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect request not queued: {}", e);
        }
    }
}
