//! Background network loop for the broker connection, including reconnects.

use std::time::Duration;
use tokio::sync::watch;

use super::link::{BrokerLink, LinkError, LinkEvent};
use super::state::{ConnectionState, StateTracker};
use crate::backoff::Backoff;

/// How long a shutdown keeps polling so a queued DISCONNECT reaches the broker.
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

/// Poll until the broker acknowledges a connection.
pub(crate) async fn wait_for_connack(link: &mut dyn BrokerLink) -> Result<(), LinkError> {
    loop {
        match link.poll().await? {
            LinkEvent::Connected => return Ok(()),
            LinkEvent::Disconnected => {
                return Err(LinkError::Connection(
                    "broker closed the connection".to_string(),
                ))
            }
            LinkEvent::Message { topic, .. } => {
                log::debug!("Message on {} before CONNACK, ignoring", topic)
            }
            LinkEvent::Other => {}
        }
    }
}

enum Reconnect {
    Reconnected,
    Exhausted,
    Shutdown,
}

pub(crate) struct ConnectionDriver {
    pub link: Box<dyn BrokerLink>,
    pub state: StateTracker,
    pub backoff: Backoff,
}

impl ConnectionDriver {
    /// Run until shutdown or until reconnect attempts are exhausted.
    pub async fn run(mut self, mut shutdown: watch::Receiver<()>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = self.link.poll() => event,
            };

            let reason = match event {
                Ok(LinkEvent::Connected) => {
                    self.backoff.reset();
                    self.state.transition(ConnectionState::Connected);
                    continue;
                }
                Ok(LinkEvent::Message { topic, payload }) => {
                    log::info!(
                        "Received message: topic={}, payload={}",
                        topic,
                        String::from_utf8_lossy(&payload)
                    );
                    continue;
                }
                Ok(LinkEvent::Other) => continue,
                Ok(LinkEvent::Disconnected) => "broker sent DISCONNECT".to_string(),
                Err(e) => e.to_string(),
            };

            log::warn!("Disconnected from broker: {}", reason);
            self.state.transition(ConnectionState::Disconnected);

            match self.reconnect(&mut shutdown).await {
                Reconnect::Reconnected => continue,
                Reconnect::Shutdown => break,
                Reconnect::Exhausted => {
                    log::error!(
                        "Reconnect failed after {} attempts, giving up",
                        self.backoff.attempts()
                    );
                    self.state.transition(ConnectionState::Failed);
                    return;
                }
            }
        }

        if self.state.current().is_connected() {
            self.flush_disconnect().await;
        }
        self.state.transition(ConnectionState::Disconnected);
        log::info!("Broker network loop stopped");
    }

    /// Drive the link until the session closes or the flush window ends.
    async fn flush_disconnect(&mut self) {
        let flush = async {
            while let Ok(LinkEvent::Other | LinkEvent::Message { .. }) = self.link.poll().await {}
        };
        if tokio::time::timeout(DISCONNECT_FLUSH, flush).await.is_err() {
            log::debug!("Broker session still open after disconnect request");
        }
    }

    async fn reconnect(&mut self, shutdown: &mut watch::Receiver<()>) -> Reconnect {
        while let Some(delay) = self.backoff.next_delay() {
            let attempt = self.backoff.attempts();
            self.state
                .transition(ConnectionState::Reconnecting { attempt, delay });
            log::info!("Reconnecting in {} seconds...", delay.as_secs());

            tokio::select! {
                biased;
                _ = shutdown.changed() => return Reconnect::Shutdown,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                biased;
                _ = shutdown.changed() => return Reconnect::Shutdown,
                result = wait_for_connack(self.link.as_mut()) => result,
            };
            match result {
                Ok(()) => {
                    log::info!("Reconnected successfully after {} attempt(s)", attempt);
                    self.backoff.reset();
                    self.state.transition(ConnectionState::Connected);
                    return Reconnect::Reconnected;
                }
                Err(e) => log::error!("Reconnect attempt {} failed: {}", attempt, e),
            }
        }
        Reconnect::Exhausted
    }
}
