//! Stream sources: where the relay pulls raw payloads from.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::RelayError;
use crate::config::RelayConfig;

/// Something the relay can (re)connect to for a stream of image payloads.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Address used in log lines.
    fn address(&self) -> &str;

    /// Open a fresh connection. Called once per reconnect attempt.
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, RelayError>;
}

/// One live connection to a stream source.
#[async_trait]
pub trait StreamConnection: Send {
    /// Wait for the next payload.
    ///
    /// `Ok(None)` means the peer closed the connection. The relay drops this
    /// future when its receive timeout fires, so it must be cancel-safe.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, RelayError>;

    /// Close the connection; errors are not interesting at this point.
    async fn close(&mut self);
}

/// WebSocket camera bridge emitting base64 frames.
#[derive(Debug, Clone)]
pub struct WebSocketSource {
    url: String,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl WebSocketSource {
    /// Validate `url` and build a source using the heartbeat settings in `config`.
    pub fn new(url: &str, config: &RelayConfig) -> Result<Self, RelayError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| RelayError::InvalidAddress(format!("{}: {}", url, e)))?;
        if uri.scheme_str() != Some("ws") {
            return Err(RelayError::InvalidAddress(format!(
                "{}: expected a ws:// address",
                url
            )));
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(RelayError::InvalidAddress(format!("{}: missing host", url)));
        }

        Ok(Self {
            url: url.to_string(),
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
            ping_timeout: Duration::from_secs(config.ping_timeout_secs.max(1)),
        })
    }
}

#[async_trait]
impl StreamSource for WebSocketSource {
    fn address(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<Box<dyn StreamConnection>, RelayError> {
        let (ws, _response) = tokio::time::timeout(self.ping_timeout, connect_async(&self.url))
            .await
            .map_err(|_| RelayError::Transport(format!("connect to {} timed out", self.url)))?
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let mut heartbeat =
            tokio::time::interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Box::new(WebSocketConnection {
            ws,
            heartbeat,
            last_seen: Instant::now(),
            ping_timeout: self.ping_timeout,
        }))
    }
}

struct WebSocketConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    heartbeat: Interval,
    last_seen: Instant,
    ping_timeout: Duration,
}

#[async_trait]
impl StreamConnection for WebSocketConnection {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, RelayError> {
        loop {
            tokio::select! {
                msg = self.ws.next() => {
                    let msg = match msg {
                        None => return Ok(None),
                        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => return Ok(None),
                        Some(Err(e)) => return Err(RelayError::Transport(e.to_string())),
                        Some(Ok(msg)) => msg,
                    };
                    self.last_seen = Instant::now();
                    match msg {
                        Message::Text(text) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                        Message::Binary(data) => return Ok(Some(data.to_vec())),
                        Message::Close(frame) => {
                            log::debug!("Camera bridge sent close: {:?}", frame);
                            return Ok(None);
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                    }
                }
                _ = self.heartbeat.tick() => {
                    if self.last_seen.elapsed() >= self.ping_timeout {
                        return Err(RelayError::Transport(format!(
                            "no traffic from camera bridge for {}s",
                            self.ping_timeout.as_secs()
                        )));
                    }
                    self.ws
                        .send(Message::Ping(Vec::<u8>::new().into()))
                        .await
                        .map_err(|e| RelayError::Transport(e.to_string()))?;
                }
            }
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(Duration::from_secs(1), self.ws.close(None)).await {
            Ok(Err(e)) => log::debug!("Error closing camera bridge connection: {}", e),
            Err(_) => log::debug!("Timed out closing camera bridge connection"),
            Ok(Ok(())) => {}
        }
    }
}
