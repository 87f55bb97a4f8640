//! The relay's background receive loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::buffer::FrameBuffer;
use super::frame::decode_payload;
use super::source::{StreamConnection, StreamSource};
use crate::backoff::Backoff;

/// Counters updated by the relay task, readable from anywhere.
#[derive(Debug, Default)]
pub struct RelayCounters {
    connections: AtomicU64,
    frames: AtomicU64,
    decode_errors: AtomicU64,
    last_backoff_ms: AtomicU64,
}

/// Point-in-time copy of the relay counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStats {
    pub connections: u64,
    pub frames: u64,
    pub decode_errors: u64,
    /// Delay waited before the most recent reconnect attempt
    pub last_backoff: Option<Duration>,
}

impl RelayCounters {
    pub fn snapshot(&self) -> RelayStats {
        let last_backoff_ms = self.last_backoff_ms.load(Ordering::Relaxed);
        RelayStats {
            connections: self.connections.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            last_backoff: (last_backoff_ms > 0).then(|| Duration::from_millis(last_backoff_ms)),
        }
    }
}

/// Everything the loop needs, moved into the spawned task.
pub(super) struct RelayLoop {
    pub source: Arc<dyn StreamSource>,
    pub buffer: Arc<FrameBuffer>,
    pub counters: Arc<RelayCounters>,
    pub backoff: Backoff,
    pub recv_timeout: Duration,
}

enum SessionEnd {
    Stopped,
    Lost(String),
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

impl RelayLoop {
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let address = self.source.address().to_string();
        log::info!("Frame relay starting for {}", address);

        loop {
            if stop_requested(&stop) {
                break;
            }

            let connected = tokio::select! {
                biased;
                _ = stop.changed() => break,
                result = self.source.connect() => result,
            };

            match connected {
                Ok(mut conn) => {
                    log::info!("Connected to camera stream at {}", address);
                    self.backoff.reset();
                    self.counters.connections.fetch_add(1, Ordering::Relaxed);

                    let end = self.pump(conn.as_mut(), &mut stop).await;
                    conn.close().await;
                    match end {
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(reason) => {
                            log::warn!("Camera stream connection lost: {}", reason)
                        }
                    }
                }
                Err(e) => log::error!("Camera stream connection failed: {}", e),
            }

            if stop_requested(&stop) {
                break;
            }
            let Some(delay) = self.backoff.next_delay() else {
                log::error!("Giving up on camera stream at {}", address);
                break;
            };
            self.counters
                .last_backoff_ms
                .store(delay.as_millis() as u64, Ordering::Relaxed);
            log::info!(
                "Reconnecting to camera stream in {}s (attempt {})",
                delay.as_secs_f32(),
                self.backoff.attempts()
            );

            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        log::info!("Frame relay stopped for {}", address);
    }

    /// Receive until the connection drops or a stop is requested.
    async fn pump(
        &mut self,
        conn: &mut dyn StreamConnection,
        stop: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            if stop_requested(stop) {
                return SessionEnd::Stopped;
            }

            let received = tokio::select! {
                biased;
                _ = stop.changed() => return SessionEnd::Stopped,
                received = tokio::time::timeout(self.recv_timeout, conn.recv()) => received,
            };

            let payload = match received {
                Err(_elapsed) => {
                    log::warn!(
                        "No frame from camera stream in {}s",
                        self.recv_timeout.as_secs_f32()
                    );
                    continue;
                }
                Ok(Ok(Some(payload))) => payload,
                Ok(Ok(None)) => return SessionEnd::Lost("closed by peer".to_string()),
                Ok(Err(e)) => return SessionEnd::Lost(e.to_string()),
            };

            let sequence = self.counters.frames.load(Ordering::Relaxed) + 1;
            // Full-size frames take a while to decode; keep them off the async workers
            let decoded =
                tokio::task::spawn_blocking(move || decode_payload(&payload, sequence)).await;
            if stop_requested(stop) {
                return SessionEnd::Stopped;
            }

            match decoded {
                Ok(Ok(frame)) => {
                    log::debug!(
                        "Frame {} queued ({}x{}, {} bytes)",
                        frame.sequence,
                        frame.width,
                        frame.height,
                        frame.encoded.len()
                    );
                    self.buffer.push_frame(frame);
                    self.counters.frames.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    log::warn!("Dropping camera payload: {}", e);
                    self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                    self.buffer.push_error(e);
                }
                Err(e) => log::error!("Frame decode task failed: {}", e),
            }
        }
    }
}
