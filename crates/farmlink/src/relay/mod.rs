//! Frame relay
//!
//! Pulls base64 image payloads from a camera bridge on a background task and
//! hands the most recent valid frame to a consumer.
//!
//! - Latest-wins: a new frame discards every undelivered older entry
//! - Decode failures are delivered as errors and never end the session
//! - Connection loss is retried forever with exponential backoff (1s..30s)
//! - `stop()` is cooperative; the task notices at its next suspension point
//!
//! ```rust,ignore
//! let mut relay = FrameRelay::new(RelayConfig::default());
//! relay.start("ws://localhost:8765")?;
//! match relay.next_frame() {
//!     Some(Delivery::Frame(frame)) => show(&frame),
//!     Some(Delivery::Error(err)) => warn(&err),
//!     None => {} // no data yet
//! }
//! relay.stop();
//! ```

mod buffer;
mod frame;
mod source;
mod task;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use buffer::FrameBuffer;
pub use frame::{decode_payload, Delivery, Frame, FrameError, MIN_PAYLOAD_BYTES};
pub use source::{StreamConnection, StreamSource, WebSocketSource};
pub use task::RelayStats;

use crate::backoff::Backoff;
use crate::config::RelayConfig;
use task::{RelayCounters, RelayLoop};

/// Errors surfaced by the relay API. Transport errors only appear inside the
/// loop, where they are logged and retried.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("frame relay is already running")]
    AlreadyRunning,

    #[error("invalid stream address: {0}")]
    InvalidAddress(String),

    #[error("stream transport error: {0}")]
    Transport(String),
}

struct RunningRelay {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Handle owning at most one background relay task.
pub struct FrameRelay {
    config: RelayConfig,
    buffer: Arc<FrameBuffer>,
    counters: Arc<RelayCounters>,
    running: Option<RunningRelay>,
}

impl FrameRelay {
    pub fn new(config: RelayConfig) -> Self {
        let buffer = Arc::new(FrameBuffer::new(config.buffer_capacity));
        Self {
            config,
            buffer,
            counters: Arc::new(RelayCounters::default()),
            running: None,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Start relaying from a WebSocket camera bridge.
    pub fn start(&mut self, address: &str) -> Result<(), RelayError> {
        self.ensure_idle()?;
        let source = WebSocketSource::new(address, &self.config)?;
        self.start_with(Arc::new(source))
    }

    /// Start relaying from any stream source.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_with(&mut self, source: Arc<dyn StreamSource>) -> Result<(), RelayError> {
        self.ensure_idle()?;

        // Each run owns its buffer and counters; a previous task may still be exiting
        self.detach_buffer();
        self.counters = Arc::new(RelayCounters::default());
        let (stop_tx, stop_rx) = watch::channel(false);
        let relay_loop = RelayLoop {
            source,
            buffer: self.buffer.clone(),
            counters: self.counters.clone(),
            backoff: Backoff::from(&self.config.backoff),
            recv_timeout: Duration::from_secs(self.config.recv_timeout_secs.max(1)),
        };
        let task = tokio::spawn(relay_loop.run(stop_rx));

        self.running = Some(RunningRelay { stop_tx, task });
        Ok(())
    }

    fn ensure_idle(&mut self) -> Result<(), RelayError> {
        match &self.running {
            Some(running) if !running.task.is_finished() => Err(RelayError::AlreadyRunning),
            _ => {
                self.running = None;
                Ok(())
            }
        }
    }

    /// Ask the task to stop and drop any buffered frames.
    ///
    /// Safe to call when nothing is running or the task already exited.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
            log::info!("Frame relay stop requested");
        }
        self.detach_buffer();
    }

    /// Stop and wait for the task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
            if let Err(e) = running.task.await {
                log::warn!("Frame relay task ended abnormally: {}", e);
            }
        }
        self.detach_buffer();
    }

    /// Drop buffered entries and hand the consumer a fresh buffer. A task that
    /// is still finishing a decode only reaches the orphaned one.
    fn detach_buffer(&mut self) {
        self.buffer.clear();
        self.buffer = Arc::new(FrameBuffer::new(self.config.buffer_capacity));
    }

    /// Latest buffered entry without waiting. `None` means no data yet.
    pub fn next_frame(&self) -> Option<Delivery> {
        self.buffer.take()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    pub fn stats(&self) -> RelayStats {
        self.counters.snapshot()
    }
}

impl Drop for FrameRelay {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
        }
    }
}
