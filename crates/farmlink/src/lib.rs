//! Farmlink - field rig companion library
//!
//! Two independent background subsystems behind synchronous handles:
//!
//! - [`relay`]: pulls base64 camera frames from a WebSocket bridge and keeps
//!   only the newest one for a polling consumer
//! - [`command`]: publishes MP3 speaker commands over an authenticated MQTT
//!   connection that reconnects itself, mirroring some values to telemetry
//!
//! Plus plain HTTP control of the camera board ([`camera`]).

pub mod backoff;
pub mod camera;
pub mod command;
pub mod config;
pub mod context;
pub mod relay;
pub mod runtime;
pub mod telemetry;

// Re-export commonly used types
pub use backoff::Backoff;
pub use camera::{CameraControl, CameraError, Resolution};
pub use command::{
    CommandClient, CommandError, CommandResult, ConnectionState, SpeakerCommand, Transition,
};
pub use config::{AppConfig, ConfigError};
pub use context::AppContext;
pub use relay::{Delivery, Frame, FrameError, FrameRelay, RelayError, RelayStats};
pub use telemetry::{TelemetryError, TelemetrySink, UbidotsSink};
