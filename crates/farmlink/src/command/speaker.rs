//! MP3 player control messages and their topics.

use serde::Serialize;
use serde_json::{json, Value};

use super::CommandError;

/// Highest volume the DFPlayer module accepts.
pub const MAX_VOLUME: u8 = 30;

/// One speaker command, validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerCommand {
    PlayTestSound,
    StopSound,
    SetDefaultSoundFile(u32),
    SetVolume(u8),
    PlaySoundFile(u32),
}

impl SpeakerCommand {
    pub fn set_volume(level: i64) -> Result<Self, CommandError> {
        u8::try_from(level)
            .ok()
            .filter(|level| *level <= MAX_VOLUME)
            .map(SpeakerCommand::SetVolume)
            .ok_or_else(|| {
                CommandError::InvalidArgument(format!(
                    "volume must be between 0 and {}, got {}",
                    MAX_VOLUME, level
                ))
            })
    }

    pub fn set_default_sound_file(file_number: i64) -> Result<Self, CommandError> {
        file_number_arg(file_number).map(SpeakerCommand::SetDefaultSoundFile)
    }

    pub fn play_sound_file(file_number: i64) -> Result<Self, CommandError> {
        file_number_arg(file_number).map(SpeakerCommand::PlaySoundFile)
    }

    /// Topic for `device`.
    pub fn topic(&self, device: &str) -> String {
        match self {
            SpeakerCommand::PlayTestSound | SpeakerCommand::PlaySoundFile(_) => {
                format!("control/{}/mp3player/play", device)
            }
            SpeakerCommand::StopSound => format!("control/{}/mp3player/stop", device),
            SpeakerCommand::SetVolume(_) => format!("control/{}/mp3player/set_volume", device),
            SpeakerCommand::SetDefaultSoundFile(_) => {
                format!("setting/{}/mp3player/default_filenumber", device)
            }
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            SpeakerCommand::PlayTestSound => json!({ "action": "play sound test" }),
            SpeakerCommand::StopSound => json!({ "action": "stop sound" }),
            SpeakerCommand::SetDefaultSoundFile(n) => json!({ "filenumber": n }),
            SpeakerCommand::SetVolume(level) => json!({ "value": level }),
            SpeakerCommand::PlaySoundFile(n) => {
                json!({ "action": "play sound file", "filenumber": n })
            }
        }
    }

    pub(crate) fn success_message(&self) -> String {
        match self {
            SpeakerCommand::PlayTestSound => "Test sound enqueued".to_string(),
            SpeakerCommand::StopSound => "Stop sound enqueued".to_string(),
            SpeakerCommand::SetDefaultSoundFile(n) => format!("Default sound file {} enqueued", n),
            SpeakerCommand::SetVolume(level) => format!("Volume {} enqueued", level),
            SpeakerCommand::PlaySoundFile(n) => format!("Play sound file {} enqueued", n),
        }
    }

    /// Value mirrored to telemetry after a successful publish.
    pub(crate) fn telemetry(&self) -> Option<(&'static str, f64)> {
        match self {
            SpeakerCommand::SetVolume(level) => Some(("speaker_volume", f64::from(*level))),
            SpeakerCommand::SetDefaultSoundFile(n) => Some(("current_audio", f64::from(*n))),
            _ => None,
        }
    }
}

fn file_number_arg(file_number: i64) -> Result<u32, CommandError> {
    u32::try_from(file_number).map_err(|_| {
        CommandError::InvalidArgument(format!(
            "sound file number must be a non-negative 32-bit value, got {}",
            file_number
        ))
    })
}

/// Outcome of one publish call.
///
/// `success` means the message was handed to the broker connection, not that
/// the speaker acted on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
