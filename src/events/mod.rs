//! Events module for coordinator notifications
//!
//! `StateEvent` is broadcast by the coordinator on every observable change.
//! `DeviceCommand` is what the device bridges push to the presentation
//! client that hosts the microphone, recognizer and loudspeaker.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::conversation::Turn;
use crate::coordinator::Mode;

/// Which part of the dialogue loop an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Capture,
    Playback,
    Reply,
    Synthesis,
    Transcription,
}

/// Events emitted by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Mode transition
    ModeChanged {
        from: Mode,
        to: Mode,
        /// Milliseconds spent in `from`
        duration_ms: u64,
    },

    /// Continuous listening was switched on or off
    ContinuousModeChanged { enabled: bool },

    /// Pending transcript / input field content changed
    DraftUpdated { text: String },

    /// A turn was added to the conversation log
    TurnAppended { turn: Turn },

    /// A recoverable failure the person should see
    ErrorReported { source: ErrorSource, message: String },

    /// A user command was refused in the current mode
    CommandRejected { command: String, reason: String },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::ModeChanged { from, to, duration_ms } => {
                write!(f, "MODE_CHANGED {} -> {} ({}ms)", from, to, duration_ms)
            }
            StateEvent::ContinuousModeChanged { enabled } => {
                write!(f, "CONTINUOUS_MODE_CHANGED ({})", enabled)
            }
            StateEvent::DraftUpdated { text } => write!(f, "DRAFT_UPDATED ({} chars)", text.len()),
            StateEvent::TurnAppended { turn } => write!(f, "TURN_APPENDED ({})", turn.role),
            StateEvent::ErrorReported { source, message } => {
                write!(f, "ERROR_REPORTED ({:?}: {})", source, message)
            }
            StateEvent::CommandRejected { command, reason } => {
                write!(f, "COMMAND_REJECTED ({}: {})", command, reason)
            }
        }
    }
}

/// Commands pushed to the client hosting the physical devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    /// Ask the platform for microphone access
    RequestMicrophone,
    /// Begin continuous speech recognition
    StartRecognition,
    /// End continuous speech recognition
    StopRecognition,
    /// Begin push-to-talk recording
    StartRecording,
    /// End push-to-talk recording and report the captured audio
    StopRecording,
    /// Play a synthesized clip
    Play {
        #[serde(with = "base64_audio")]
        audio: Bytes,
    },
}

/// Serde adapter carrying audio payloads as base64 strings
pub mod base64_audio {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(audio: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(audio))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = StateEvent::ModeChanged {
            from: Mode::Speaking,
            to: Mode::ArmedListening,
            duration_ms: 1500,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("mode_changed"));
        assert!(json.contains("armed_listening"));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"continuous_mode_changed","enabled":true}"#;
        let event: StateEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, StateEvent::ContinuousModeChanged { enabled: true }));
    }

    #[test]
    fn test_play_command_carries_base64_audio() {
        let command = DeviceCommand::Play {
            audio: Bytes::from_static(b"ID3"),
        };
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(json, r#"{"command":"play","audio":"SUQz"}"#);

        let decoded: DeviceCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let json = r#"{"command":"play","audio":"***"}"#;
        assert!(serde_json::from_str::<DeviceCommand>(json).is_err());
    }
}
