//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capture::CaptureEvent;
use crate::conversation::Turn;
use crate::coordinator::{Mode, UserCommand};
use crate::events::{DeviceCommand, StateEvent};
use crate::playback::PlaybackEvent;

/// Requests from the presentation client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Request the full conversation log
    GetConversation,

    /// Subscribe to state events and device commands
    Subscribe,

    SetContinuous { enabled: bool },

    Submit { text: String },

    StartRecording,

    StopRecording,

    /// Speak an earlier machine turn again
    SpeakTurn { id: Uuid },

    /// Report from the microphone side of the client
    CaptureEvent { event: CaptureEvent },

    /// Report from the loudspeaker side of the client
    PlaybackEvent { event: PlaybackEvent },
}

impl Request {
    /// The coordinator command this request carries, if any
    pub fn into_command(self) -> Option<UserCommand> {
        match self {
            Request::SetContinuous { enabled } => Some(UserCommand::SetContinuous(enabled)),
            Request::Submit { text } => Some(UserCommand::Submit(text)),
            Request::StartRecording => Some(UserCommand::StartRecording),
            Request::StopRecording => Some(UserCommand::StopRecording),
            Request::SpeakTurn { id } => Some(UserCommand::SpeakTurn(id)),
            _ => None,
        }
    }

    /// Whether the request holds a recorded clip
    pub fn carries_audio(&self) -> bool {
        matches!(
            self,
            Request::CaptureEvent {
                event: CaptureEvent::RecordingReady { .. }
            }
        )
    }
}

/// Responses from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Conversation log, oldest turn first
    Conversation { turns: Vec<Turn> },

    /// Command or device report queued for the coordinator
    Accepted,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Notification {
    /// Coordinator state event
    State(StateEvent),
    /// Command for the client's microphone or loudspeaker
    Device(DeviceCommand),
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current mode
    pub mode: Mode,

    /// Whether continuous listening is on
    pub continuous: bool,

    /// Pending transcript shown in the input field
    pub draft: String,

    pub turn_count: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: Mode::default(),
            continuous: false,
            draft: String::new(),
            turn_count: 0,
            uptime_secs: 0,
        }
    }
}
