//! Coordinator modes
//!
//! [`State`] is what the coordinator actually holds: each variant carries the
//! data that only exists in that mode (pending timer, outstanding request).
//! [`Mode`] is its seven-valued projection for logging and clients.

use serde::{Deserialize, Serialize};

/// Identifies an in-flight gateway request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) u64);

/// Identifies a scheduled debounce timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) u64);

/// Externally visible coordinator mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Nothing active
    Idle,
    /// Capture restart requested, not yet confirmed
    ArmedListening,
    /// Continuous recognition is live
    Capturing,
    /// Push-to-talk recording or its transcription
    ManualRecording,
    /// Waiting for the reply endpoint
    AwaitingReply,
    /// Waiting for the synthesis endpoint
    Synthesizing,
    /// Loudspeaker is playing a reply
    Speaking,
}

impl Default for Mode {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Idle => write!(f, "Idle"),
            Mode::ArmedListening => write!(f, "ArmedListening"),
            Mode::Capturing => write!(f, "Capturing"),
            Mode::ManualRecording => write!(f, "ManualRecording"),
            Mode::AwaitingReply => write!(f, "AwaitingReply"),
            Mode::Synthesizing => write!(f, "Synthesizing"),
            Mode::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Final transcript waiting out the settle delay before submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Settling {
    pub timer: TimerId,
    pub text: String,
}

/// Push-to-talk sub-phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recording {
    /// Microphone is recording
    Live,
    /// Stop issued, audio not yet delivered
    Stopping,
    /// Audio sent for transcription
    Transcribing(RequestId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum State {
    Idle,
    /// `timer` is set while the debounce runs; `None` once start was issued
    ArmedListening { timer: Option<TimerId> },
    Capturing { settling: Option<Settling> },
    ManualRecording(Recording),
    AwaitingReply(RequestId),
    Synthesizing(RequestId),
    Speaking,
}

impl State {
    pub fn mode(&self) -> Mode {
        match self {
            State::Idle => Mode::Idle,
            State::ArmedListening { .. } => Mode::ArmedListening,
            State::Capturing { .. } => Mode::Capturing,
            State::ManualRecording(_) => Mode::ManualRecording,
            State::AwaitingReply(_) => Mode::AwaitingReply,
            State::Synthesizing(_) => Mode::Synthesizing,
            State::Speaking => Mode::Speaking,
        }
    }

    /// Whether the person may submit typed text or replay a turn
    pub fn accepts_submission(&self) -> bool {
        matches!(
            self,
            State::Idle | State::ArmedListening { .. } | State::Capturing { .. }
        )
    }
}
