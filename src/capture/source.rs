//! Capture source contract
//!
//! Commands go out through [`CaptureSource`]; the device answers
//! asynchronously with [`CaptureEvent`]s delivered to the coordinator inbox.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::events::base64_audio;

/// Why the recognizer or recorder failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureErrorKind {
    /// Microphone permission was refused
    NotAllowed,
    /// No speech was heard before the engine gave up
    NoSpeech,
    /// Recognition was aborted by the platform
    Aborted,
    /// The audio input device failed
    AudioCapture,
    /// The recognition service could not be reached
    Network,
    /// The platform has no recognizer
    Unsupported,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CaptureErrorKind::NotAllowed => "microphone permission denied",
            CaptureErrorKind::NoSpeech => "no speech detected",
            CaptureErrorKind::Aborted => "recognition aborted",
            CaptureErrorKind::AudioCapture => "audio capture failed",
            CaptureErrorKind::Network => "recognition service unreachable",
            CaptureErrorKind::Unsupported => "speech recognition unsupported",
            CaptureErrorKind::Other => "recognition failed",
        };
        f.write_str(text)
    }
}

/// Events reported by the capture device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureEvent {
    /// Continuous recognition is live
    Started,
    /// Partial transcript, superseded by later events
    Interim { text: String },
    /// Transcript of a completed utterance
    Final { text: String },
    /// Recognition or recording failed
    Error { error: CaptureErrorKind },
    /// Continuous recognition stopped
    Ended,
    /// Push-to-talk recording finished
    RecordingReady {
        #[serde(with = "base64_audio")]
        audio: Bytes,
    },
    /// Answer to a microphone permission request
    Permission { granted: bool },
}

/// Errors returned synchronously when issuing a capture command
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Continuous recognition is already live
    #[error("recognition is already active")]
    AlreadyActive,

    /// A push-to-talk recording holds the microphone
    #[error("microphone is busy recording")]
    Busy,

    #[error("no push-to-talk recording in progress")]
    NotRecording,

    #[error("capture device unavailable: {0}")]
    Unavailable(String),
}

/// Continuous recognition and push-to-talk recording
///
/// The coordinator is the only caller. Every method only issues a command;
/// outcomes arrive later as [`CaptureEvent`]s, which the coordinator hands
/// back through [`CaptureSource::observe`] before acting on them.
pub trait CaptureSource: Send {
    /// Ask for microphone access; answered by `CaptureEvent::Permission`
    fn request_permission(&mut self) -> Result<(), CaptureError>;

    /// Begin continuous recognition; rejected while anything is active
    fn start_continuous(&mut self) -> Result<(), CaptureError>;

    /// End continuous recognition. No-op when not started.
    fn stop(&mut self);

    /// Begin push-to-talk recording; rejected while anything is active
    fn start_manual_recording(&mut self) -> Result<(), CaptureError>;

    /// End push-to-talk recording; audio arrives as `RecordingReady`
    fn stop_manual_recording(&mut self) -> Result<(), CaptureError>;

    /// Whether the microphone is currently held
    fn is_active(&self) -> bool;

    /// Track device-reported state changes
    fn observe(&mut self, event: &CaptureEvent);
}
