//! Playback module for synthesized speech
//!
//! One clip at a time. The sink reports completion asynchronously.

mod bridge;

pub use bridge::BridgedPlayback;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Events reported by the playback device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackEvent {
    Started,
    Ended,
    Error { message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("a clip is already playing")]
    Busy,

    #[error("empty audio clip")]
    EmptyClip,

    #[error("playback device unavailable: {0}")]
    Unavailable(String),
}

/// Loudspeaker output for synthesized replies
pub trait PlaybackSink: Send {
    /// Start playing a clip; completion arrives as `Ended` or `Error`
    fn play(&mut self, audio: Bytes) -> Result<(), PlaybackError>;

    fn is_active(&self) -> bool;

    /// Track device-reported state changes
    fn observe(&mut self, event: &PlaybackEvent);
}
