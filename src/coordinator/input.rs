//! Everything the coordinator reacts to arrives as an [`Input`]

use bytes::Bytes;
use uuid::Uuid;

use crate::capture::CaptureEvent;
use crate::gateway::GatewayError;
use crate::playback::PlaybackEvent;

use super::mode::{RequestId, TimerId};

/// Actions requested by the person through the presentation client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Switch continuous listening on or off
    SetContinuous(bool),
    /// Send typed (or transcribed and edited) text
    Submit(String),
    /// Begin push-to-talk recording
    StartRecording,
    /// End push-to-talk recording and transcribe it
    StopRecording,
    /// Speak an earlier machine turn again
    SpeakTurn(Uuid),
}

impl UserCommand {
    pub fn name(&self) -> &'static str {
        match self {
            UserCommand::SetContinuous(_) => "set_continuous",
            UserCommand::Submit(_) => "submit",
            UserCommand::StartRecording => "start_recording",
            UserCommand::StopRecording => "stop_recording",
            UserCommand::SpeakTurn(_) => "speak_turn",
        }
    }
}

/// One entry of the coordinator inbox
#[derive(Debug)]
pub enum Input {
    Command(UserCommand),
    Capture(CaptureEvent),
    Playback(PlaybackEvent),
    Reply {
        request: RequestId,
        result: Result<String, GatewayError>,
    },
    Synthesis {
        request: RequestId,
        result: Result<Bytes, GatewayError>,
    },
    Transcription {
        request: RequestId,
        result: Result<String, GatewayError>,
    },
    Timer(TimerId),
    /// The last client hosting the devices disconnected
    DevicesLost,
}
