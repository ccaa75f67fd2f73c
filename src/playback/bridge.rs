//! Playback sink bridged to the presentation client

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::DeviceCommand;

use super::{PlaybackError, PlaybackEvent, PlaybackSink};

/// [`PlaybackSink`] that pushes clips over the device channel
pub struct BridgedPlayback {
    commands: broadcast::Sender<DeviceCommand>,
    playing: bool,
}

impl BridgedPlayback {
    pub fn new(commands: broadcast::Sender<DeviceCommand>) -> Self {
        Self {
            commands,
            playing: false,
        }
    }
}

impl PlaybackSink for BridgedPlayback {
    fn play(&mut self, audio: Bytes) -> Result<(), PlaybackError> {
        if self.playing {
            return Err(PlaybackError::Busy);
        }
        if audio.is_empty() {
            return Err(PlaybackError::EmptyClip);
        }

        debug!(bytes = audio.len(), "playback command");
        self.commands
            .send(DeviceCommand::Play { audio })
            .map_err(|_| PlaybackError::Unavailable("no device client attached".to_string()))?;
        self.playing = true;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.playing
    }

    fn observe(&mut self, event: &PlaybackEvent) {
        if matches!(event, PlaybackEvent::Ended | PlaybackEvent::Error { .. }) {
            self.playing = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_second_play_rejected_until_ended() {
        let (tx, mut rx) = broadcast::channel(4);
        let mut sink = BridgedPlayback::new(tx);

        assert_ok!(sink.play(Bytes::from_static(b"mp3")));
        assert!(sink.is_active());
        let err = assert_err!(sink.play(Bytes::from_static(b"mp3")));
        assert!(matches!(err, PlaybackError::Busy));

        sink.observe(&PlaybackEvent::Ended);
        assert!(!sink.is_active());
        assert_ok!(sink.play(Bytes::from_static(b"mp3")));

        assert!(matches!(rx.try_recv().unwrap(), DeviceCommand::Play { .. }));
        assert!(matches!(rx.try_recv().unwrap(), DeviceCommand::Play { .. }));
    }

    #[test]
    fn test_empty_clip_rejected() {
        let (tx, _rx) = broadcast::channel(4);
        let mut sink = BridgedPlayback::new(tx);

        let err = assert_err!(sink.play(Bytes::new()));
        assert!(matches!(err, PlaybackError::EmptyClip));
        assert!(!sink.is_active());
    }

    #[test]
    fn test_error_event_frees_sink() {
        let (tx, _rx) = broadcast::channel(4);
        let mut sink = BridgedPlayback::new(tx);

        assert_ok!(sink.play(Bytes::from_static(b"mp3")));
        sink.observe(&PlaybackEvent::Error {
            message: "decode failed".to_string(),
        });
        assert!(!sink.is_active());
    }
}
