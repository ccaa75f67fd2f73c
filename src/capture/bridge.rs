//! Capture source bridged to the presentation client
//!
//! The client owns the platform recognizer and recorder. Commands are pushed
//! to it as [`DeviceCommand`] notifications; it reports back over IPC.

use tokio::sync::broadcast;
use tracing::debug;

use crate::events::DeviceCommand;

use super::source::{CaptureError, CaptureEvent, CaptureSource};

/// What the microphone is being used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Inactive,
    Recognizing,
    Recording,
    /// Recording stopped, captured audio not yet delivered
    Finishing,
}

/// [`CaptureSource`] that forwards commands over the device channel
pub struct BridgedCapture {
    commands: broadcast::Sender<DeviceCommand>,
    activity: Activity,
}

impl BridgedCapture {
    pub fn new(commands: broadcast::Sender<DeviceCommand>) -> Self {
        Self {
            commands,
            activity: Activity::Inactive,
        }
    }

    fn push(&self, command: DeviceCommand) -> Result<(), CaptureError> {
        debug!(?command, "capture command");
        self.commands
            .send(command)
            .map(|_| ())
            .map_err(|_| CaptureError::Unavailable("no device client attached".to_string()))
    }

    fn ensure_inactive(&self) -> Result<(), CaptureError> {
        match self.activity {
            Activity::Inactive => Ok(()),
            Activity::Recognizing => Err(CaptureError::AlreadyActive),
            Activity::Recording | Activity::Finishing => Err(CaptureError::Busy),
        }
    }
}

impl CaptureSource for BridgedCapture {
    fn request_permission(&mut self) -> Result<(), CaptureError> {
        self.push(DeviceCommand::RequestMicrophone)
    }

    fn start_continuous(&mut self) -> Result<(), CaptureError> {
        self.ensure_inactive()?;
        self.push(DeviceCommand::StartRecognition)?;
        self.activity = Activity::Recognizing;
        Ok(())
    }

    fn stop(&mut self) {
        if self.activity != Activity::Recognizing {
            return;
        }
        self.activity = Activity::Inactive;
        // A vanished client has nothing left to stop.
        let _ = self.push(DeviceCommand::StopRecognition);
    }

    fn start_manual_recording(&mut self) -> Result<(), CaptureError> {
        self.ensure_inactive()?;
        self.push(DeviceCommand::StartRecording)?;
        self.activity = Activity::Recording;
        Ok(())
    }

    fn stop_manual_recording(&mut self) -> Result<(), CaptureError> {
        if self.activity != Activity::Recording {
            return Err(CaptureError::NotRecording);
        }
        if let Err(e) = self.push(DeviceCommand::StopRecording) {
            // No client left to deliver the recording.
            self.activity = Activity::Inactive;
            return Err(e);
        }
        self.activity = Activity::Finishing;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.activity != Activity::Inactive
    }

    fn observe(&mut self, event: &CaptureEvent) {
        match event {
            CaptureEvent::Ended | CaptureEvent::Error { .. } | CaptureEvent::RecordingReady { .. } => {
                self.activity = Activity::Inactive;
            }
            CaptureEvent::Started if self.activity == Activity::Inactive => {
                // The device confirmed a start we no longer track; hold it so stop() reaches it.
                self.activity = Activity::Recognizing;
            }
            CaptureEvent::Started
            | CaptureEvent::Interim { .. }
            | CaptureEvent::Final { .. }
            | CaptureEvent::Permission { .. } => {}
        }
    }
}
