//! Turn-taking coordinator
//!
//! Sole owner of the capture source, the playback sink and the conversation
//! log. Inputs are handled one at a time from a single inbox; gateway calls
//! and debounce delays run as spawned tasks that post back into it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capture::{CaptureError, CaptureErrorKind, CaptureEvent, CaptureSource};
use crate::conversation::{ConversationLog, Role, Turn};
use crate::events::{ErrorSource, StateEvent};
use crate::gateway::{GatewayError, RemoteGateway};
use crate::playback::{PlaybackEvent, PlaybackSink};

use super::input::{Input, UserCommand};
use super::mode::{Mode, Recording, RequestId, Settling, State, TimerId};

/// Spoken and logged when the reply endpoint fails
pub const DEFAULT_APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

/// Tunable delays and fixed texts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    /// Before re-opening the microphone after speech ends or capture drops
    pub rearm_delay: Duration,
    /// Before re-opening the microphone after a synthesis or playback failure
    pub recovery_rearm_delay: Duration,
    /// Between stopping capture on a final transcript and submitting it
    pub settle_delay: Duration,
    pub apology: String,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            rearm_delay: Duration::from_millis(500),
            recovery_rearm_delay: Duration::from_millis(100),
            settle_delay: Duration::from_millis(500),
            apology: DEFAULT_APOLOGY.to_string(),
        }
    }
}

/// Latest observable state; readers always see the current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub mode: Mode,
    pub continuous: bool,
    pub draft: String,
    pub turns: Vec<Turn>,
}

/// The device and network collaborators the coordinator drives
pub struct Collaborators {
    pub capture: Box<dyn CaptureSource>,
    pub playback: Box<dyn PlaybackSink>,
    pub gateway: Arc<dyn RemoteGateway>,
}

pub struct Coordinator {
    state: State,
    /// When the current mode was entered
    state_entered_at: Instant,
    continuous: bool,
    /// Microphone permission requested for continuous mode, not yet answered
    permission_pending: bool,
    /// Pending transcript, mirrored into the client's input field
    draft: String,
    log: ConversationLog,
    capture: Box<dyn CaptureSource>,
    playback: Box<dyn PlaybackSink>,
    gateway: Arc<dyn RemoteGateway>,
    settings: CoordinatorSettings,
    next_id: u64,
    /// Loops completions and timer expiries back into the inbox
    inbox: mpsc::UnboundedSender<Input>,
    event_tx: broadcast::Sender<StateEvent>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Coordinator {
    pub fn new(
        settings: CoordinatorSettings,
        log: ConversationLog,
        collaborators: Collaborators,
        inbox: mpsc::UnboundedSender<Input>,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(Snapshot {
            mode: Mode::Idle,
            continuous: false,
            draft: String::new(),
            turns: log.turns().to_vec(),
        });

        Self {
            state: State::Idle,
            state_entered_at: Instant::now(),
            continuous: false,
            permission_pending: false,
            draft: String::new(),
            log,
            capture: collaborators.capture,
            playback: collaborators.playback,
            gateway: collaborators.gateway,
            settings,
            next_id: 0,
            inbox,
            event_tx,
            snapshot_tx,
        }
    }

    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn snapshot(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Process inputs until every sender is gone
    pub async fn run(&mut self, mut inbox: mpsc::UnboundedReceiver<Input>) {
        info!("coordinator started in Idle mode");

        while let Some(input) = inbox.recv().await {
            self.handle(input);
        }

        info!("coordinator stopped");
    }

    /// Handle one input to completion
    pub fn handle(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.handle_command(command),
            Input::Capture(event) => {
                self.capture.observe(&event);
                self.handle_capture(event);
            }
            Input::Playback(event) => {
                self.playback.observe(&event);
                self.handle_playback(event);
            }
            Input::Reply { request, result } => self.handle_reply(request, result),
            Input::Synthesis { request, result } => self.handle_synthesis(request, result),
            Input::Transcription { request, result } => self.handle_transcription(request, result),
            Input::Timer(timer) => self.handle_timer(timer),
            Input::DevicesLost => self.handle_devices_lost(),
        }
    }

    fn handle_command(&mut self, command: UserCommand) {
        debug!(?command, mode = %self.mode(), "user command");
        let name = command.name();

        match command {
            UserCommand::SetContinuous(true) => self.enable_continuous(),
            UserCommand::SetContinuous(false) => self.disable_continuous(),
            UserCommand::Submit(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    self.reject(name, "nothing to send");
                } else if !self.state.accepts_submission() {
                    self.reject(name, "a reply is in progress");
                } else {
                    // A manual submit beats a transcript still settling.
                    self.release_microphone();
                    self.submit(text);
                }
            }
            UserCommand::StartRecording => {
                if self.continuous || self.permission_pending {
                    self.reject(name, "microphone is managed by continuous listening");
                } else if self.state != State::Idle {
                    self.reject(name, "busy");
                } else {
                    match self.capture.start_manual_recording() {
                        Ok(()) => self.transition_to(State::ManualRecording(Recording::Live)),
                        Err(e) => self.report_error(ErrorSource::Capture, e.to_string()),
                    }
                }
            }
            UserCommand::StopRecording => {
                if self.state != State::ManualRecording(Recording::Live) {
                    self.reject(name, "not recording");
                    return;
                }
                match self.capture.stop_manual_recording() {
                    Ok(()) => self.transition_to(State::ManualRecording(Recording::Stopping)),
                    Err(e) => {
                        self.report_error(ErrorSource::Capture, e.to_string());
                        self.transition_to(State::Idle);
                    }
                }
            }
            UserCommand::SpeakTurn(id) => self.replay(id),
        }
    }

    fn enable_continuous(&mut self) {
        if self.continuous || self.permission_pending {
            debug!("continuous listening already on or pending");
            return;
        }
        if matches!(self.state, State::ManualRecording(_)) {
            self.reject("set_continuous", "manual recording in progress");
            return;
        }

        match self.capture.request_permission() {
            Ok(()) => self.permission_pending = true,
            Err(e) => self.report_error(ErrorSource::Capture, e.to_string()),
        }
    }

    fn disable_continuous(&mut self) {
        self.permission_pending = false;
        if !self.continuous {
            return;
        }
        self.set_continuous(false);
        self.set_draft(String::new());

        // In-flight gateway calls keep running; their results no longer re-arm.
        if matches!(
            self.state,
            State::ArmedListening { .. } | State::Capturing { .. }
        ) {
            self.capture.stop();
            self.transition_to(State::Idle);
        }
    }

    fn replay(&mut self, id: Uuid) {
        let text = match self.log.get(id) {
            Some(turn) if turn.role == Role::Machine => turn.text.clone(),
            Some(_) => return self.reject("speak_turn", "only machine turns can be spoken"),
            None => return self.reject("speak_turn", "unknown turn"),
        };
        if !self.state.accepts_submission() {
            return self.reject("speak_turn", "busy");
        }

        self.release_microphone();
        self.synthesize(text);
    }

    fn handle_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Permission { granted } => self.handle_permission(granted),
            CaptureEvent::Started => match self.state {
                State::ArmedListening { .. } => {
                    self.transition_to(State::Capturing { settling: None });
                }
                State::Idle if self.continuous => {
                    self.transition_to(State::Capturing { settling: None });
                }
                State::Capturing { settling: None } => {}
                _ => {
                    debug!(mode = %self.mode(), "unexpected capture start, stopping it");
                    self.capture.stop();
                }
            },
            CaptureEvent::Interim { text } => {
                if self.state == (State::Capturing { settling: None }) {
                    self.set_draft(text);
                }
            }
            CaptureEvent::Final { text } => {
                if self.state != (State::Capturing { settling: None }) {
                    return;
                }
                let text = text.trim().to_string();
                if text.is_empty() {
                    return;
                }
                self.set_draft(text.clone());
                if self.continuous {
                    self.capture.stop();
                    let timer = self.schedule(self.settings.settle_delay);
                    self.transition_to(State::Capturing {
                        settling: Some(Settling { timer, text }),
                    });
                }
            }
            CaptureEvent::Error { error } => self.handle_capture_error(error),
            CaptureEvent::Ended => match self.state {
                State::Capturing { settling: None } | State::ArmedListening { timer: None } => {
                    self.after_capture_dropped(self.settings.rearm_delay);
                }
                _ => {}
            },
            CaptureEvent::RecordingReady { audio } => match self.state {
                State::ManualRecording(Recording::Live | Recording::Stopping) => {
                    if audio.is_empty() {
                        self.report_error(ErrorSource::Transcription, "empty recording".to_string());
                        self.transition_to(State::Idle);
                    } else {
                        let request = self.spawn_transcription(audio);
                        self.transition_to(State::ManualRecording(Recording::Transcribing(request)));
                    }
                }
                _ => debug!("recording delivered outside push-to-talk, discarded"),
            },
        }
    }

    fn handle_permission(&mut self, granted: bool) {
        if !self.permission_pending {
            debug!(granted, "unsolicited permission answer");
            return;
        }
        self.permission_pending = false;

        if !granted {
            self.report_error(
                ErrorSource::Capture,
                "please allow microphone access to use speech recognition".to_string(),
            );
            return;
        }
        if matches!(self.state, State::ManualRecording(_)) {
            self.reject("set_continuous", "manual recording in progress");
            return;
        }

        self.set_continuous(true);
        if self.state == State::Idle {
            self.start_listening();
        }
    }

    fn handle_capture_error(&mut self, error: CaptureErrorKind) {
        match self.state {
            State::ArmedListening { .. } | State::Capturing { settling: None } => {
                if matches!(error, CaptureErrorKind::NoSpeech | CaptureErrorKind::Aborted) {
                    info!(%error, "recognition ended without speech");
                } else {
                    self.report_error(ErrorSource::Capture, error.to_string());
                }
                if error == CaptureErrorKind::NotAllowed && self.continuous {
                    // Re-arming cannot succeed without the microphone.
                    self.set_continuous(false);
                }
                self.after_capture_dropped(self.settings.rearm_delay);
            }
            State::ManualRecording(Recording::Live | Recording::Stopping) => {
                self.report_error(ErrorSource::Capture, error.to_string());
                self.transition_to(State::Idle);
            }
            _ => debug!(%error, mode = %self.mode(), "capture error after capture was released"),
        }
    }

    /// Capture went away without a transcript to submit
    fn after_capture_dropped(&mut self, delay: Duration) {
        if self.continuous {
            self.rearm(delay);
        } else {
            self.transition_to(State::Idle);
        }
    }

    fn handle_playback(&mut self, event: PlaybackEvent) {
        if self.state != State::Speaking {
            debug!(?event, mode = %self.mode(), "playback event outside Speaking");
            return;
        }
        match event {
            PlaybackEvent::Started => debug!("playback started"),
            PlaybackEvent::Ended => self.after_machine_turn(self.settings.rearm_delay),
            PlaybackEvent::Error { message } => {
                self.report_error(ErrorSource::Playback, message);
                self.after_machine_turn(self.settings.recovery_rearm_delay);
            }
        }
    }

    /// The client hosting the microphone and loudspeaker went away
    fn handle_devices_lost(&mut self) {
        warn!(mode = %self.mode(), "device client disconnected");
        self.capture.observe(&CaptureEvent::Ended);
        self.playback.observe(&PlaybackEvent::Ended);

        let message = "device client disconnected".to_string();
        match self.state {
            State::Speaking => {
                self.report_error(ErrorSource::Playback, message);
                self.after_machine_turn(self.settings.recovery_rearm_delay);
            }
            State::ArmedListening { .. } | State::Capturing { settling: None } => {
                self.report_error(ErrorSource::Capture, message);
                self.set_continuous(false);
                self.set_draft(String::new());
                self.transition_to(State::Idle);
            }
            State::ManualRecording(Recording::Live | Recording::Stopping) => {
                self.report_error(ErrorSource::Capture, message);
                self.transition_to(State::Idle);
            }
            // Settled transcripts and outstanding gateway calls complete on their own.
            _ => {}
        }
    }

    fn handle_reply(&mut self, request: RequestId, result: Result<String, GatewayError>) {
        if self.state != State::AwaitingReply(request) {
            debug!(?request, "stale reply discarded");
            return;
        }

        let text = match result {
            Ok(text) => text,
            Err(e) => {
                self.report_error(ErrorSource::Reply, e.to_string());
                self.settings.apology.clone()
            }
        };
        self.append_turn(Role::Machine, text.clone());

        if self.continuous {
            self.synthesize(text);
        } else {
            self.transition_to(State::Idle);
        }
    }

    fn handle_synthesis(&mut self, request: RequestId, result: Result<Bytes, GatewayError>) {
        if self.state != State::Synthesizing(request) {
            debug!(?request, "stale synthesis discarded");
            return;
        }

        let audio = match result {
            Ok(audio) => audio,
            Err(e) => {
                // The reply stays readable in the log.
                self.report_error(ErrorSource::Synthesis, e.to_string());
                return self.after_machine_turn(self.settings.recovery_rearm_delay);
            }
        };

        if self.capture.is_active() {
            warn!("capture still active before playback, stopping it");
            self.capture.stop();
        }
        match self.playback.play(audio) {
            Ok(()) => self.transition_to(State::Speaking),
            Err(e) => {
                self.report_error(ErrorSource::Playback, e.to_string());
                self.after_machine_turn(self.settings.recovery_rearm_delay);
            }
        }
    }

    fn handle_transcription(&mut self, request: RequestId, result: Result<String, GatewayError>) {
        if self.state != State::ManualRecording(Recording::Transcribing(request)) {
            debug!(?request, "stale transcription discarded");
            return;
        }

        match result {
            Ok(text) => self.set_draft(text),
            Err(e) => self.report_error(ErrorSource::Transcription, e.to_string()),
        }
        self.transition_to(State::Idle);
    }

    /// Machine turn finished (spoken or not); listen again if continuous
    fn after_machine_turn(&mut self, delay: Duration) {
        if self.continuous {
            self.rearm(delay);
        } else {
            self.transition_to(State::Idle);
        }
    }

    fn handle_timer(&mut self, timer: TimerId) {
        match &self.state {
            State::ArmedListening { timer: Some(armed) } if *armed == timer => {
                self.start_listening();
            }
            State::Capturing {
                settling: Some(settling),
            } if settling.timer == timer => {
                let text = settling.text.clone();
                self.submit(text);
            }
            _ => debug!(?timer, "stale timer ignored"),
        }
    }

    fn rearm(&mut self, delay: Duration) {
        let timer = self.schedule(delay);
        debug!(delay_ms = delay.as_millis() as u64, "re-arm scheduled");
        self.transition_to(State::ArmedListening { timer: Some(timer) });
    }

    /// Issue the capture start; `Started` completes the move to `Capturing`
    fn start_listening(&mut self) {
        match self.capture.start_continuous() {
            Ok(()) => self.transition_to(State::ArmedListening { timer: None }),
            Err(CaptureError::AlreadyActive) => {
                debug!("recognition already live");
                self.transition_to(State::Capturing { settling: None });
            }
            Err(e) => {
                self.report_error(ErrorSource::Capture, e.to_string());
                // Nothing will re-arm from Idle.
                if self.continuous {
                    self.set_continuous(false);
                }
                self.transition_to(State::Idle);
            }
        }
    }

    /// Stop continuous capture if the current mode holds the microphone
    fn release_microphone(&mut self) {
        if matches!(
            self.state,
            State::ArmedListening { .. } | State::Capturing { .. }
        ) {
            self.capture.stop();
        }
    }

    fn submit(&mut self, text: String) {
        self.append_turn(Role::Human, text);
        self.set_draft(String::new());

        let request = self.spawn_reply();
        self.transition_to(State::AwaitingReply(request));
    }

    fn synthesize(&mut self, text: String) {
        let request = self.spawn_synthesis(text);
        self.transition_to(State::Synthesizing(request));
    }

    fn append_turn(&mut self, role: Role, text: String) {
        let turn = self.log.append(role, text).clone();
        info!(role = %turn.role, id = %turn.id, turns = self.log.len(), "turn appended");
        self.snapshot_tx.send_modify(|s| s.turns.push(turn.clone()));
        let _ = self.event_tx.send(StateEvent::TurnAppended { turn });
    }

    fn set_draft(&mut self, text: String) {
        if self.draft == text {
            return;
        }
        self.draft = text;
        self.snapshot_tx.send_modify(|s| s.draft = self.draft.clone());
        let _ = self.event_tx.send(StateEvent::DraftUpdated {
            text: self.draft.clone(),
        });
    }

    fn set_continuous(&mut self, enabled: bool) {
        self.continuous = enabled;
        self.snapshot_tx.send_modify(|s| s.continuous = enabled);
        info!(enabled, "continuous listening changed");
        let _ = self.event_tx.send(StateEvent::ContinuousModeChanged { enabled });
    }

    fn report_error(&self, source: ErrorSource, message: String) {
        warn!(?source, %message, "error reported");
        let _ = self.event_tx.send(StateEvent::ErrorReported { source, message });
    }

    fn reject(&self, command: &str, reason: &str) {
        info!(command, reason, mode = %self.mode(), "command rejected");
        let _ = self.event_tx.send(StateEvent::CommandRejected {
            command: command.to_string(),
            reason: reason.to_string(),
        });
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn schedule(&mut self, delay: Duration) -> TimerId {
        let timer = TimerId(self.next_id());
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inbox.send(Input::Timer(timer));
        });
        timer
    }

    fn spawn_reply(&mut self) -> RequestId {
        let request = RequestId(self.next_id());
        let history = self.log.history();
        let gateway = Arc::clone(&self.gateway);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = gateway.get_reply(&history).await;
            let _ = inbox.send(Input::Reply { request, result });
        });
        request
    }

    fn spawn_synthesis(&mut self, text: String) -> RequestId {
        let request = RequestId(self.next_id());
        let gateway = Arc::clone(&self.gateway);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = gateway.synthesize(&text).await;
            let _ = inbox.send(Input::Synthesis { request, result });
        });
        request
    }

    fn spawn_transcription(&mut self, audio: Bytes) -> RequestId {
        let request = RequestId(self.next_id());
        let gateway = Arc::clone(&self.gateway);
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = gateway.transcribe(audio).await;
            let _ = inbox.send(Input::Transcription { request, result });
        });
        request
    }

    fn transition_to(&mut self, new_state: State) {
        let old_mode = self.state.mode();
        let new_mode = new_state.mode();
        self.state = new_state;

        if old_mode == new_mode {
            return;
        }

        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;
        self.state_entered_at = Instant::now();
        self.snapshot_tx.send_modify(|s| s.mode = new_mode);

        info!(
            from = %old_mode,
            to = %new_mode,
            duration_ms = duration_ms,
            "mode transition"
        );

        let _ = self.event_tx.send(StateEvent::ModeChanged {
            from: old_mode,
            to: new_mode,
            duration_ms,
        });
    }
}
