//! Unix domain socket server for IPC
//!
//! Provides request-response communication with the presentation client,
//! relays its commands and device reports into the coordinator inbox, and
//! pushes state events and device commands to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::coordinator::{Input, Snapshot};
use crate::events::{DeviceCommand, StateEvent};

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// Cap for frames that carry no recorded audio
const CONTROL_FRAME_BYTES: usize = 1024 * 1024;

/// Channels connecting the server to the coordinator and the device bridges
pub struct ServerChannels {
    /// Coordinator inbox
    pub inbox: mpsc::UnboundedSender<Input>,
    pub events: broadcast::Sender<StateEvent>,
    pub devices: broadcast::Sender<DeviceCommand>,
    /// Coordinator state as of the last handled input
    pub snapshot: watch::Receiver<Snapshot>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// What every client handler can reach
struct Shared {
    channels: ServerChannels,
    start_time: Instant,
    /// Largest frame accepted, reached only by recorded audio
    max_frame_bytes: usize,
}

type Subscription = (
    broadcast::Receiver<StateEvent>,
    broadcast::Receiver<DeviceCommand>,
);

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, max_frame_bytes: usize, channels: ServerChannels) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            channels,
            start_time: Instant::now(),
            max_frame_bytes,
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // Frames are read on their own task so a partial read is never
        // dropped by the select below.
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(16);
        let max_frame_bytes = shared.max_frame_bytes;
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader, max_frame_bytes).await {
                    Ok(Some(frame)) => {
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(?e, "dropping client connection");
                        break;
                    }
                }
            }
        });

        let mut subscription: Option<Subscription> = None;
        let mut hosts_devices = false;

        let result = loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else { break Ok(()) };

                    let response = match serde_json::from_slice::<Request>(&frame) {
                        Ok(request) if frame.len() > CONTROL_FRAME_BYTES && !request.carries_audio() => {
                            warn!(len = frame.len(), "oversized control frame");
                            Response::Error {
                                code: "frame_too_large".to_string(),
                                message: format!(
                                    "frames over {CONTROL_FRAME_BYTES} bytes must carry a recording"
                                ),
                            }
                        }
                        Ok(request) => {
                            debug!(?request, "received request");
                            let (response, subscribe) = Self::process_request(request, &shared).await;
                            if subscribe && subscription.is_none() {
                                debug!("client subscribed to notifications");
                                hosts_devices = true;
                                subscription = Some((
                                    shared.channels.events.subscribe(),
                                    shared.channels.devices.subscribe(),
                                ));
                            }
                            response
                        }
                        Err(e) => {
                            warn!(error = %e, "unparseable request");
                            Response::Error {
                                code: "invalid_request".to_string(),
                                message: e.to_string(),
                            }
                        }
                    };

                    if let Err(e) = send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                notification = next_notification(&mut subscription) => {
                    match notification {
                        Some(notification) => {
                            if let Err(e) = send_message(&mut writer, &notification).await {
                                break Err(e);
                            }
                        }
                        None => subscription = None,
                    }
                }
            }
        };

        reader_task.abort();

        drop(subscription);
        if hosts_devices && shared.channels.devices.receiver_count() == 0 {
            info!("last device client disconnected");
            let _ = shared.channels.inbox.send(Input::DevicesLost);
        }

        result
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, shared: &Shared) -> (Response, bool) {
        let input = match request {
            Request::Ping => return (Response::Pong, false),

            Request::GetStatus => {
                let snapshot = shared.channels.snapshot.borrow();
                let status = DaemonStatus {
                    mode: snapshot.mode,
                    continuous: snapshot.continuous,
                    draft: snapshot.draft.clone(),
                    turn_count: snapshot.turns.len(),
                    uptime_secs: shared.start_time.elapsed().as_secs(),
                    ..DaemonStatus::default()
                };
                return (Response::Status(status), false);
            }

            Request::GetConversation => {
                let turns = shared.channels.snapshot.borrow().turns.clone();
                return (Response::Conversation { turns }, false);
            }

            Request::Subscribe => return (Response::Subscribed, true),

            Request::CaptureEvent { event } => Input::Capture(event),

            Request::PlaybackEvent { event } => Input::Playback(event),

            command => match command.into_command() {
                Some(command) => Input::Command(command),
                None => {
                    return (
                        Response::Error {
                            code: "invalid_request".to_string(),
                            message: "request carries no command".to_string(),
                        },
                        false,
                    )
                }
            },
        };

        match shared.channels.inbox.send(input) {
            Ok(()) => (Response::Accepted, false),
            Err(_) => (
                Response::Error {
                    code: "unavailable".to_string(),
                    message: "coordinator is not running".to_string(),
                },
                false,
            ),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Read one length-prefixed frame; `None` on a clean disconnect
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_frame_bytes: usize) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_frame_bytes {
        anyhow::bail!("frame of {len} bytes exceeds limit of {max_frame_bytes}");
    }

    let mut msg_buf = vec![0u8; len];
    reader
        .read_exact(&mut msg_buf)
        .await
        .context("connection closed mid-frame")?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = frame_header(msg_bytes.len())?;

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

/// Little-endian length prefix for a frame body
fn frame_header(len: usize) -> Result<[u8; 4]> {
    let len = u32::try_from(len).with_context(|| format!("message of {len} bytes cannot be framed"))?;
    Ok(len.to_le_bytes())
}

/// Next push for a subscribed client; never resolves for unsubscribed ones
async fn next_notification(subscription: &mut Option<Subscription>) -> Option<Notification> {
    let Some((events, devices)) = subscription else {
        return std::future::pending().await;
    };

    loop {
        let received = tokio::select! {
            event = events.recv() => event.map(Notification::State),
            command = devices.recv() => command.map(Notification::Device),
        };
        match received {
            Ok(notification) => return Some(notification),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "subscriber lagged, notifications dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use crate::capture::CaptureEvent;
    use crate::conversation::{ConversationLog, Role};
    use crate::coordinator::{Mode, UserCommand};

    struct Fixture {
        server: Arc<Server>,
        inbox: mpsc::UnboundedReceiver<Input>,
        events: broadcast::Sender<StateEvent>,
        devices: broadcast::Sender<DeviceCommand>,
        snapshot: watch::Sender<Snapshot>,
        socket_path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn start() -> Fixture {
        start_with(1024)
    }

    fn start_with(max_frame_bytes: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(16);
        let (devices, _) = broadcast::channel(16);
        let (snapshot, snapshot_rx) = watch::channel(Snapshot {
            mode: Mode::Idle,
            continuous: false,
            draft: String::new(),
            turns: ConversationLog::new("be brief").turns().to_vec(),
        });

        let server = Server::new(
            &socket_path,
            max_frame_bytes,
            ServerChannels {
                inbox: inbox_tx,
                events: events.clone(),
                devices: devices.clone(),
                snapshot: snapshot_rx,
            },
        )
        .unwrap();
        let server = Arc::new(server);
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        Fixture {
            server,
            inbox,
            events,
            devices,
            snapshot,
            socket_path,
            _dir: dir,
        }
    }

    async fn request(stream: &mut UnixStream, json: &str) -> serde_json::Value {
        let bytes = json.as_bytes();
        stream.write_all(&(bytes.len() as u32).to_le_bytes()).await.unwrap();
        stream.write_all(bytes).await.unwrap();
        receive(stream).await
    }

    async fn receive(stream: &mut UnixStream) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(stream, usize::MAX))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    async fn next_input(inbox: &mut mpsc::UnboundedReceiver<Input>) -> Input {
        tokio::time::timeout(Duration::from_secs(5), inbox.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let fixture = start();
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let pong = request(&mut stream, r#"{"type":"ping"}"#).await;
        assert_eq!(pong["type"], "pong");

        let status = request(&mut stream, r#"{"type":"get_status"}"#).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["mode"], "idle");
        assert_eq!(status["turn_count"], 1);
    }

    #[tokio::test]
    async fn test_commands_and_reports_reach_inbox() {
        let mut fixture = start();
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let reply = request(&mut stream, r#"{"type":"submit","text":"hello"}"#).await;
        assert_eq!(reply["type"], "accepted");
        let reply = request(
            &mut stream,
            r#"{"type":"capture_event","event":{"kind":"started"}}"#,
        )
        .await;
        assert_eq!(reply["type"], "accepted");

        assert!(matches!(
            next_input(&mut fixture.inbox).await,
            Input::Command(UserCommand::Submit(ref text)) if text == "hello"
        ));
        assert!(matches!(
            next_input(&mut fixture.inbox).await,
            Input::Capture(CaptureEvent::Started)
        ));
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection() {
        let fixture = start();
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let reply = request(&mut stream, r#"{"type":"dance"}"#).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "invalid_request");

        let pong = request(&mut stream, r#"{"type":"ping"}"#).await;
        assert_eq!(pong["type"], "pong");
    }

    #[tokio::test]
    async fn test_oversized_frame_disconnects() {
        let fixture = start();
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        stream.write_all(&4096u32.to_le_bytes()).await.unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_large_frames_reserved_for_recordings() {
        let mut fixture = start_with(4 * 1024 * 1024);
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();
        let big = vec![b'a'; CONTROL_FRAME_BYTES + 16];

        let text = String::from_utf8(big.clone()).unwrap();
        let submit = serde_json::json!({ "type": "submit", "text": text }).to_string();
        let reply = request(&mut stream, &submit).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "frame_too_large");

        let recording = serde_json::json!({
            "type": "capture_event",
            "event": { "kind": "recording_ready", "audio": STANDARD.encode(&big) },
        })
        .to_string();
        let reply = request(&mut stream, &recording).await;
        assert_eq!(reply["type"], "accepted");

        match next_input(&mut fixture.inbox).await {
            Input::Capture(CaptureEvent::RecordingReady { audio }) => assert_eq!(audio.len(), big.len()),
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_pushes() {
        let fixture = start();
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let reply = request(&mut stream, r#"{"type":"subscribe"}"#).await;
        assert_eq!(reply["type"], "subscribed");

        fixture.devices.send(DeviceCommand::StartRecognition).unwrap();
        let push = receive(&mut stream).await;
        assert_eq!(push["type"], "device");
        assert_eq!(push["payload"]["command"], "start_recognition");

        fixture
            .events
            .send(StateEvent::ContinuousModeChanged { enabled: true })
            .unwrap();
        let push = receive(&mut stream).await;
        assert_eq!(push["type"], "state");
        assert_eq!(push["payload"]["type"], "continuous_mode_changed");
    }

    #[tokio::test]
    async fn test_last_device_client_leaving_is_reported() {
        let mut fixture = start();
        let mut host = UnixStream::connect(&fixture.socket_path).await.unwrap();
        let mut spare = UnixStream::connect(&fixture.socket_path).await.unwrap();
        assert_eq!(request(&mut host, r#"{"type":"subscribe"}"#).await["type"], "subscribed");
        assert_eq!(request(&mut spare, r#"{"type":"subscribe"}"#).await["type"], "subscribed");

        // A plain requester leaving is not a device loss
        let mut viewer = UnixStream::connect(&fixture.socket_path).await.unwrap();
        assert_eq!(request(&mut viewer, r#"{"type":"ping"}"#).await["type"], "pong");
        drop(viewer);

        drop(spare);
        while fixture.devices.receiver_count() > 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(fixture.inbox.try_recv().is_err());
        drop(host);

        assert!(matches!(next_input(&mut fixture.inbox).await, Input::DevicesLost));
        assert_eq!(fixture.devices.receiver_count(), 0);
        assert!(fixture.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_status_reads_coordinator_snapshot() {
        let fixture = start();
        let mut log = ConversationLog::new("be brief");
        log.append(Role::Human, "hello");

        fixture.snapshot.send_modify(|s| {
            s.mode = Mode::AwaitingReply;
            s.turns = log.turns().to_vec();
        });

        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();
        let status = request(&mut stream, r#"{"type":"get_status"}"#).await;
        assert_eq!(status["mode"], "awaiting_reply");
        assert_eq!(status["turn_count"], 2);

        let conversation = request(&mut stream, r#"{"type":"get_conversation"}"#).await;
        assert_eq!(conversation["turns"][1]["text"], "hello");
        assert_eq!(conversation["turns"][0]["role"], "directive");
    }

    #[test]
    fn test_frame_header_rejects_unframeable_lengths() {
        assert_eq!(frame_header(5).unwrap(), [5, 0, 0, 0]);
        assert!(frame_header(u32::MAX as usize).is_ok());
        assert!(frame_header(u32::MAX as usize + 1).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let fixture = start();
        assert!(fixture.socket_path.exists());
        fixture.server.shutdown().await;
        assert!(!fixture.socket_path.exists());
    }
}
