//! parley-daemon: turn-taking coordinator for a spoken dialogue front end
//!
//! The daemon sits behind a presentation client that hosts the microphone,
//! speech recognizer and loudspeaker. It provides:
//! - A coordinator that keeps capture and playback mutually exclusive and
//!   re-opens the microphone after every machine turn in continuous mode
//! - HTTP calls to the reply, speech synthesis and transcription services
//! - An IPC server for client commands, device reports and notifications
//!
//! Out of scope: rendering, text scaling, voice activity detection, barge-in.

mod capture;
mod config;
mod conversation;
mod coordinator;
mod events;
mod gateway;
mod ipc;
mod lifecycle;
mod playback;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::capture::BridgedCapture;
use crate::config::Config;
use crate::conversation::ConversationLog;
use crate::coordinator::{Collaborators, Coordinator};
use crate::events::{DeviceCommand, StateEvent};
use crate::gateway::HttpGateway;
use crate::ipc::{Server, ServerChannels};
use crate::lifecycle::ShutdownSignal;
use crate::playback::BridgedPlayback;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "parley-daemon starting");

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;
    config.ensure_dirs()?;
    info!(
        socket_path = ?config.socket_path,
        gateway = %config.gateway.base_url,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Create channels for inter-component communication
    // IPC server + spawned work -> coordinator
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    // Coordinator -> IPC server (state events for subscribers)
    let (event_tx, _) = broadcast::channel::<StateEvent>(256);
    // Device bridges -> subscribed client; sends fail while no client listens
    let (device_tx, _) = broadcast::channel::<DeviceCommand>(64);

    let log = ConversationLog::new(config.directive.clone());
    let gateway = HttpGateway::new(config.gateway.clone()).context("failed to build HTTP client")?;

    // Create the coordinator
    let mut coordinator = Coordinator::new(
        config.coordinator_settings(),
        log,
        Collaborators {
            capture: Box::new(BridgedCapture::new(device_tx.clone())),
            playback: Box::new(BridgedPlayback::new(device_tx.clone())),
            gateway: Arc::new(gateway),
        },
        inbox_tx.clone(),
        event_tx.clone(),
    );

    // Create IPC server; status and conversation queries read the coordinator's snapshot
    let server = Server::new(
        &config.socket_path,
        config.max_frame_bytes,
        ServerChannels {
            inbox: inbox_tx,
            events: event_tx,
            devices: device_tx,
            snapshot: coordinator.snapshot(),
        },
    )?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the coordinator (processes commands, device reports, completions)
        _ = coordinator.run(inbox_rx) => {
            info!("coordinator exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "signal handling unavailable, stopping"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;

    info!("parley-daemon stopped");

    Ok(())
}
