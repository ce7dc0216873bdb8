//! # WebSocket Poll Example
//!
//! Plays one poll against a session provider reachable over WebSocket.
//!
//! - `create <item-a> <item-b>` hosts a new poll and waits for an opponent
//! - `find` joins a random open poll and votes for the first item
//!
//! Shuts down gracefully on Ctrl+C or disconnect.
//!
//! ## Running
//!
//! ```sh
//! # Start a session provider on localhost:3536, then:
//! cargo run --example websocket_poll -- create Pizza Sushi
//! cargo run --example websocket_poll -- find
//!
//! # Override the provider URL:
//! DUEL_POLL_URL=ws://my-server:3536/ws cargo run --example websocket_poll -- find
//! ```

use duel_poll::{Phase, PollClient, PollConfig, PollEvent, WebSocketTransport};

/// Default provider URL when `DUEL_POLL_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:3536/ws";

enum Mode {
    Create { item_a: String, item_b: String },
    Find,
}

fn parse_mode() -> Result<Mode, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [cmd, a, b] if cmd == "create" => Ok(Mode::Create {
            item_a: a.clone(),
            item_b: b.clone(),
        }),
        [cmd] if cmd == "find" => Ok(Mode::Find),
        _ => Err("usage: websocket_poll create <item-a> <item-b> | find".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mode = parse_mode()?;
    let url = std::env::var("DUEL_POLL_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    tracing::info!("Connecting to {url}");

    // ── Connect ─────────────────────────────────────────────────────
    let transport = WebSocketTransport::connect(&url).await?;
    let (mut client, mut event_rx) = PollClient::start(transport, PollConfig::new("RustPlayer"));

    let mut requested = false;
    let mut first_item = None;

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                if client.is_ready() && !requested {
                    requested = true;
                    let result = match &mode {
                        Mode::Create { item_a, item_b } => {
                            client.create_session(item_a.as_str(), item_b.as_str()).await
                        }
                        Mode::Find => client.find_session().await,
                    };
                    if let Err(e) = result {
                        tracing::error!("Request rejected: {e}");
                        break;
                    }
                }

                match event {
                    PollEvent::PhaseChanged { phase: Phase::Voting, item_a, .. } => {
                        first_item = item_a;
                        if !client.is_authority() {
                            if let Some(item) = first_item.clone() {
                                client.submit_vote(item).await?;
                            }
                        }
                    }
                    PollEvent::PhaseChanged { phase, .. } => {
                        tracing::info!("Phase → {phase:?}");
                        if phase == Phase::MainMenu && first_item.is_some() {
                            break;
                        }
                    }
                    PollEvent::TimerTick { remaining_secs } => {
                        tracing::info!("{remaining_secs}s left");
                    }
                    PollEvent::ResultAnnounced { outcome } => {
                        tracing::info!("Result: {outcome}");
                    }
                    PollEvent::Popup { message } => tracing::warn!("{message}"),
                    PollEvent::Status { message } => tracing::info!("{message}"),
                    PollEvent::SessionFailed { kind, reason } => {
                        tracing::error!("Session failed [{kind:?}]: {reason}");
                        break;
                    }
                    PollEvent::Disconnected { reason } => {
                        tracing::warn!("Disconnected: {}", reason.as_deref().unwrap_or("unknown"));
                        break;
                    }
                    other => tracing::debug!("Event: {other:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.shutdown().await;
    tracing::info!("Client shut down. Goodbye!");
    Ok(())
}
