//! # Two-Player Poll Example
//!
//! Runs a complete poll between two clients inside one process:
//!
//! 1. Start an in-process [`MemoryHub`] session provider
//! 2. Alice creates a "Pizza" vs "Sushi" poll
//! 3. Bob finds it through random matchmaking, which starts the round
//! 4. Bob votes after two seconds; Alice announces the result
//! 5. Both return to the main menu after the result grace
//!
//! ## Running
//!
//! ```sh
//! cargo run --example two_player_poll
//!
//! # Watch the protocol traffic:
//! RUST_LOG=duel_poll=debug cargo run --example two_player_poll
//! ```

use std::time::Duration;

use duel_poll::{MemoryHub, Phase, PollClient, PollConfig, PollEvent};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Provider and clients ────────────────────────────────────────
    let hub = MemoryHub::new();
    let config = |name: &str| PollConfig::new(name).with_result_grace(Duration::from_secs(2));

    let (mut alice, mut alice_events) = PollClient::start(hub.connect(), config("alice"));
    let (mut bob, mut bob_events) = PollClient::start(hub.connect(), config("bob"));

    wait_ready(&alice, &mut alice_events).await;
    wait_ready(&bob, &mut bob_events).await;

    // ── Alice hosts, Bob joins ──────────────────────────────────────
    alice.create_session("Pizza", "Sushi").await?;
    bob.find_session().await?;

    let bob_task = tokio::spawn(async move {
        let mut voted = false;
        while let Some(event) = bob_events.recv().await {
            match event {
                PollEvent::TimerTick { remaining_secs } => {
                    tracing::info!("[bob] {remaining_secs}s left");
                    if remaining_secs <= 28 && !voted {
                        voted = true;
                        if let Err(e) = bob.submit_vote("Sushi").await {
                            tracing::warn!("[bob] vote rejected: {e}");
                        }
                    }
                }
                PollEvent::ResultAnnounced { outcome } => tracing::info!("[bob] result: {outcome}"),
                PollEvent::PhaseChanged {
                    phase: Phase::MainMenu,
                    ..
                } if voted => break,
                other => tracing::debug!("[bob] {other:?}"),
            }
        }
        bob.shutdown().await;
    });

    // ── Alice's view ────────────────────────────────────────────────
    let mut round_seen = false;
    while let Some(event) = alice_events.recv().await {
        match event {
            PollEvent::PhaseChanged { phase, .. } => {
                tracing::info!("[alice] phase: {phase:?}");
                round_seen |= phase == Phase::Voting;
                if phase == Phase::MainMenu && round_seen {
                    break;
                }
            }
            PollEvent::ResultAnnounced { outcome } => tracing::info!("[alice] result: {outcome}"),
            PollEvent::Status { message } => tracing::info!("[alice] {message}"),
            PollEvent::Disconnected { .. } => break,
            other => tracing::debug!("[alice] {other:?}"),
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    alice.shutdown().await;
    bob_task.await?;
    tracing::info!("Poll finished. Goodbye!");
    Ok(())
}

/// Drain events until the client has reached the lobby.
async fn wait_ready(client: &PollClient, events: &mut mpsc::Receiver<PollEvent>) {
    while !client.is_ready() {
        match events.recv().await {
            Some(event) => tracing::debug!("{event:?}"),
            None => return,
        }
    }
}
