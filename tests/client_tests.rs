#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration-style client tests for duel-poll.
//!
//! Uses the shared `MockTransport` from `tests/common` to play the session
//! provider and verify that `PollClient` drives the poll protocol correctly,
//! including phase transitions, outgoing messages, and event delivery.

mod common;

use std::time::Duration;

use duel_poll::protocol::{ClientMessage, RoomStatus, RpcCall, RpcTarget, ServerMessage};
use duel_poll::{
    ErrorCode, FailureKind, Phase, PollClient, PollConfig, PollError, PollEvent, SignIndex,
    Transport,
};
use tokio::sync::mpsc;

use common::{
    alice, bob, connected_to_master, error_message, member, room_created_for_alice,
    room_joined_for_bob, rpc, start_voting, wait_for_event, wait_until, MockServer, MockTransport,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn fast_config(name: &str) -> PollConfig {
    PollConfig::new(name)
        .with_result_grace(Duration::from_millis(50))
        .with_opponent_left_grace(Duration::from_millis(50))
}

/// Start a client and complete the provider handshake.
async fn ready_client(
    local: uuid::Uuid,
    config: PollConfig,
) -> (PollClient, mpsc::Receiver<PollEvent>, MockServer) {
    let (transport, server) = MockTransport::new();
    let (client, mut events) = PollClient::start(transport, config);
    let first = events.recv().await.expect("Connected event");
    assert_eq!(first, PollEvent::Connected);
    server.push(&connected_to_master(local));
    server.push(&ServerMessage::JoinedLobby);
    wait_until(|| client.is_ready()).await;
    (client, events, server)
}

/// Bob matched into Alice's room and the round is running.
async fn participant_in_round() -> (PollClient, mpsc::Receiver<PollEvent>, MockServer) {
    let (client, mut events, server) = ready_client(bob(), fast_config("bob")).await;
    client.find_session().await.expect("find_session");
    server.push(&room_joined_for_bob());
    server.push(&rpc(alice(), RpcTarget::All, start_voting(30.0)));
    wait_for_event(&mut events, |e| matches!(e, PollEvent::TimerTick { .. })).await;
    assert_eq!(client.current_phase(), Phase::Voting);
    (client, events, server)
}

/// Alice created a room and Bob entered it.
async fn authority_with_opponent() -> (PollClient, mpsc::Receiver<PollEvent>, MockServer) {
    let (client, events, server) = ready_client(alice(), fast_config("alice")).await;
    client
        .create_session("Pizza", "Sushi")
        .await
        .expect("create_session");
    server.push(&room_created_for_alice());
    server.push(&ServerMessage::PlayerEntered {
        player: member(bob(), "bob", 2),
    });
    wait_until(|| {
        server
            .sent_rpcs()
            .iter()
            .any(|(_, call)| matches!(call, RpcCall::StartVoting { .. }))
    })
    .await;
    (client, events, server)
}

fn count_rpcs(server: &MockServer, pred: impl Fn(&RpcCall) -> bool) -> usize {
    server.sent_rpcs().iter().filter(|(_, c)| pred(c)).count()
}

// ════════════════════════════════════════════════════════════════════
// Handshake
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn handshake_sends_connect_then_join_lobby() {
    let (mut client, _events, server) = ready_client(alice(), PollConfig::new("alice")).await;

    let sent = server.sent();
    match sent.first() {
        Some(ClientMessage::Connect {
            player_name,
            sdk_version,
        }) => {
            assert_eq!(player_name, "alice");
            assert_eq!(sdk_version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
        }
        other => panic!("expected Connect first, got {other:?}"),
    }
    assert!(matches!(sent.get(1), Some(ClientMessage::JoinLobby)));
    assert_eq!(client.current_player_id().await, Some(alice()));
    assert_eq!(client.current_phase(), Phase::MainMenu);

    client.shutdown().await;
}

#[tokio::test]
async fn boxed_transport_drives_the_client() {
    let (transport, server) = MockTransport::new();
    let boxed: Box<dyn Transport> = Box::new(transport);
    let (mut client, _events) = PollClient::start(boxed, PollConfig::new("alice"));

    server.push(&connected_to_master(alice()));
    server.push(&ServerMessage::JoinedLobby);
    wait_until(|| client.is_ready()).await;

    client.shutdown().await;
    assert!(server.is_closed());
}

// ════════════════════════════════════════════════════════════════════
// Local intent rules
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn intents_outside_their_phase_are_rejected() {
    let (mut client, _events, server) = ready_client(alice(), PollConfig::new("alice")).await;
    let before = server.sent().len();

    assert!(matches!(
        client.back_to_menu().await,
        Err(PollError::InvalidPhase { .. })
    ));
    assert!(matches!(
        client.submit_vote("Pizza").await,
        Err(PollError::InvalidPhase { .. })
    ));
    assert!(matches!(
        client.cancel_pending_creation().await,
        Err(PollError::InvalidPhase { .. })
    ));
    client.begin_poll_creation().await.expect("open creation");
    assert!(matches!(
        client.find_session().await,
        Err(PollError::InvalidPhase { .. })
    ));
    tokio_test::assert_ok!(client.back_to_menu().await);

    assert_eq!(server.sent().len(), before);
    client.shutdown().await;
}

#[tokio::test]
async fn create_from_creation_screen_uses_poll_room_options() {
    let (mut client, _events, server) = ready_client(alice(), PollConfig::new("alice")).await;

    client.begin_poll_creation().await.expect("open creation");
    client
        .create_session("Pizza", "Sushi")
        .await
        .expect("create_session");

    match server.sent().last() {
        Some(ClientMessage::CreateRoom { options, .. }) => {
            assert_eq!(options.max_players, 2);
            assert!(options.is_open && options.is_visible);
            assert_eq!(options.properties.item_b.as_deref(), Some("Sushi"));
            assert_eq!(options.properties.status, Some(RoomStatus::Waiting));
        }
        other => panic!("expected CreateRoom, got {other:?}"),
    }
    assert_eq!(client.current_phase(), Phase::WaitingForPlayer);

    // A second request while the first is pending is refused.
    tokio_test::assert_err!(client.find_session().await);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Participant side
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn participant_round_from_match_to_result() {
    let (client, mut events, server) = ready_client(bob(), fast_config("bob")).await;

    client.find_session().await.expect("find_session");
    match server.sent().last() {
        Some(ClientMessage::JoinRandomRoom {
            expected_properties,
            max_players,
        }) => {
            assert_eq!(expected_properties.status, Some(RoomStatus::Waiting));
            assert_eq!(*max_players, 2);
        }
        other => panic!("expected JoinRandomRoom, got {other:?}"),
    }

    server.push(&room_joined_for_bob());
    let joined = wait_for_event(&mut events, |e| {
        matches!(e, PollEvent::PhaseChanged { item_a: Some(_), .. })
    })
    .await;
    assert_eq!(
        joined,
        PollEvent::PhaseChanged {
            phase: Phase::WaitingForPlayer,
            item_a: Some("Pizza".into()),
            item_b: Some("Sushi".into()),
        }
    );
    assert!(!client.is_authority());

    server.push(&rpc(alice(), RpcTarget::All, start_voting(30.0)));
    let tick = wait_for_event(&mut events, |e| matches!(e, PollEvent::TimerTick { .. })).await;
    assert_eq!(tick, PollEvent::TimerTick { remaining_secs: 30 });

    client.select_sign(SignIndex::B).await.expect("select_sign");
    client.submit_vote("Sushi").await.expect("submit_vote");
    // A second vote in the same round is swallowed.
    client.submit_vote("Pizza").await.expect("second submit_vote");

    let rpcs = server.sent_rpcs();
    assert!(rpcs.contains(&(
        RpcTarget::Authority,
        RpcCall::UpdateSignSelection {
            index: SignIndex::B
        }
    )));
    assert!(rpcs.contains(&(
        RpcTarget::Authority,
        RpcCall::SubmitVote {
            item: "Sushi".into()
        }
    )));
    assert_eq!(
        count_rpcs(&server, |c| matches!(c, RpcCall::SubmitVote { .. })),
        1
    );

    server.push(&rpc(
        alice(),
        RpcTarget::All,
        RpcCall::AnnounceResult {
            outcome: "Sushi".into(),
        },
    ));
    let result = wait_for_event(&mut events, |e| matches!(e, PollEvent::ResultAnnounced { .. })).await;
    assert_eq!(
        result,
        PollEvent::ResultAnnounced {
            outcome: "Sushi".into()
        }
    );
    assert_eq!(client.current_phase(), Phase::Results);

    // After the result grace every member leaves on its own.
    wait_until(|| {
        server
            .sent()
            .iter()
            .any(|m| matches!(m, ClientMessage::LeaveRoom))
    })
    .await;
    server.push(&ServerMessage::LeftRoom);
    wait_until(|| client.current_phase() == Phase::MainMenu).await;
}

#[tokio::test]
async fn result_from_non_authority_is_ignored() {
    let (mut client, mut events, server) = participant_in_round().await;

    server.push(&rpc(
        bob(),
        RpcTarget::All,
        RpcCall::AnnounceResult {
            outcome: "Forged".into(),
        },
    ));
    server.push(&rpc(
        alice(),
        RpcTarget::All,
        RpcCall::AnnounceResult {
            outcome: "Pizza".into(),
        },
    ));

    let result = wait_for_event(&mut events, |e| matches!(e, PollEvent::ResultAnnounced { .. })).await;
    assert_eq!(
        result,
        PollEvent::ResultAnnounced {
            outcome: "Pizza".into()
        }
    );

    client.shutdown().await;
}

#[tokio::test]
async fn authority_sign_selection_is_shown() {
    let (mut client, mut events, server) = participant_in_round().await;

    server.push(&rpc(
        alice(),
        RpcTarget::All,
        RpcCall::UpdateSignSelection {
            index: SignIndex::A,
        },
    ));
    let shown = wait_for_event(&mut events, |e| matches!(e, PollEvent::SignSelected { .. })).await;
    assert_eq!(
        shown,
        PollEvent::SignSelected {
            index: SignIndex::A
        }
    );

    client.shutdown().await;
}

#[tokio::test]
async fn authority_leaving_mid_round_ends_the_session() {
    let (mut client, mut events, server) = participant_in_round().await;

    server.push(&ServerMessage::PlayerLeft {
        player_id: alice(),
    });
    // Bob is promoted and tells the room the opponent is gone.
    wait_until(|| count_rpcs(&server, |c| matches!(c, RpcCall::OpponentLeft)) == 1).await;
    server.push(&rpc(bob(), RpcTarget::All, RpcCall::OpponentLeft));

    wait_for_event(&mut events, |e| matches!(e, PollEvent::Popup { .. })).await;
    let failed = wait_for_event(&mut events, |e| matches!(e, PollEvent::SessionFailed { .. })).await;
    assert!(matches!(
        failed,
        PollEvent::SessionFailed {
            kind: FailureKind::PeerDeparture,
            ..
        }
    ));

    wait_until(|| {
        server
            .sent()
            .iter()
            .any(|m| matches!(m, ClientMessage::LeaveRoom))
    })
    .await;

    client.shutdown().await;
}

#[tokio::test]
async fn empty_lobby_reports_no_match() {
    let (mut client, mut events, server) = ready_client(bob(), PollConfig::new("bob")).await;

    client.find_session().await.expect("find_session");
    server.push(&ServerMessage::JoinRandomFailed {
        reason: "no open rooms".into(),
        error_code: Some(ErrorCode::NoMatchFound),
    });

    let popup = wait_for_event(&mut events, |e| matches!(e, PollEvent::Popup { .. })).await;
    assert_eq!(popup, PollEvent::popup("No open poll found. Create one!"));
    let failed = wait_for_event(&mut events, |e| matches!(e, PollEvent::SessionFailed { .. })).await;
    assert!(matches!(
        failed,
        PollEvent::SessionFailed {
            kind: FailureKind::NoMatch,
            ..
        }
    ));
    assert_eq!(client.current_phase(), Phase::MainMenu);

    client.shutdown().await;
}

#[tokio::test]
async fn leaving_before_match_arrives_leaves_the_room() {
    let (mut client, _events, server) = ready_client(bob(), PollConfig::new("bob")).await;

    client.find_session().await.expect("find_session");
    client.leave_session().await.expect("leave_session");
    assert_eq!(client.current_phase(), Phase::MainMenu);

    server.push(&room_joined_for_bob());
    wait_until(|| {
        server
            .sent()
            .iter()
            .any(|m| matches!(m, ClientMessage::LeaveRoom))
    })
    .await;
    assert_eq!(client.current_phase(), Phase::MainMenu);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Authority side
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn authority_marks_room_playing_and_starts_once() {
    let (mut client, _events, server) = authority_with_opponent().await;

    assert!(client.is_authority());
    assert!(server.sent().iter().any(|m| matches!(
        m,
        ClientMessage::SetRoomProperties { properties }
            if properties.status == Some(RoomStatus::Playing)
    )));
    match server
        .sent_rpcs()
        .iter()
        .find(|(_, c)| matches!(c, RpcCall::StartVoting { .. }))
    {
        Some((RpcTarget::All, RpcCall::StartVoting { duration, item_a, item_b })) => {
            assert!((duration - 30.0).abs() < f64::EPSILON);
            assert_eq!(item_a, "Pizza");
            assert_eq!(item_b, "Sushi");
        }
        other => panic!("unexpected start {other:?}"),
    }

    // A stray property echo does not start a second round.
    server.push(&ServerMessage::RoomPropertiesChanged {
        properties: duel_poll::protocol::RoomProperties::with_status(RoomStatus::Playing),
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        count_rpcs(&server, |c| matches!(c, RpcCall::StartVoting { .. })),
        1
    );

    client.shutdown().await;
}

#[tokio::test]
async fn authority_announces_the_submitted_vote() {
    let (mut client, mut events, server) = authority_with_opponent().await;

    server.push(&rpc(alice(), RpcTarget::All, start_voting(30.0)));
    wait_for_event(&mut events, |e| matches!(e, PollEvent::TimerTick { .. })).await;

    server.push(&rpc(
        bob(),
        RpcTarget::Authority,
        RpcCall::UpdateSignSelection {
            index: SignIndex::A,
        },
    ));
    server.push(&rpc(
        bob(),
        RpcTarget::Authority,
        RpcCall::SubmitVote {
            item: "Pizza".into(),
        },
    ));
    wait_until(|| {
        server.sent_rpcs().contains(&(
            RpcTarget::All,
            RpcCall::AnnounceResult {
                outcome: "Pizza".into(),
            },
        ))
    })
    .await;
    assert!(server.sent_rpcs().contains(&(
        RpcTarget::All,
        RpcCall::UpdateSignSelection {
            index: SignIndex::A
        }
    )));

    // A late duplicate vote does not produce a second announcement.
    server.push(&rpc(
        bob(),
        RpcTarget::Authority,
        RpcCall::SubmitVote {
            item: "Sushi".into(),
        },
    ));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        count_rpcs(&server, |c| matches!(c, RpcCall::AnnounceResult { .. })),
        1
    );

    client.shutdown().await;
}

#[tokio::test]
async fn provider_refusing_creation_fails_the_attempt() {
    let (mut client, mut events, server) = ready_client(alice(), PollConfig::new("alice")).await;

    client
        .create_session("Pizza", "Sushi")
        .await
        .expect("create_session");
    server.push(&ServerMessage::CreateRoomFailed {
        reason: "provider busy".into(),
        error_code: Some(ErrorCode::RoomCreationFailed),
    });

    let failed = wait_for_event(&mut events, |e| matches!(e, PollEvent::SessionFailed { .. })).await;
    match failed {
        PollEvent::SessionFailed { kind, reason } => {
            assert_eq!(kind, FailureKind::CreateFailed);
            assert!(reason.contains("provider busy"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(client.current_phase(), Phase::MainMenu);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Provider errors and shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn provider_error_becomes_status_line() {
    let (mut client, mut events, server) = ready_client(alice(), PollConfig::new("alice")).await;

    server.push(&error_message("slow down", Some(ErrorCode::InvalidInput)));
    let status = wait_for_event(&mut events, |e| {
        matches!(e, PollEvent::Status { message } if message.contains("slow down"))
    })
    .await;
    assert!(matches!(status, PollEvent::Status { .. }));
    assert!(client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn operations_fail_after_disconnect() {
    let (transport, server) = MockTransport::scripted(vec![
        Some(Ok(common::to_json(&connected_to_master(alice())))),
        None,
    ]);
    let (client, mut events) = PollClient::start(transport, PollConfig::new("alice"));

    let last = wait_for_event(&mut events, |e| matches!(e, PollEvent::Disconnected { .. })).await;
    assert_eq!(last, PollEvent::Disconnected { reason: None });
    assert!(events.recv().await.is_none());

    assert!(matches!(
        client.find_session().await,
        Err(PollError::NotConnected)
    ));
    assert!(!client.is_connected());
    assert!(!server.is_closed());
}

#[tokio::test]
async fn shutdown_closes_transport() {
    let (mut client, mut events, server) = ready_client(alice(), PollConfig::new("alice")).await;

    client.shutdown().await;
    assert!(server.is_closed());
    let last = wait_for_event(&mut events, |e| matches!(e, PollEvent::Disconnected { .. })).await;
    assert_eq!(
        last,
        PollEvent::Disconnected {
            reason: Some("client shut down".into())
        }
    );
}

#[tokio::test]
async fn malformed_json_does_not_crash_and_next_message_arrives() {
    let (transport, server) = MockTransport::scripted(vec![
        Some(Ok("{not json".into())),
        Some(Ok(r#"{"type":"NoSuchMessage"}"#.into())),
    ]);
    let (mut client, _events) = PollClient::start(transport, PollConfig::new("alice"));

    server.push(&connected_to_master(alice()));
    server.push(&ServerMessage::JoinedLobby);
    wait_until(|| client.is_ready()).await;

    client.shutdown().await;
}
