#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire format tests for the session protocol.
//!
//! Verifies the exact JSON shapes exchanged with a session provider: message
//! envelopes, room property keys, RPC encoding, sign indices, and
//! `ErrorCode` SCREAMING_SNAKE_CASE strings.

use duel_poll::error_codes::ErrorCode;
use duel_poll::protocol::{
    ClientMessage, PollItems, RoomOptions, RoomProperties, RoomStatus, RpcCall, RpcTarget,
    ServerMessage, SignIndex,
};
use serde_json::{json, Value};

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

fn to_value<T: serde::Serialize>(val: &T) -> Value {
    serde_json::to_value(val).expect("serialize")
}

fn test_uuid(n: u128) -> uuid::Uuid {
    uuid::Uuid::from_u128(n)
}

fn pizza_sushi() -> PollItems {
    PollItems::new("Pizza", "Sushi").expect("valid items")
}

// ════════════════════════════════════════════════════════════════════
// ClientMessage shapes
// ════════════════════════════════════════════════════════════════════

#[test]
fn connect_uses_type_and_data_envelope() {
    let msg = ClientMessage::Connect {
        player_name: "alice".into(),
        sdk_version: None,
    };
    assert_eq!(
        to_value(&msg),
        json!({ "type": "Connect", "data": { "player_name": "alice" } })
    );
}

#[test]
fn unit_messages_have_no_data() {
    assert_eq!(to_value(&ClientMessage::JoinLobby), json!({ "type": "JoinLobby" }));
    assert_eq!(to_value(&ClientMessage::LeaveRoom), json!({ "type": "LeaveRoom" }));
}

#[test]
fn create_room_carries_poll_properties_and_lobby_keys() {
    let msg = ClientMessage::CreateRoom {
        room_name: None,
        options: RoomOptions::for_poll(&pizza_sushi()),
    };
    assert_eq!(
        to_value(&msg),
        json!({
            "type": "CreateRoom",
            "data": {
                "room_name": null,
                "options": {
                    "max_players": 2,
                    "is_open": true,
                    "is_visible": true,
                    "properties": { "itemA": "Pizza", "itemB": "Sushi", "status": "waiting" },
                    "lobby_properties": ["itemA", "itemB", "status"]
                }
            }
        })
    );
}

#[test]
fn random_join_filters_on_waiting_status_only() {
    let msg = ClientMessage::JoinRandomRoom {
        expected_properties: RoomProperties::with_status(RoomStatus::Waiting),
        max_players: 2,
    };
    assert_eq!(
        to_value(&msg),
        json!({
            "type": "JoinRandomRoom",
            "data": { "expected_properties": { "status": "waiting" }, "max_players": 2 }
        })
    );
}

#[test]
fn rpc_encodes_method_and_args() {
    let msg = ClientMessage::Rpc {
        target: RpcTarget::Authority,
        call: RpcCall::SubmitVote {
            item: "Sushi".into(),
        },
    };
    assert_eq!(
        to_value(&msg),
        json!({
            "type": "Rpc",
            "data": {
                "target": "authority",
                "call": { "method": "SubmitVote", "args": { "item": "Sushi" } }
            }
        })
    );
}

#[test]
fn start_voting_duration_is_fractional_seconds() {
    let call = RpcCall::StartVoting {
        duration: 30.0,
        item_a: "Pizza".into(),
        item_b: "Sushi".into(),
    };
    assert_eq!(
        to_value(&call),
        json!({
            "method": "StartVoting",
            "args": { "duration": 30.0, "item_a": "Pizza", "item_b": "Sushi" }
        })
    );
    let parsed: RpcCall =
        serde_json::from_str(r#"{"method":"StartVoting","args":{"duration":2.5,"item_a":"x","item_b":"y"}}"#)
            .unwrap();
    assert!(matches!(parsed, RpcCall::StartVoting { duration, .. } if (duration - 2.5).abs() < f64::EPSILON));
}

#[test]
fn opponent_left_has_no_args() {
    assert_eq!(
        to_value(&RpcCall::OpponentLeft),
        json!({ "method": "OpponentLeft" })
    );
}

// ════════════════════════════════════════════════════════════════════
// Sign index
// ════════════════════════════════════════════════════════════════════

#[test]
fn sign_index_is_zero_or_one() {
    let call = RpcCall::UpdateSignSelection {
        index: SignIndex::B,
    };
    assert_eq!(
        to_value(&call),
        json!({ "method": "UpdateSignSelection", "args": { "index": 1 } })
    );
    let a: SignIndex = serde_json::from_str("0").unwrap();
    assert_eq!(a, SignIndex::A);
}

#[test]
fn sign_index_out_of_range_is_rejected() {
    let err = serde_json::from_str::<SignIndex>("2").unwrap_err();
    assert!(err.to_string().contains("0 or 1"));
}

// ════════════════════════════════════════════════════════════════════
// ServerMessage fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn room_joined_fixture_parses() {
    let raw = json!({
        "type": "RoomJoined",
        "data": {
            "room_id": test_uuid(7),
            "room_name": "poll-7",
            "player_id": test_uuid(2),
            "max_players": 2,
            "properties": { "itemA": "Pizza", "itemB": "Sushi", "status": "waiting" },
            "members": [
                { "id": test_uuid(1), "name": "alice", "actor_number": 1 },
                { "id": test_uuid(2), "name": "bob", "actor_number": 2 }
            ]
        }
    });
    let msg: ServerMessage = serde_json::from_value(raw).unwrap();
    let ServerMessage::RoomJoined(payload) = msg else {
        panic!("expected RoomJoined");
    };
    assert_eq!(payload.room_name, "poll-7");
    assert_eq!(payload.members.len(), 2);
    assert_eq!(payload.properties.poll_items(), Some(pizza_sushi()));
    assert_eq!(payload.properties.status, Some(RoomStatus::Waiting));
}

#[test]
fn rpc_fixture_parses_with_sender_and_room() {
    let raw = json!({
        "type": "Rpc",
        "data": {
            "room_id": test_uuid(7),
            "from": test_uuid(1),
            "target": "all",
            "call": { "method": "AnnounceResult", "args": { "outcome": "no selection" } }
        }
    });
    let msg: ServerMessage = serde_json::from_value(raw).unwrap();
    match msg {
        ServerMessage::Rpc {
            room_id,
            from,
            target,
            call,
        } => {
            assert_eq!(room_id, test_uuid(7));
            assert_eq!(from, test_uuid(1));
            assert_eq!(target, RpcTarget::All);
            assert_eq!(
                call,
                RpcCall::AnnounceResult {
                    outcome: "no selection".into()
                }
            );
        }
        other => panic!("expected Rpc, got {other:?}"),
    }
}

#[test]
fn failure_fixtures_carry_error_codes() {
    let msg: ServerMessage = serde_json::from_str(
        r#"{"type":"JoinRandomFailed","data":{"reason":"empty","error_code":"NO_MATCH_FOUND"}}"#,
    )
    .unwrap();
    assert!(matches!(
        msg,
        ServerMessage::JoinRandomFailed {
            error_code: Some(ErrorCode::NoMatchFound),
            ..
        }
    ));

    let msg: ServerMessage =
        serde_json::from_str(r#"{"type":"CreateRoomFailed","data":{"reason":"busy"}}"#).unwrap();
    assert!(matches!(
        msg,
        ServerMessage::CreateRoomFailed {
            error_code: None,
            ..
        }
    ));
}

#[test]
fn partial_property_update_parses() {
    let msg: ServerMessage = serde_json::from_str(
        r#"{"type":"RoomPropertiesChanged","data":{"properties":{"status":"playing"}}}"#,
    )
    .unwrap();
    let ServerMessage::RoomPropertiesChanged { properties } = msg else {
        panic!("expected RoomPropertiesChanged");
    };
    assert_eq!(properties, RoomProperties::with_status(RoomStatus::Playing));
    assert!(properties.poll_items().is_none());
}

#[test]
fn unknown_message_type_is_rejected() {
    assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"Teleport","data":{}}"#).is_err());
    assert!(serde_json::from_str::<ServerMessage>("[]").is_err());
}

#[test]
fn unknown_rpc_method_is_rejected() {
    let raw = json!({
        "type": "Rpc",
        "data": {
            "room_id": test_uuid(7),
            "from": test_uuid(1),
            "target": "all",
            "call": { "method": "Shuffle", "args": {} }
        }
    });
    assert!(serde_json::from_value::<ServerMessage>(raw).is_err());
}

// ════════════════════════════════════════════════════════════════════
// ErrorCode
// ════════════════════════════════════════════════════════════════════

#[test]
fn error_codes_use_screaming_snake_case() {
    let cases = [
        (ErrorCode::NotConnected, "NOT_CONNECTED"),
        (ErrorCode::InvalidPlayerName, "INVALID_PLAYER_NAME"),
        (ErrorCode::AlreadyInRoom, "ALREADY_IN_ROOM"),
        (ErrorCode::NoMatchFound, "NO_MATCH_FOUND"),
        (ErrorCode::RoomCreationFailed, "ROOM_CREATION_FAILED"),
        (ErrorCode::InvalidRpcTarget, "INVALID_RPC_TARGET"),
    ];
    for (code, wire) in cases {
        assert_eq!(to_value(&code), Value::String(wire.into()));
        let back: ErrorCode = serde_json::from_value(Value::String(wire.into())).unwrap();
        assert_eq!(back, code);
    }
}

#[test]
fn every_error_code_has_a_description() {
    for code in [
        ErrorCode::RoomFull,
        ErrorCode::RoomClosed,
        ErrorCode::NotInRoom,
        ErrorCode::InternalError,
    ] {
        assert!(!code.description().is_empty());
    }
}
