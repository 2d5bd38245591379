//! End-to-end signaling flow against in-memory storage.
//!
//! Drives the hub the way the WebSocket layer does: fake endpoints with
//! outbound queues, real repository, registry, limiters and guard.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use ferry_core::code::is_well_formed;
use ferry_core::Config;
use ferry_signal::audit::AuditLevel;
use ferry_signal::messages::{ClientEvent, ServerEvent};
use ferry_signal::rooms::PeerHandle;
use ferry_signal::storage::{current_timestamp, ShareStatus};
use ferry_signal::{ServerState, SHARE_MAX_AGE_SECS};

fn state() -> Arc<ServerState> {
    let config = Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some(":memory:".to_string()),
        "METADATA_ENCRYPTION_KEY" => Some("c".repeat(64)),
        _ => None,
    })
    .unwrap();
    ServerState::from_config(&config).unwrap()
}

fn connect(state: &ServerState, peer: &str, last_octet: u8) -> UnboundedReceiver<ServerEvent> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    state.peers.connect(
        peer,
        PeerHandle {
            tx,
            ip: IpAddr::V4(Ipv4Addr::new(198, 51, 100, last_octet)),
        },
    );
    rx
}

fn upload_init(name: &str, size: u64, mime: &str) -> ClientEvent {
    ClientEvent::UploadInit {
        file_name: name.to_string(),
        file_size: size,
        file_type: mime.to_string(),
        file_hash: None,
    }
}

/// Run an upload-init for `peer` and return the share id and code
async fn create_share(
    state: &ServerState,
    peer: &str,
    rx: &mut UnboundedReceiver<ServerEvent>,
) -> (String, String) {
    state
        .hub
        .handle_event(peer, upload_init("photo.jpg", 10_240, "image/jpeg"))
        .await;
    match rx.try_recv().expect("no upload-created reply") {
        ServerEvent::UploadCreated {
            file_id,
            one_time_code,
            ..
        } => (file_id, one_time_code),
        other => panic!("expected upload-created, got {:?}", other),
    }
}

#[tokio::test]
async fn happy_path_end_to_end() {
    let state = state();
    let mut rx1 = connect(&state, "e1", 1);
    let mut rx2 = connect(&state, "e2", 2);

    // Sender announces a file
    let (file_id, code) = create_share(&state, "e1", &mut rx1).await;
    assert_eq!(file_id.len(), 36);
    assert_eq!(code.len(), 6);
    assert!(is_well_formed(&code));

    // Repository holds a WAITING row with sealed metadata only
    let row = state.store.find(&file_id).unwrap().unwrap();
    assert_eq!(row.status, ShareStatus::Waiting);
    assert!(!row.file_name.contains("photo"));
    assert!(!row.file_name.contains("jpg"));
    assert!(!row.file_type.contains("image"));
    assert_eq!(row.file_name.split(':').count(), 3);
    let code_hash = row.code_hash.as_deref().unwrap();
    assert_eq!(code_hash.len(), 64); // SHA-256 hex, not the code itself
    assert_ne!(code_hash, code);

    // Receiver joins with the code
    state
        .hub
        .handle_event(
            "e2",
            ClientEvent::JoinRoom {
                file_id: file_id.clone(),
                code: code.clone(),
            },
        )
        .await;

    match rx2.try_recv().unwrap() {
        ServerEvent::FileMeta {
            file_name,
            file_size,
            file_type,
            is_dangerous,
            ..
        } => {
            assert_eq!(file_name, "photo.jpg");
            assert_eq!(file_size, "10240");
            assert_eq!(file_type, "image/jpeg");
            assert!(is_dangerous.is_none());
        }
        other => panic!("expected file-meta, got {:?}", other),
    }
    match rx1.try_recv().unwrap() {
        ServerEvent::ReceiverJoined { receiver_id } => assert_eq!(receiver_id, "e2"),
        other => panic!("expected receiver-joined, got {:?}", other),
    }
    assert_eq!(
        state.store.find(&file_id).unwrap().unwrap().status,
        ShareStatus::Active
    );

    // Negotiation payload flows verbatim, sender to receiver
    let payload = serde_json::json!({"type": "offer", "sdp": "X"});
    state
        .hub
        .handle_event(
            "e1",
            ClientEvent::Signal {
                target: "e2".to_string(),
                data: payload.clone(),
                file_id: file_id.clone(),
            },
        )
        .await;
    match rx2.try_recv().unwrap() {
        ServerEvent::Signal { from, data } => {
            assert_eq!(from, "e1");
            assert_eq!(data, payload);
        }
        other => panic!("expected signal, got {:?}", other),
    }

    // Completion deletes the share outright
    state
        .hub
        .handle_event(
            "e2",
            ClientEvent::TransferComplete {
                file_id: file_id.clone(),
            },
        )
        .await;
    assert!(state.store.find(&file_id).unwrap().is_none());
    assert!(state.registry.sender(&file_id).is_none());
}

#[tokio::test]
async fn wrong_code_leaves_share_joinable() {
    let state = state();
    let mut rx1 = connect(&state, "e1", 1);
    let mut rx2 = connect(&state, "e2", 2);

    let (file_id, code) = create_share(&state, "e1", &mut rx1).await;

    state
        .hub
        .handle_event(
            "e2",
            ClientEvent::JoinRoom {
                file_id: file_id.clone(),
                code: "WRONG2".to_string(),
            },
        )
        .await;

    match rx2.try_recv().unwrap() {
        ServerEvent::Error {
            message,
            invalid_code,
        } => {
            assert_eq!(message, "Invalid code");
            assert_eq!(invalid_code, Some(true));
        }
        other => panic!("expected error, got {:?}", other),
    }

    // Status unchanged, code unspent: the retry succeeds
    assert_eq!(
        state.store.find(&file_id).unwrap().unwrap().status,
        ShareStatus::Waiting
    );
    state
        .hub
        .handle_event(
            "e2",
            ClientEvent::JoinRoom {
                file_id: file_id.clone(),
                code,
            },
        )
        .await;
    assert!(matches!(
        rx2.try_recv().unwrap(),
        ServerEvent::FileMeta { .. }
    ));
}

#[tokio::test]
async fn code_replay_is_refused() {
    let state = state();
    let mut rx1 = connect(&state, "e1", 1);
    let mut rx2 = connect(&state, "e2", 2);
    let mut rx3 = connect(&state, "e3", 3);

    let (file_id, code) = create_share(&state, "e1", &mut rx1).await;

    state
        .hub
        .handle_event(
            "e2",
            ClientEvent::JoinRoom {
                file_id: file_id.clone(),
                code: code.clone(),
            },
        )
        .await;
    assert!(matches!(
        rx2.try_recv().unwrap(),
        ServerEvent::FileMeta { .. }
    ));

    // Third endpoint replays the spent code
    state
        .hub
        .handle_event(
            "e3",
            ClientEvent::JoinRoom {
                file_id: file_id.clone(),
                code: code.clone(),
            },
        )
        .await;
    match rx3.try_recv().unwrap() {
        ServerEvent::Error {
            message,
            invalid_code,
        } => {
            assert_eq!(message, "Code already used");
            assert_eq!(invalid_code, Some(true));
        }
        other => panic!("expected error, got {:?}", other),
    }

    // And never made it into the room: its signals go nowhere
    state
        .hub
        .handle_event(
            "e3",
            ClientEvent::Signal {
                target: "e1".to_string(),
                data: serde_json::json!({}),
                file_id: file_id.clone(),
            },
        )
        .await;
    assert!(rx1.try_recv().is_err());
}

#[tokio::test]
async fn off_room_signal_is_silent_but_audited() {
    let state = state();
    let mut rx1 = connect(&state, "e1", 1);
    let mut rx3 = connect(&state, "e3", 3);
    let intruder_ip = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 3));

    let (file_id, _code) = create_share(&state, "e1", &mut rx1).await;

    state
        .hub
        .handle_event(
            "e3",
            ClientEvent::Signal {
                target: "e1".to_string(),
                data: serde_json::json!({"candidate": "x"}),
                file_id: file_id.clone(),
            },
        )
        .await;

    // Nobody hears anything, including the intruder
    assert!(rx1.try_recv().is_err());
    assert!(rx3.try_recv().is_err());

    // But the attempt is recorded and counted
    let security = state.audit.last_by_level(10, AuditLevel::Security);
    assert_eq!(security.len(), 1);
    assert_eq!(security[0].event, "signal-drop");
    assert_eq!(state.guard.suspicion_of(intruder_ip), 1);
}

#[tokio::test]
async fn dangerous_extension_is_flagged_end_to_end() {
    let state = state();
    let mut rx1 = connect(&state, "e1", 1);
    let mut rx2 = connect(&state, "e2", 2);

    state
        .hub
        .handle_event(
            "e1",
            upload_init("setup.exe", 1024, "application/octet-stream"),
        )
        .await;

    let (file_id, code) = match rx1.try_recv().unwrap() {
        ServerEvent::UploadCreated {
            file_id,
            one_time_code,
            warnings,
        } => {
            let warnings = warnings.expect("missing danger warnings");
            assert!(warnings.iter().any(|w| w.contains(".exe")));
            (file_id, one_time_code)
        }
        other => panic!("expected upload-created, got {:?}", other),
    };

    state
        .hub
        .handle_event("e2", ClientEvent::JoinRoom { file_id, code })
        .await;
    match rx2.try_recv().unwrap() {
        ServerEvent::FileMeta {
            is_dangerous,
            warnings,
            ..
        } => {
            assert_eq!(is_dangerous, Some(true));
            assert!(warnings.unwrap().iter().any(|w| w.contains(".exe")));
        }
        other => panic!("expected file-meta, got {:?}", other),
    }
}

#[tokio::test]
async fn upload_rate_limit_is_enforced() {
    let state = state();
    let mut rx1 = connect(&state, "e1", 1);

    // Five uploads within the window pass
    for _ in 0..5 {
        state
            .hub
            .handle_event("e1", upload_init("a.txt", 10, "text/plain"))
            .await;
        assert!(matches!(
            rx1.try_recv().unwrap(),
            ServerEvent::UploadCreated { .. }
        ));
    }

    // The sixth is refused with a wait hint
    state
        .hub
        .handle_event("e1", upload_init("a.txt", 10, "text/plain"))
        .await;
    match rx1.try_recv().unwrap() {
        ServerEvent::Error { message, .. } => {
            assert!(message.contains("retry in"));
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn expired_share_is_swept_and_unjoinable() {
    let state = state();
    let mut rx1 = connect(&state, "e1", 1);
    let mut rx2 = connect(&state, "e2", 2);

    let (file_id, code) = create_share(&state, "e1", &mut rx1).await;
    state
        .store
        .backdate(&file_id, current_timestamp() - (SHARE_MAX_AGE_SECS as i64 + 1))
        .unwrap();

    state
        .store
        .delete_older_than(
            current_timestamp() - SHARE_MAX_AGE_SECS as i64,
            &[ShareStatus::Waiting, ShareStatus::Completed],
        )
        .unwrap();

    state
        .hub
        .handle_event("e2", ClientEvent::JoinRoom { file_id, code })
        .await;
    match rx2.try_recv().unwrap() {
        ServerEvent::Error { message, .. } => {
            assert!(message.contains("not found") || message.contains("expired"));
        }
        other => panic!("expected error, got {:?}", other),
    }
}

#[tokio::test]
async fn sender_disconnect_resets_active_share() {
    let state = state();
    let mut rx1 = connect(&state, "e1", 1);
    let mut rx2 = connect(&state, "e2", 2);

    let (file_id, code) = create_share(&state, "e1", &mut rx1).await;
    state
        .hub
        .handle_event(
            "e2",
            ClientEvent::JoinRoom {
                file_id: file_id.clone(),
                code,
            },
        )
        .await;
    let _ = rx2.try_recv();

    // Sender's connection dies mid-transfer
    let sender_ip = IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1));
    state.hub.handle_disconnect("e1", sender_ip).await;

    // Receiver hears about it and the row falls back to WAITING
    assert!(matches!(
        rx2.try_recv().unwrap(),
        ServerEvent::PeerDisconnected { .. }
    ));
    assert_eq!(
        state.store.find(&file_id).unwrap().unwrap().status,
        ShareStatus::Waiting
    );
}
