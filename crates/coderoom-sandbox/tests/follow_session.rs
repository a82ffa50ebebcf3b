//! Follower against a scripted WebSocket peer.

use std::sync::Arc;
use std::time::Duration;

use coderoom_core::wire::{Handshake, JoinFailure, JoinedPayload, ServerEvent, TreeUpdatePayload};
use coderoom_core::{ChatMessage, CommandSpec, FlatTree, PatchEnvelope, ProjectId, Sender};
use coderoom_sandbox::{follow, LocalSandbox, Sandbox, SandboxError, SandboxFs};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Accept one connection, check the handshake, then play `events` and close.
async fn scripted_peer(events: Vec<ServerEvent>) -> (String, tokio::task::JoinHandle<Handshake>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let hello = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => text,
            other => panic!("unexpected first frame: {other:?}"),
        };
        let handshake: Handshake = serde_json::from_str(&hello).unwrap();

        for event in events {
            ws.send(Message::Text(event.to_json().unwrap())).await.unwrap();
        }
        ws.close(None).await.unwrap();
        handshake
    });

    (format!("ws://{addr}/ws"), handle)
}

#[tokio::test]
async fn test_follow_mounts_and_applies_updates() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(LocalSandbox::new(dir.path()).unwrap());
    let sandbox = Sandbox::new(fs.clone());
    let project_id = ProjectId::new();

    let mut initial = FlatTree::new();
    initial.insert_dir("src");
    initial.insert_file("src/index.js", "console.log(1)");
    let mut patch = FlatTree::new();
    patch.insert_file("src/util/math.js", "export const one = 1;");

    let (url, peer) = scripted_peer(vec![
        ServerEvent::Joined(JoinedPayload {
            project_id,
            connection_id: "conn-1".to_string(),
            members: vec![],
            file_tree: initial,
        }),
        ServerEvent::FileTreeUpdated(TreeUpdatePayload {
            project_id,
            patch,
            origin: Sender::ai(),
        }),
    ])
    .await;

    let handshake = Handshake::new("secret", project_id.to_string());
    let stats = follow(&sandbox, &url, &handshake, false).await.unwrap();

    assert!(stats.joined);
    assert_eq!(stats.deltas, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(fs.read_file("src/index.js").await.unwrap(), "console.log(1)");
    assert_eq!(
        fs.read_file("src/util/math.js").await.unwrap(),
        "export const one = 1;"
    );

    let seen = peer.await.unwrap();
    assert_eq!(seen, handshake);
}

#[tokio::test]
async fn test_follow_reports_join_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(Arc::new(LocalSandbox::new(dir.path()).unwrap()));

    let (url, _peer) = scripted_peer(vec![ServerEvent::JoinError {
        reason: JoinFailure::NoToken,
    }])
    .await;

    let err = follow(&sandbox, &url, &Handshake::default(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::JoinRejected(JoinFailure::NoToken)));
}

#[tokio::test]
async fn test_follow_closed_before_join() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(Arc::new(LocalSandbox::new(dir.path()).unwrap()));

    let (url, _peer) = scripted_peer(vec![]).await;

    let err = follow(&sandbox, &url, &Handshake::new("t", ProjectId::new().to_string()), false)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Protocol(_)));
}

#[tokio::test]
async fn test_follow_unreachable_server() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = Sandbox::new(Arc::new(LocalSandbox::new(dir.path()).unwrap()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = follow(&sandbox, &format!("ws://{addr}/ws"), &Handshake::default(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Connection(_)));
}

#[cfg(unix)]
#[tokio::test]
async fn test_follow_keeps_reading_during_build() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(LocalSandbox::new(dir.path()).unwrap());
    let sandbox = Sandbox::new(fs.clone());
    let project_id = ProjectId::new();

    let sleep = |secs: &str| CommandSpec {
        main_item: "sleep".to_string(),
        commands: vec![secs.to_string()],
    };
    let reply = PatchEnvelope::Structured {
        text: "installing".to_string(),
        file_tree: FlatTree::new(),
        build_command: Some(sleep("3")),
        start_command: Some(sleep("30")),
    };
    let mut patch = FlatTree::new();
    patch.insert_file("late.txt", "fresh");

    let (url, _peer) = scripted_peer(vec![
        ServerEvent::Joined(JoinedPayload {
            project_id,
            connection_id: "conn-1".to_string(),
            members: vec![],
            file_tree: FlatTree::new(),
        }),
        ServerEvent::ProjectMessage(ChatMessage::new(
            project_id,
            Sender::ai(),
            reply.to_message_body(),
        )),
        ServerEvent::FileTreeUpdated(TreeUpdatePayload {
            project_id,
            patch,
            origin: Sender::ai(),
        }),
    ])
    .await;

    let handshake = Handshake::new("secret", project_id.to_string());
    let watcher = async {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !fs.exists("late.txt").await.unwrap() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
    };
    let (stats, seen_early) = tokio::join!(follow(&sandbox, &url, &handshake, true), watcher);

    assert!(seen_early.is_ok(), "update waited for the build");
    let stats = stats.unwrap();
    assert_eq!(stats.deltas, 1);
    assert_eq!(stats.run_requests, 1);
    assert_eq!(stats.runs, 1);
}
