//! What happens to frames a joined client sends.

use coderoom_core::wire::{ClientEvent, ServerEvent, TreeUpdatePayload};
use coderoom_core::{
    interpret, AiCollaborator, ChatMessage, FlatTree, Identity, PatchEnvelope, ProjectId,
    ProjectStore, Sender,
};
use tracing::{debug, info, instrument, warn};

use crate::rooms::ConnectionId;
use crate::state::AppState;

/// Reply sent to the requester when the assistant is rate limited or out of quota.
pub const BUSY_REPLY: &str =
    "The assistant is busy right now. Please try again in a moment.";

/// Reply sent to the requester for any other generation failure.
pub const FAILED_REPLY: &str = "Sorry, the assistant could not answer that request.";

/// A joined connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub project_id: ProjectId,
    pub identity: Identity,
}

/// Handle one text frame from a joined client.
pub async fn handle_frame(state: &AppState, session: &Session, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(connection_id = %session.connection_id, error = %e, "unreadable client frame");
            state.rooms().send_to(
                session.connection_id,
                &ServerEvent::error(format!("Unreadable event: {e}")),
            );
            return;
        }
    };

    match event {
        ClientEvent::ProjectMessage { message } => on_message(state, session, message).await,
        ClientEvent::FileTreePatch { file_tree } => on_tree_patch(state, session, file_tree).await,
    }
}

/// The prompt addressed to the assistant, if `body` mentions it.
pub fn extract_prompt(body: &str, mention: &str) -> Option<String> {
    if mention.is_empty() || !body.contains(mention) {
        return None;
    }
    let prompt = body.replace(mention, "");
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return None;
    }
    Some(prompt.to_string())
}

/// Chat message from the assistant to one connection only. Not persisted.
fn notify(state: &AppState, connection_id: ConnectionId, project_id: ProjectId, text: &str) {
    let body = PatchEnvelope::plain(text).to_message_body();
    let message = ChatMessage::new(project_id, Sender::ai(), body);
    state
        .rooms()
        .send_to(connection_id, &ServerEvent::ProjectMessage(message));
}

#[instrument(skip_all, fields(project_id = %session.project_id, connection_id = %session.connection_id))]
async fn on_message(state: &AppState, session: &Session, body: String) {
    let message = ChatMessage::new(session.project_id, Sender::from(&session.identity), body);

    if let Err(e) = state.store().append_message(&message).await {
        warn!(error = %e, "failed to persist chat message");
        notify(
            state,
            session.connection_id,
            session.project_id,
            &format!("Failed to save your message. ({e})"),
        );
    }

    state
        .rooms()
        .publish(session.project_id, &ServerEvent::ProjectMessage(message.clone()));

    if let Some(prompt) = extract_prompt(&message.body, &state.settings().mention) {
        let state = state.clone();
        let project_id = session.project_id;
        let requester = session.connection_id;
        tokio::spawn(async move {
            run_assistant(&state, project_id, requester, &prompt).await;
        });
    }
}

#[instrument(skip_all, fields(project_id = %session.project_id, connection_id = %session.connection_id))]
async fn on_tree_patch(state: &AppState, session: &Session, patch: FlatTree) {
    match state.sync().apply_patch(session.project_id, &patch).await {
        Ok(outcome) => {
            if outcome.stats.is_noop() {
                debug!("tree patch changed nothing");
                return;
            }
            state.rooms().publish(
                session.project_id,
                &ServerEvent::FileTreeUpdated(TreeUpdatePayload {
                    project_id: session.project_id,
                    patch: outcome.applied,
                    origin: Sender::from(&session.identity),
                }),
            );
        }
        Err(e) => {
            warn!(error = %e, "failed to save tree patch");
            state.rooms().send_to(
                session.connection_id,
                &ServerEvent::error(format!("Failed to save file tree: {e}")),
            );
        }
    }
}

/// Ask the assistant, apply any tree it returns and post its reply.
///
/// Runs detached from the requesting connection: the reply is persisted and
/// the patch applied even if nobody is left in the room.
#[instrument(skip(state, prompt), fields(provider = state.ai().name()))]
pub async fn run_assistant(
    state: &AppState,
    project_id: ProjectId,
    requester: ConnectionId,
    prompt: &str,
) {
    let raw = match state.ai().generate(prompt).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, transient = e.is_transient(), "assistant request failed");
            let text = if e.is_transient() { BUSY_REPLY } else { FAILED_REPLY };
            notify(state, requester, project_id, text);
            return;
        }
    };

    let envelope = interpret(&raw);
    if let Some(patch) = envelope.file_tree().filter(|tree| !tree.is_empty()) {
        match state.sync().apply_patch(project_id, patch).await {
            Ok(outcome) => {
                info!(
                    entries = outcome.applied.len(),
                    dropped = outcome.dropped,
                    "assistant patch applied"
                );
                if !outcome.stats.is_noop() {
                    state.rooms().publish(
                        project_id,
                        &ServerEvent::FileTreeUpdated(TreeUpdatePayload {
                            project_id,
                            patch: outcome.applied,
                            origin: Sender::ai(),
                        }),
                    );
                }
            }
            Err(e) => warn!(error = %e, "failed to apply assistant patch"),
        }
    }

    let message = ChatMessage::new(project_id, Sender::ai(), envelope.to_message_body());
    if let Err(e) = state.store().append_message(&message).await {
        warn!(error = %e, "failed to persist assistant reply");
    }
    state
        .rooms()
        .publish(project_id, &ServerEvent::ProjectMessage(message));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::Settings;
    use coderoom_core::ai::ScriptedCollaborator;
    use coderoom_core::store::MemoryStore;
    use coderoom_core::{GenerationError, StaticTokenVerifier, UserId};
    use tokio::sync::mpsc;

    use crate::rooms::Frame;

    async fn setup(ai: ScriptedCollaborator) -> (AppState, ProjectId) {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project("demo", &UserId::new("alice"))
            .await
            .unwrap();
        let state = AppState::new(
            store,
            Arc::new(StaticTokenVerifier::new()),
            Arc::new(ai),
            Settings::default(),
        );
        (state, project.id)
    }

    fn join(state: &AppState, project_id: ProjectId, name: &str) -> (Session, mpsc::Receiver<Frame>) {
        let (tx, mut rx) = mpsc::channel(64);
        let identity = Identity::new(name, name);
        let connection_id = state
            .rooms()
            .join(project_id, identity.clone(), tx, FlatTree::new());
        while rx.try_recv().is_ok() {}
        (
            Session {
                connection_id,
                project_id,
                identity,
            },
            rx,
        )
    }

    /// `text` of an assistant body, which must be a JSON envelope.
    fn envelope_text(body: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        value["text"].as_str().unwrap().to_string()
    }

    fn events(rx: &mut mpsc::Receiver<Frame>) -> Vec<ServerEvent> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| serde_json::from_str(&frame).unwrap())
            .collect()
    }

    #[test]
    fn test_extract_prompt() {
        assert_eq!(
            extract_prompt("@ai build a todo app", "@ai").as_deref(),
            Some("build a todo app")
        );
        assert_eq!(
            extract_prompt("hey @ai, fix it", "@ai").as_deref(),
            Some(", fix it")
        );
        assert_eq!(extract_prompt("no mention here", "@ai"), None);
        assert_eq!(extract_prompt("@ai   ", "@ai"), None);
    }

    #[tokio::test]
    async fn test_message_is_persisted_and_broadcast() {
        let (state, project_id) = setup(ScriptedCollaborator::echo()).await;
        let (alice, mut alice_rx) = join(&state, project_id, "alice");
        let (_bob, mut bob_rx) = join(&state, project_id, "bob");
        events(&mut alice_rx);

        handle_frame(&state, &alice, r#"{"event":"project-message","payload":{"message":"hi"}}"#)
            .await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            let got = events(rx);
            assert!(got.iter().any(|e| matches!(
                e,
                ServerEvent::ProjectMessage(m) if m.body == "hi" && m.sender.id == "alice"
            )));
        }
        let history = state.store().list_messages(project_id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_frame_gets_error() {
        let (state, project_id) = setup(ScriptedCollaborator::echo()).await;
        let (alice, mut rx) = join(&state, project_id, "alice");

        handle_frame(&state, &alice, "not json").await;
        assert!(matches!(events(&mut rx).as_slice(), [ServerEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_tree_patch_is_merged_and_broadcast() {
        let (state, project_id) = setup(ScriptedCollaborator::echo()).await;
        let (alice, mut rx) = join(&state, project_id, "alice");

        let frame = r#"{"event":"file-tree-patch","payload":{"fileTree":{"src/main.rs":{"file":{"contents":"fn main() {}"}}}}}"#;
        handle_frame(&state, &alice, frame).await;

        let tree = state.sync().snapshot(project_id).await.unwrap();
        assert!(tree.get("src").unwrap().is_dir());
        match events(&mut rx).as_slice() {
            [ServerEvent::FileTreeUpdated(update)] => {
                assert_eq!(update.origin.id, "alice");
                assert!(update.patch.contains_key("src/main.rs"));
            }
            other => panic!("unexpected events: {other:?}"),
        }

        // Same patch again is a no-op and is not rebroadcast.
        handle_frame(&state, &alice, frame).await;
        assert!(events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_assistant_patch_flow() {
        let reply = r#"{"text":"Added a server","fileTree":{"server.js":{"file":{"contents":"listen()"}}}}"#;
        let (state, project_id) = setup(ScriptedCollaborator::echo().reply(reply)).await;
        let (alice, mut rx) = join(&state, project_id, "alice");

        run_assistant(&state, project_id, alice.connection_id, "make a server").await;

        let tree = state.sync().snapshot(project_id).await.unwrap();
        assert_eq!(tree.get("server.js").and_then(|n| n.contents()), Some("listen()"));

        let got = events(&mut rx);
        assert!(matches!(&got[0], ServerEvent::FileTreeUpdated(u) if u.origin.is_ai()));
        match &got[1] {
            ServerEvent::ProjectMessage(m) => {
                assert!(m.sender.is_ai());
                assert_eq!(interpret(&m.body).text(), "Added a server");
            }
            other => panic!("expected message, got {other:?}"),
        }
        let history = state.store().list_messages(project_id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_assistant_failure_only_reaches_requester() {
        let ai = ScriptedCollaborator::echo().fail(GenerationError::RateLimited("slow down".to_string()));
        let (state, project_id) = setup(ai).await;
        let (alice, mut alice_rx) = join(&state, project_id, "alice");
        let (_bob, mut bob_rx) = join(&state, project_id, "bob");
        events(&mut alice_rx);

        run_assistant(&state, project_id, alice.connection_id, "anything").await;

        match events(&mut alice_rx).as_slice() {
            [ServerEvent::ProjectMessage(m)] => {
                assert!(m.sender.is_ai());
                assert_eq!(envelope_text(&m.body), BUSY_REPLY);
                assert_eq!(interpret(&m.body), PatchEnvelope::plain(BUSY_REPLY));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert!(events(&mut bob_rx).is_empty());
        assert!(state.store().list_messages(project_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_assistant_result_kept_when_room_is_empty() {
        let reply = r#"{"text":"done","fileTree":{"a.txt":{"file":{"contents":"1"}}}}"#;
        let (state, project_id) = setup(ScriptedCollaborator::echo().reply(reply)).await;
        let (alice, _rx) = join(&state, project_id, "alice");
        state.rooms().leave(alice.connection_id);

        run_assistant(&state, project_id, alice.connection_id, "go").await;

        let tree = state.sync().snapshot(project_id).await.unwrap();
        assert!(tree.contains_key("a.txt"));
        assert_eq!(state.store().list_messages(project_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assistant_bodies_are_envelopes() {
        let ai = ScriptedCollaborator::echo()
            .reply("just chatting")
            .fail(GenerationError::Transport("reset".to_string()));
        let (state, project_id) = setup(ai).await;
        let (alice, mut rx) = join(&state, project_id, "alice");

        run_assistant(&state, project_id, alice.connection_id, "hello").await;
        run_assistant(&state, project_id, alice.connection_id, "again").await;
        notify(&state, alice.connection_id, project_id, "Failed to save your message. (disk full)");

        let bodies: Vec<String> = events(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::ProjectMessage(m) if m.sender.is_ai() => Some(m.body),
                _ => None,
            })
            .collect();
        let texts: Vec<String> = bodies.iter().map(|b| envelope_text(b)).collect();
        assert_eq!(
            texts,
            vec![
                "just chatting".to_string(),
                FAILED_REPLY.to_string(),
                "Failed to save your message. (disk full)".to_string(),
            ]
        );

        let history = state.store().list_messages(project_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(envelope_text(&history[0].body), "just chatting");
    }
}
