//! Session channel wire protocol.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "payload": {...}}`.

use serde::{Deserialize, Serialize};

use crate::model::{ChatMessage, ProjectId, Sender};
use crate::tree::FlatTree;

/// First frame a client sends after connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl Handshake {
    pub fn new(credential: impl Into<String>, project_id: impl Into<String>) -> Self {
        Handshake {
            credential: Some(credential.into()),
            project_id: Some(project_id.into()),
        }
    }
}

/// Why a join attempt was rejected. The connection is closed right after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinFailure {
    /// Malformed id, unknown project, or the user is not a member.
    InvalidProject,
    /// No credential was presented.
    NoToken,
    /// The credential did not verify.
    AuthFailed,
}

impl JoinFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinFailure::InvalidProject => "invalid-project",
            JoinFailure::NoToken => "no-token",
            JoinFailure::AuthFailed => "auth-failed",
        }
    }
}

impl std::fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected member as shown in presence lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub connection_id: String,
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedPayload {
    pub project_id: ProjectId,
    pub connection_id: String,
    pub members: Vec<Member>,
    pub file_tree: FlatTree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeUpdatePayload {
    pub project_id: ProjectId,
    /// The normalized patch that was merged.
    pub patch: FlatTree,
    /// Sender of the change, or `ai` for assistant patches.
    pub origin: Sender,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub project_id: ProjectId,
    pub members: Vec<Member>,
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ServerEvent {
    Joined(JoinedPayload),
    JoinError { reason: JoinFailure },
    ProjectMessage(ChatMessage),
    FileTreeUpdated(TreeUpdatePayload),
    Presence(PresencePayload),
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Joined(_) => "joined",
            ServerEvent::JoinError { .. } => "join-error",
            ServerEvent::ProjectMessage(_) => "project-message",
            ServerEvent::FileTreeUpdated(_) => "file-tree-updated",
            ServerEvent::Presence(_) => "presence",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Events clients send once joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    ProjectMessage { message: String },
    FileTreePatch {
        #[serde(rename = "fileTree")]
        file_tree: FlatTree,
    },
}

impl ClientEvent {
    pub fn message(text: impl Into<String>) -> Self {
        ClientEvent::ProjectMessage {
            message: text.into(),
        }
    }
}
