//! Domain records shared by the server, the store and the sandbox.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tree::FlatTree;

/// Sender id used for assistant messages.
pub const AI_SENDER_ID: &str = "ai";

/// Display name used for assistant messages.
pub const AI_DISPLAY_NAME: &str = "AI Assistant";

/// Opaque project identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(Uuid);

impl ProjectId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        ProjectId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Returned when a string is not a syntactically valid project id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid project id: {0:?}")]
pub struct InvalidProjectId(pub String);

impl FromStr for ProjectId {
    type Err = InvalidProjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(ProjectId)
            .map_err(|_| InvalidProjectId(s.to_string()))
    }
}

impl From<Uuid> for ProjectId {
    fn from(id: Uuid) -> Self {
        ProjectId(id)
    }
}

/// Stable identifier of an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId(id.to_string())
    }
}

/// Who a verified credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Identity {
            user_id: UserId::new(user_id),
            display_name: display_name.into(),
        }
    }
}

/// Author of a chat message as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub id: String,
    pub display_name: String,
}

impl Sender {
    /// The assistant.
    pub fn ai() -> Self {
        Sender {
            id: AI_SENDER_ID.to_string(),
            display_name: AI_DISPLAY_NAME.to_string(),
        }
    }

    pub fn is_ai(&self) -> bool {
        self.id == AI_SENDER_ID
    }
}

impl From<&Identity> for Sender {
    fn from(identity: &Identity) -> Self {
        Sender {
            id: identity.user_id.to_string(),
            display_name: identity.display_name.clone(),
        }
    }
}

/// A collaborative project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(default)]
    pub collaborator_ids: BTreeSet<UserId>,
    #[serde(default)]
    pub file_tree: FlatTree,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// A new empty project owned by `owner`.
    pub fn new(name: impl Into<String>, owner: UserId) -> Self {
        let now = Utc::now();
        Project {
            id: ProjectId::new(),
            name: name.into(),
            owner_id: owner,
            collaborator_ids: BTreeSet::new(),
            file_tree: FlatTree::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn meta(&self) -> ProjectMeta {
        ProjectMeta {
            owner_id: self.owner_id.clone(),
            collaborator_ids: self.collaborator_ids.clone(),
        }
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.owner_id == *user || self.collaborator_ids.contains(user)
    }
}

/// Ownership data used for membership checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    pub owner_id: UserId,
    pub collaborator_ids: BTreeSet<UserId>,
}

impl ProjectMeta {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.owner_id == *user || self.collaborator_ids.contains(user)
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub sender: Sender,
    #[serde(rename = "message")]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// A new message stamped with the current time.
    pub fn new(project_id: ProjectId, sender: Sender, body: impl Into<String>) -> Self {
        ChatMessage {
            id: Uuid::new_v4(),
            project_id,
            sender,
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}
