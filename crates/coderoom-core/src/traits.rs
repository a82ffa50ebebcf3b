use async_trait::async_trait;

use crate::error::{AuthError, GenerationError, StoreError};
use crate::model::{ChatMessage, Identity, Project, ProjectId, ProjectMeta, UserId};
use crate::tree::FlatTree;

/// Persistence gateway for projects, their file trees and chat history.
///
/// Implementations must be safe to share between connections. Concurrent
/// `set_tree` calls on one project resolve as last-write-wins.
#[async_trait]
pub trait ProjectStore: Send + Sync + 'static {
    /// Create a project owned by `owner`. Names are unique per store.
    async fn create_project(&self, name: &str, owner: &UserId) -> Result<Project, StoreError>;

    /// Fetch a project, including its file tree.
    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError>;

    /// Projects `user` owns or collaborates on, oldest first.
    async fn list_projects(&self, user: &UserId) -> Result<Vec<Project>, StoreError>;

    /// Delete a project and its chat history.
    async fn delete_project(&self, id: ProjectId) -> Result<(), StoreError>;

    /// Add collaborators; ids already present (including the owner) are ignored.
    async fn add_collaborators(
        &self,
        id: ProjectId,
        users: &[UserId],
    ) -> Result<Project, StoreError>;

    /// Current file tree of a project.
    async fn get_tree(&self, id: ProjectId) -> Result<FlatTree, StoreError>;

    /// Replace the file tree of a project.
    async fn set_tree(&self, id: ProjectId, tree: &FlatTree) -> Result<(), StoreError>;

    /// Owner and collaborators of a project.
    async fn get_project_meta(&self, id: ProjectId) -> Result<ProjectMeta, StoreError> {
        Ok(self.get_project(id).await?.meta())
    }

    /// Append a message to the project's chat history.
    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Chat history of a project, oldest first.
    async fn list_messages(&self, id: ProjectId) -> Result<Vec<ChatMessage>, StoreError>;
}

/// Turns a presented credential into an [`Identity`].
#[async_trait]
pub trait IdentityVerifier: Send + Sync + 'static {
    async fn verify(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Something that can answer a prompt, typically a hosted language model.
#[async_trait]
pub trait AiCollaborator: Send + Sync + 'static {
    /// Produce a raw reply for `prompt`. The reply is later run through
    /// [`crate::patch::interpret`].
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}
