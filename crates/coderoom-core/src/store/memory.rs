use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::model::{ChatMessage, Project, ProjectId, UserId};
use crate::traits::ProjectStore;
use crate::tree::FlatTree;

#[derive(Default)]
struct State {
    projects: HashMap<ProjectId, Project>,
    messages: HashMap<ProjectId, Vec<ChatMessage>>,
}

/// In-memory store for tests and throwaway deployments.
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        MemoryStore {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(id: ProjectId) -> StoreError {
    StoreError::NotFound(format!("project {id}"))
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn create_project(&self, name: &str, owner: &UserId) -> Result<Project, StoreError> {
        let name = super::validate_name(name)?;
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

        if state.projects.values().any(|p| p.name == name) {
            return Err(StoreError::Conflict(format!("project name '{name}' is taken")));
        }

        let project = Project::new(name, owner.clone());
        state.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.projects.get(&id).cloned().ok_or_else(|| not_found(id))
    }

    async fn list_projects(&self, user: &UserId) -> Result<Vec<Project>, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut projects: Vec<Project> = state
            .projects
            .values()
            .filter(|p| p.is_member(user))
            .cloned()
            .collect();
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }

    async fn delete_project(&self, id: ProjectId) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.projects.remove(&id).ok_or_else(|| not_found(id))?;
        state.messages.remove(&id);
        Ok(())
    }

    async fn add_collaborators(
        &self,
        id: ProjectId,
        users: &[UserId],
    ) -> Result<Project, StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let project = state.projects.get_mut(&id).ok_or_else(|| not_found(id))?;

        for user in users {
            if *user != project.owner_id {
                project.collaborator_ids.insert(user.clone());
            }
        }
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    async fn get_tree(&self, id: ProjectId) -> Result<FlatTree, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .projects
            .get(&id)
            .map(|p| p.file_tree.clone())
            .ok_or_else(|| not_found(id))
    }

    async fn set_tree(&self, id: ProjectId, tree: &FlatTree) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let project = state.projects.get_mut(&id).ok_or_else(|| not_found(id))?;
        project.file_tree = tree.clone();
        project.updated_at = Utc::now();
        Ok(())
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if !state.projects.contains_key(&message.project_id) {
            return Err(not_found(message.project_id));
        }
        state
            .messages
            .entry(message.project_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, id: ProjectId) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if !state.projects.contains_key(&id) {
            return Err(not_found(id));
        }
        Ok(state.messages.get(&id).cloned().unwrap_or_default())
    }
}
