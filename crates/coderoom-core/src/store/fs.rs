use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::StoreError;
use crate::model::{ChatMessage, Project, ProjectId, UserId};
use crate::traits::ProjectStore;
use crate::tree::FlatTree;

/// File-backed store.
///
/// Layout under the root:
///
/// ```text
/// projects/<id>.json    project record including its file tree
/// messages/<id>.jsonl   chat history, one message per line
/// ```
///
/// Records are written to a temporary file and renamed into place, so a
/// crash never leaves a half-written project behind.
pub struct FsStore {
    root: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("projects"))?;
        std::fs::create_dir_all(root.join("messages"))?;
        Ok(FsStore {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_path(&self, id: ProjectId) -> PathBuf {
        self.root.join("projects").join(format!("{id}.json"))
    }

    fn messages_path(&self, id: ProjectId) -> PathBuf {
        self.root.join("messages").join(format!("{id}.jsonl"))
    }

    async fn read_project(&self, id: ProjectId) -> Result<Project, StoreError> {
        match fs::read(self.project_path(id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("project {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_project(&self, project: &Project) -> Result<(), StoreError> {
        let path = self.project_path(project.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(project)?;
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;
        debug!(project = %project.id, bytes = bytes.len(), "project written");
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Project>, StoreError> {
        let mut projects = Vec::new();
        let mut entries = fs::read_dir(self.root.join("projects")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<Project>(&bytes) {
                Ok(project) => projects.push(project),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable project"),
            }
        }
        Ok(projects)
    }
}

#[async_trait]
impl ProjectStore for FsStore {
    #[instrument(skip(self), fields(store = "fs"))]
    async fn create_project(&self, name: &str, owner: &UserId) -> Result<Project, StoreError> {
        let name = super::validate_name(name)?;
        let _guard = self.write_lock.lock().await;

        if self.read_all().await?.iter().any(|p| p.name == name) {
            return Err(StoreError::Conflict(format!("project name '{name}' is taken")));
        }

        let project = Project::new(name, owner.clone());
        self.write_project(&project).await?;
        Ok(project)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project, StoreError> {
        self.read_project(id).await
    }

    async fn list_projects(&self, user: &UserId) -> Result<Vec<Project>, StoreError> {
        let mut projects: Vec<Project> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|p| p.is_member(user))
            .collect();
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }

    #[instrument(skip(self), fields(store = "fs"))]
    async fn delete_project(&self, id: ProjectId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.project_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("project {id}")));
            }
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(self.messages_path(id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn add_collaborators(
        &self,
        id: ProjectId,
        users: &[UserId],
    ) -> Result<Project, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut project = self.read_project(id).await?;
        for user in users {
            if *user != project.owner_id {
                project.collaborator_ids.insert(user.clone());
            }
        }
        project.updated_at = Utc::now();
        self.write_project(&project).await?;
        Ok(project)
    }

    async fn get_tree(&self, id: ProjectId) -> Result<FlatTree, StoreError> {
        Ok(self.read_project(id).await?.file_tree)
    }

    #[instrument(skip(self, tree), fields(store = "fs", entries = tree.len()))]
    async fn set_tree(&self, id: ProjectId, tree: &FlatTree) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut project = self.read_project(id).await?;
        project.file_tree = tree.clone();
        project.updated_at = Utc::now();
        self.write_project(&project).await
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if !fs::try_exists(self.project_path(message.project_id)).await? {
            return Err(StoreError::NotFound(format!("project {}", message.project_id)));
        }

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.messages_path(message.project_id))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list_messages(&self, id: ProjectId) -> Result<Vec<ChatMessage>, StoreError> {
        if !fs::try_exists(self.project_path(id)).await? {
            return Err(StoreError::NotFound(format!("project {id}")));
        }
        let content = match fs::read_to_string(self.messages_path(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut messages = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(project = %id, error = %e, "skipping corrupt message line"),
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sender;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FsStore) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_project_persists_across_reopen() {
        let (dir, store) = setup();
        let project = store
            .create_project("demo", &UserId::from("alice"))
            .await
            .unwrap();

        let mut tree = FlatTree::new();
        tree.insert_dir("src");
        tree.insert_file("src/main.js", "run()");
        store.set_tree(project.id, &tree).await.unwrap();

        let reopened = FsStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get_tree(project.id).await.unwrap(), tree);
        assert_eq!(reopened.get_project(project.id).await.unwrap().name, "demo");
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let (_dir, store) = setup();
        store.create_project("demo", &UserId::from("a")).await.unwrap();
        let err = store
            .create_project(" demo ", &UserId::from("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_messages_append_and_list() {
        let (_dir, store) = setup();
        let project = store.create_project("chat", &UserId::from("a")).await.unwrap();

        store
            .append_message(&ChatMessage::new(project.id, Sender::ai(), "first"))
            .await
            .unwrap();
        store
            .append_message(&ChatMessage::new(project.id, Sender::ai(), "second"))
            .await
            .unwrap();

        let messages = store.list_messages(project.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].body, "second");
    }

    #[tokio::test]
    async fn test_missing_project_is_not_found() {
        let (_dir, store) = setup();
        let id = ProjectId::new();
        assert!(store.get_project(id).await.unwrap_err().is_not_found());
        assert!(store.list_messages(id).await.unwrap_err().is_not_found());
        assert!(store.delete_project(id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_removes_history() {
        let (dir, store) = setup();
        let project = store.create_project("gone", &UserId::from("a")).await.unwrap();
        store
            .append_message(&ChatMessage::new(project.id, Sender::ai(), "bye"))
            .await
            .unwrap();

        store.delete_project(project.id).await.unwrap();
        assert!(!dir
            .path()
            .join("messages")
            .join(format!("{}.jsonl", project.id))
            .exists());
        assert!(store.list_projects(&UserId::from("a")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_skipped_in_listing() {
        let (dir, store) = setup();
        store.create_project("fine", &UserId::from("a")).await.unwrap();
        std::fs::write(dir.path().join("projects").join("junk.json"), b"{not json").unwrap();

        let projects = store.list_projects(&UserId::from("a")).await.unwrap();
        assert_eq!(projects.len(), 1);
    }
}
