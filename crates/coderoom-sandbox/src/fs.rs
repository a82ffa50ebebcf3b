use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use tracing::instrument;

use crate::error::SandboxError;

/// Filesystem primitives the mount adapter needs.
///
/// Paths are relative to the sandbox root and use `/` separators.
#[async_trait]
pub trait SandboxFs: Send + Sync + 'static {
    /// Create a single directory. The parent must exist. Creating a directory
    /// that already exists succeeds.
    async fn create_dir(&self, path: &str) -> Result<(), SandboxError>;

    /// Create or overwrite a file. The parent must exist.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError>;

    /// Read a file's contents.
    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> Result<bool, SandboxError>;

    /// Host directory backing the sandbox, if any. Processes run here.
    fn root(&self) -> Option<&Path>;
}

/// Sandbox backed by a directory on the local disk.
pub struct LocalSandbox {
    root: PathBuf,
}

impl LocalSandbox {
    /// Create a sandbox rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(LocalSandbox { root })
    }

    /// Resolve a relative path, refusing anything that could leave the root.
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let trimmed = path.trim_start_matches('/');
        let rel = Path::new(trimmed);

        for component in rel.components() {
            match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::PathTraversal(trimmed.to_string()));
                }
                _ => {}
            }
        }

        let full_path = self.root.join(rel);

        // A symlinked ancestor could still point outside the root.
        let mut ancestor = full_path.as_path();
        while !ancestor.exists() {
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => break,
            }
        }
        if !ancestor.canonicalize()?.starts_with(&self.root) {
            return Err(SandboxError::PathTraversal(trimmed.to_string()));
        }

        Ok(full_path)
    }
}

#[async_trait]
impl SandboxFs for LocalSandbox {
    #[instrument(skip(self), fields(sandbox = "local", path = %path))]
    async fn create_dir(&self, path: &str) -> Result<(), SandboxError> {
        let full_path = self.resolve(path)?;
        match fs::create_dir(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if fs::metadata(&full_path).await?.is_dir() {
                    Ok(())
                } else {
                    Err(SandboxError::WrongKind(path.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::ParentMissing(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, contents), fields(sandbox = "local", path = %path, size = contents.len()))]
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        let full_path = self.resolve(path)?;
        if let Ok(meta) = fs::metadata(&full_path).await {
            if meta.is_dir() {
                return Err(SandboxError::WrongKind(path.to_string()));
            }
        }
        match fs::write(&full_path, contents).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::ParentMissing(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let full_path = self.resolve(path)?;
        match fs::read_to_string(&full_path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, SandboxError> {
        let full_path = self.resolve(path)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    fn root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MemEntry {
    Dir,
    File(String),
}

/// In-memory sandbox for tests.
///
/// Behaves like a strict filesystem: writing below a missing directory
/// fails. Failures can be injected per path.
#[derive(Default)]
pub struct MemorySandbox {
    entries: Mutex<BTreeMap<String, MemEntry>>,
    failing: Mutex<HashSet<String>>,
    log: Mutex<Vec<String>>,
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `path` fail.
    pub fn fail_on(&self, path: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into());
    }

    /// Operations performed so far, e.g. `mkdir src` or `write src/a.js`.
    pub fn operations(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every path currently present.
    pub fn paths(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.entries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(clean(path)),
            Some(MemEntry::Dir)
        )
    }

    fn check(&self, op: &str, path: &str) -> Result<String, SandboxError> {
        let path = clean(path);
        if path.split('/').any(|s| s == "..") {
            return Err(SandboxError::PathTraversal(path.to_string()));
        }
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
        {
            return Err(SandboxError::Other(format!("injected failure on {path}")));
        }
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{op} {path}"));
        Ok(path.to_string())
    }
}

fn clean(path: &str) -> &str {
    path.trim_matches('/')
}

fn parent_exists(entries: &BTreeMap<String, MemEntry>, path: &str) -> bool {
    match path.rsplit_once('/') {
        None => true,
        Some((parent, _)) => matches!(entries.get(parent), Some(MemEntry::Dir)),
    }
}

#[async_trait]
impl SandboxFs for MemorySandbox {
    async fn create_dir(&self, path: &str) -> Result<(), SandboxError> {
        let path = self.check("mkdir", path)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&path) {
            Some(MemEntry::Dir) => return Ok(()),
            Some(MemEntry::File(_)) => return Err(SandboxError::WrongKind(path)),
            None => {}
        }
        if !parent_exists(&entries, &path) {
            return Err(SandboxError::ParentMissing(path));
        }
        entries.insert(path, MemEntry::Dir);
        Ok(())
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        let path = self.check("write", path)?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(MemEntry::Dir) = entries.get(&path) {
            return Err(SandboxError::WrongKind(path));
        }
        if !parent_exists(&entries, &path) {
            return Err(SandboxError::ParentMissing(path));
        }
        entries.insert(path, MemEntry::File(contents.to_string()));
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(clean(path)) {
            Some(MemEntry::File(contents)) => Ok(contents.clone()),
            Some(MemEntry::Dir) => Err(SandboxError::WrongKind(path.to_string())),
            None => Err(SandboxError::NotFound(path.to_string())),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, SandboxError> {
        let path = clean(path);
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(path.is_empty() || entries.contains_key(path))
    }

    fn root(&self) -> Option<&Path> {
        None
    }
}
