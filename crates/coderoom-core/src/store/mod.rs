//! Persistence gateway implementations.

mod fs;
mod memory;

use std::sync::Arc;

use coderoom_config::StoreConfig;
use tracing::info;

pub use self::fs::FsStore;
pub use self::memory::MemoryStore;

use crate::error::StoreError;
use crate::traits::ProjectStore;

/// Longest accepted project name, in characters.
pub const MAX_PROJECT_NAME: usize = 100;

/// Build the store described by the configuration.
pub fn from_config(config: &StoreConfig) -> Result<Arc<dyn ProjectStore>, StoreError> {
    match config {
        StoreConfig::Memory => {
            info!("using in-memory project store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreConfig::Fs(fs) => {
            info!(root = %fs.root, "using file project store");
            Ok(Arc::new(FsStore::open(&fs.root)?))
        }
    }
}

pub(crate) fn validate_name(name: &str) -> Result<String, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::InvalidInput("project name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_PROJECT_NAME {
        return Err(StoreError::InvalidInput(format!(
            "project name is longer than {MAX_PROJECT_NAME} characters"
        )));
    }
    Ok(name.to_string())
}
