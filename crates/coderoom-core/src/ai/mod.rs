//! AI collaborator implementations.

mod openai;
mod scripted;

use std::sync::Arc;

use coderoom_config::{AiConfig, AiProvider};
use tracing::info;

pub use openai::OpenAiCollaborator;
pub use scripted::ScriptedCollaborator;

use crate::error::GenerationError;
use crate::traits::AiCollaborator;

/// Instructions sent ahead of every prompt unless the config overrides them.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a senior software engineer pairing with a team inside a shared project workspace.
Write modular, readable code with error handling, and keep existing behaviour intact.

Always answer with a single JSON object and nothing else:
{
  "text": "<what you did, for the chat>",
  "fileTree": {
    "<path/relative/to/project>": { "file": { "contents": "<full file text>" } }
  },
  "buildCommand": { "mainItem": "npm", "commands": ["install"] },
  "startCommand": { "mainItem": "node", "commands": ["app.js"] }
}

Only "text" is required. Include "fileTree" when you create or change files; every
file you list replaces the stored file at that path, other files are left alone.
Use plain relative paths without "." or ".." segments.
For conversation without code changes reply with {"text": "..."}."#;

/// Build the collaborator described by the configuration.
pub fn from_config(config: &AiConfig) -> Result<Arc<dyn AiCollaborator>, GenerationError> {
    match config.provider {
        AiProvider::OpenAi => {
            let collaborator = OpenAiCollaborator::new(config)?;
            info!(model = %config.model, endpoint = %collaborator.endpoint(), "using OpenAI-compatible collaborator");
            Ok(Arc::new(collaborator))
        }
        AiProvider::Stub => {
            info!("using stub collaborator");
            Ok(Arc::new(ScriptedCollaborator::echo()))
        }
    }
}
