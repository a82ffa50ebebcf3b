use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::error::GenerationError;
use crate::traits::AiCollaborator;

/// Offline collaborator that replays queued replies.
///
/// Once the queue is empty it echoes the prompt back as a text-only
/// envelope. Used by the `stub` provider and in tests.
#[derive(Default)]
pub struct ScriptedCollaborator {
    replies: Mutex<VecDeque<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedCollaborator {
    /// A collaborator that only echoes.
    pub fn echo() -> Self {
        Self::default()
    }

    /// Queue a successful raw reply.
    pub fn reply(self, raw: impl Into<String>) -> Self {
        self.push(Ok(raw.into()));
        self
    }

    /// Queue a failure.
    pub fn fail(self, error: GenerationError) -> Self {
        self.push(Err(error));
        self
    }

    /// Wait this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push(&self, reply: Result<String, GenerationError>) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }
}

#[async_trait]
impl AiCollaborator for ScriptedCollaborator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(reply) => reply,
            None => Ok(json!({ "text": format!("You said: {prompt}") }).to_string()),
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}
