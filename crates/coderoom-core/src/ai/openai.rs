use std::time::Duration;

use async_trait::async_trait;
use coderoom_config::{AiConfig, DEFAULT_OPENAI_ENDPOINT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::DEFAULT_SYSTEM_PROMPT;
use crate::error::GenerationError;
use crate::traits::AiCollaborator;

/// OpenAI-compatible chat completions client.
/// Works with OpenAI and other compatible APIs.
pub struct OpenAiCollaborator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    system_prompt: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatTurn<'a>; 2],
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiCollaborator {
    pub fn new(config: &AiConfig) -> Result<Self, GenerationError> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_ENDPOINT.to_string());

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(api_key) = config.api_key.as_ref().filter(|k| !k.is_empty()) {
            let value = format!("Bearer {}", api_key.expose())
                .parse::<reqwest::header::HeaderValue>()
                .map_err(|_| GenerationError::Transport("API key is not a valid header value".to_string()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout.as_duration())
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(OpenAiCollaborator {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AiCollaborator for OpenAiCollaborator {
    #[instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatTurn {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatTurn {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| GenerationError::InvalidResponse("no content in completion".to_string()))?;

        debug!(reply_len = content.len(), "completion received");
        Ok(content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Map a non-success HTTP status to a generation error.
fn classify_failure(status: StatusCode, body: &str) -> GenerationError {
    let detail = format!("{status}: {}", body.chars().take(500).collect::<String>());
    if body.contains("insufficient_quota") || status == StatusCode::PAYMENT_REQUIRED {
        GenerationError::QuotaExceeded(detail)
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        GenerationError::RateLimited(detail)
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        GenerationError::Timeout
    } else {
        GenerationError::Transport(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderoom_config::Secret;

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            classify_failure(
                StatusCode::TOO_MANY_REQUESTS,
                r#"{"error":{"code":"insufficient_quota"}}"#
            ),
            GenerationError::QuotaExceeded(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::GATEWAY_TIMEOUT, ""),
            GenerationError::Timeout
        ));
        assert!(matches!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
            GenerationError::Transport(_)
        ));
    }

    #[test]
    fn test_new_trims_endpoint_and_uses_default_prompt() {
        let config = AiConfig {
            endpoint: Some("http://localhost:8080/v1/".to_string()),
            api_key: Some(Secret::new("sk-test")),
            ..Default::default()
        };
        let collaborator = OpenAiCollaborator::new(&config).unwrap();
        assert_eq!(collaborator.endpoint(), "http://localhost:8080/v1");
        assert_eq!(collaborator.system_prompt, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(collaborator.name(), "openai");
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: [
                ChatTurn {
                    role: "system",
                    content: "s",
                },
                ChatTurn {
                    role: "user",
                    content: "u",
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][1]["content"], "u");
        assert_eq!(value["response_format"]["type"], "json_object");
    }
}
