use crate::error::QueryError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// External chat-completion capability used to compose grounded answers.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, QueryError>;
}

/// OpenAI-compatible `/v1/chat/completions` client (LM Studio and friends).
pub struct LmStudioChat {
    base_url: String,
    model: String,
    client: Client,
}

impl LmStudioChat {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }
}

#[async_trait]
impl ChatModel for LmStudioChat {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, QueryError> {
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": system_prompt },
                    { "role": "user", "content": user_prompt },
                ],
                "temperature": 0.1,
                "max_tokens": 1024,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::ChatFailed(format!(
                "chat endpoint returned {status}"
            )));
        }

        let payload: ChatResponse = response.json().await?;
        let answer = payload
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(answer)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}
