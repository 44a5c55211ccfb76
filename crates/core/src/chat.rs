//! GigaChat conversation client.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SpeechError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One entry of the running conversation buffer a session carries across
/// turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Produces the assistant reply for a transcript given the conversation so
/// far.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn reply(&self, token: &str, history: &[ChatMessage]) -> Result<String, SpeechError>;
}

/// Chat-completions client for the GigaChat REST API.
pub struct GigaChatClient {
    http: reqwest::Client,
    url: String,
    model: String,
}

impl GigaChatClient {
    pub fn new(
        url: String,
        model: String,
        danger_accept_invalid_certs: bool,
    ) -> Result<Self, SpeechError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(danger_accept_invalid_certs)
            .build()?;
        Ok(Self { http, url, model })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[async_trait]
impl ChatModel for GigaChatClient {
    async fn reply(&self, token: &str, history: &[ChatMessage]) -> Result<String, SpeechError> {
        debug!(turns = history.len(), model = %self.model, "requesting completion");
        let response = self
            .http
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .json(&CompletionRequest {
                model: &self.model,
                messages: history,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpeechError::Chat(format!("completion returned {status}")));
        }
        let decoded: CompletionResponse = response
            .json()
            .await
            .map_err(|e| SpeechError::Chat(format!("undecodable completion: {e}")))?;
        decoded
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| SpeechError::Chat("completion had no choices".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let message = ChatMessage::new(ChatRole::Assistant, "привет");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "привет");
    }

    #[test]
    fn completion_reply_is_first_choice() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "ответ"}}]}"#;
        let decoded: CompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.choices[0].message.content, "ответ");
    }
}
