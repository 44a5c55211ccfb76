use thiserror::Error;

/// Errors produced by the speech/chat client stack.
///
/// Each variant maps to one boundary: credential issuance, the streaming
/// recognizer transport, its wire protocol, option assembly, and the two
/// REST collaborators. Relay timeouts are not errors; `pop_audio` reports
/// them as an empty poll.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("credential issuance failed: {0}")]
    Credential(String),

    #[error("recognizer transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("malformed recognizer frame: {0}")]
    Protocol(String),

    #[error("invalid recognition option `{key}`: {reason}")]
    Configuration { key: String, reason: String },

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("chat completion failed: {0}")]
    Chat(String),

    #[error("tls setup failed: {0}")]
    Tls(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpeechError {
    pub fn configuration(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
