//! Speech-synthesis client.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use crate::error::SpeechError;

/// Turns reply text into playable audio.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, token: &str, text: &str) -> Result<Bytes, SpeechError>;
}

/// REST client for the SaluteSpeech `text:synthesize` endpoint.
pub struct SaluteSynthesizer {
    http: reqwest::Client,
    url: String,
    format: String,
    voice: String,
}

impl SaluteSynthesizer {
    pub fn new(
        url: String,
        format: String,
        voice: String,
        danger_accept_invalid_certs: bool,
    ) -> Result<Self, SpeechError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(danger_accept_invalid_certs)
            .build()?;
        Ok(Self {
            http,
            url,
            format,
            voice,
        })
    }
}

#[async_trait]
impl Synthesizer for SaluteSynthesizer {
    async fn synthesize(&self, token: &str, text: &str) -> Result<Bytes, SpeechError> {
        debug!(chars = text.len(), voice = %self.voice, "synthesizing reply");
        let response = self
            .http
            .post(&self.url)
            .query(&[("format", &self.format), ("voice", &self.voice)])
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(CONTENT_TYPE, "application/text")
            .body(text.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpeechError::Synthesis(format!(
                "synthesis returned {status}"
            )));
        }
        Ok(response.bytes().await?)
    }
}
