//! The streaming recognition worker.
//!
//! One worker runs per active turn, isolated from the caller-facing task so
//! a stalled or failing stream never blocks the session loop. It connects to
//! the recognizer over WSS with a bearer credential, sends the options tree
//! as the first frame, then relays audio out and transcript events in until
//! the stream ends. Whatever the exit path (clean closure, transport error,
//! or an abort from the orchestrator), the relay channel is finished exactly
//! once; the worker never retries a broken stream on its own.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    Connector, connect_async_tls_with_config,
    tungstenite::{client::IntoClientRequest, http::header::AUTHORIZATION, protocol::Message},
};
use tracing::{debug, error, info, warn};

use crate::error::SpeechError;
use crate::options::RecognitionOptions;
use crate::relay::{RelayChannel, TranscriptEvent};

/// Bounded wait for caller audio before polling again.
const AUDIO_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Spawns recognition workers bound to a session's relay channel.
///
/// The orchestrator owns the returned handle for the duration of one turn
/// and may abort it at any point; the sentinel is still published.
pub trait RecognizerSpawner: Send + Sync {
    fn spawn(&self, token: String, channel: RelayChannel) -> JoinHandle<()>;
}

/// Connection settings for the SaluteSpeech streaming recognizer.
#[derive(Debug, Clone)]
pub struct SaluteRecognizer {
    /// WSS endpoint of the recognizer.
    pub url: String,
    /// Trusted-root certificate (PEM). `None` uses the platform roots.
    pub ca_cert: Option<PathBuf>,
    /// Options tree sent as the first outbound frame.
    pub options: RecognitionOptions,
}

impl RecognizerSpawner for SaluteRecognizer {
    fn spawn(&self, token: String, channel: RelayChannel) -> JoinHandle<()> {
        let recognizer = self.clone();
        // Constructed outside the task so the sentinel fires even if the
        // task is aborted before its first poll.
        let guard = SentinelGuard(channel.clone());
        tokio::spawn(async move {
            let _guard = guard;
            match run_stream(&recognizer, &token, &channel).await {
                Ok(()) => info!("recognition stream finished"),
                Err(e) => error!(error = %e, "recognition stream failed"),
            }
        })
    }
}

/// Finishes the relay channel when dropped. `RelayChannel::finish` is
/// idempotent, so the sentinel is published exactly once no matter how many
/// exit paths race.
struct SentinelGuard(RelayChannel);

impl Drop for SentinelGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

async fn run_stream(
    recognizer: &SaluteRecognizer,
    token: &str,
    channel: &RelayChannel,
) -> Result<(), SpeechError> {
    let mut request = recognizer.url.as_str().into_client_request()?;
    let bearer = format!("Bearer {token}")
        .parse()
        .map_err(|_| SpeechError::Credential("token is not a valid header value".into()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let connector = match &recognizer.ca_cert {
        Some(path) => Some(Connector::Rustls(Arc::new(pinned_root_config(path)?))),
        None => None,
    };

    let (stream, _) = connect_async_tls_with_config(request, None, false, connector).await?;
    info!(url = %recognizer.url, "connected to recognizer");
    let (mut ws_tx, mut ws_rx) = stream.split();

    let options_frame = serde_json::to_string(&recognizer.options)?;
    ws_tx.send(Message::Text(options_frame.into())).await?;

    loop {
        tokio::select! {
            chunk = channel.pop_audio(AUDIO_POLL_INTERVAL) => {
                match chunk {
                    Some(chunk) => {
                        debug!(bytes = chunk.len(), "forwarding audio chunk");
                        ws_tx.send(Message::Binary(chunk)).await?;
                    }
                    // Nothing within the window; poll again.
                    None => debug!("no audio available, waiting"),
                }
            }
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => publish_transcription(channel, &text),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("recognizer closed the stream");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    transcription: Option<Transcription>,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    #[serde(default)]
    results: Vec<Hypothesis>,
    #[serde(default)]
    eou: bool,
    eou_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hypothesis {
    #[serde(default)]
    normalized_text: String,
}

/// Decodes an inbound frame and publishes the top hypothesis.
/// Non-transcription diagnostic frames are logged and otherwise ignored.
fn publish_transcription(channel: &RelayChannel, raw: &str) {
    match serde_json::from_str::<RecognitionResponse>(raw) {
        Ok(RecognitionResponse {
            transcription: Some(transcription),
        }) => {
            let text = transcription
                .results
                .first()
                .map(|r| r.normalized_text.clone())
                .unwrap_or_default();
            info!(eou = transcription.eou, %text, "transcription");
            channel.push_event(TranscriptEvent {
                text,
                is_final: transcription.eou,
                eou_reason: transcription.eou_reason,
            });
        }
        Ok(RecognitionResponse {
            transcription: None,
        }) => warn!(frame = raw, "non-transcription response"),
        Err(e) => warn!(error = %e, frame = raw, "undecodable recognizer frame"),
    }
}

/// TLS client configuration trusting exactly the configured root.
fn pinned_root_config(ca_path: &Path) -> Result<rustls::ClientConfig, SpeechError> {
    let pem = std::fs::read(ca_path)
        .map_err(|e| SpeechError::Tls(format!("reading {}: {e}", ca_path.display())))?;
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        let cert = cert.map_err(|e| SpeechError::Tls(format!("parsing CA pem: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| SpeechError::Tls(format!("adding CA root: {e}")))?;
    }
    if roots.is_empty() {
        return Err(SpeechError::Tls(format!(
            "{} contains no certificates",
            ca_path.display()
        )));
    }
    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}
