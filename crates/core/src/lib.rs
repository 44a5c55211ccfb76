//! Client library for the govor voice gateway.
//!
//! This crate holds everything that talks to the Sber speech stack and the
//! pieces shared between the gateway and its recognition workers:
//!
//! - `options`: the recognition options tree and its builder.
//! - `relay`: the per-session audio/transcript relay channel.
//! - `recognizer`: the streaming recognition worker task.
//! - `oauth`: bearer-token issuance.
//! - `chat`: the GigaChat conversation client.
//! - `synth`: the speech-synthesis client.

pub mod chat;
pub mod error;
pub mod oauth;
pub mod options;
pub mod recognizer;
pub mod relay;
pub mod synth;

pub use error::SpeechError;
pub use relay::{RelayChannel, TranscriptEvent};
