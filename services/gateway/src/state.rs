use std::sync::Arc;

use govor_core::chat::ChatModel;
use govor_core::recognizer::RecognizerSpawner;
use govor_core::synth::Synthesizer;

use crate::config::Config;
use crate::tokens::TokenSource;

/// Shared application state handed to every session.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<dyn TokenSource>,
    pub chat: Arc<dyn ChatModel>,
    pub synth: Arc<dyn Synthesizer>,
    pub recognizer: Arc<dyn RecognizerSpawner>,
    pub config: Arc<Config>,
}
