use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use govor_core::chat::GigaChatClient;
use govor_core::oauth::OauthClient;
use govor_core::options::{AudioEncoding, RecognitionOptionsBuilder};
use govor_core::recognizer::SaluteRecognizer;
use govor_core::synth::SaluteSynthesizer;
use govor_gateway::config::Config;
use govor_gateway::db::TokenStore;
use govor_gateway::router::create_router;
use govor_gateway::state::AppState;
use govor_gateway::tokens::{CredentialCache, GIGA_CHAT, SALUTE_SPEECH, TokenSpec};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .context("Invalid DATABASE_URL")?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await
        .context("Failed to open token database")?;
    let store = TokenStore::new(pool);
    store.run_migrations().await?;

    let issuer = OauthClient::new(config.oauth_url.clone(), config.accept_invalid_certs)
        .context("Failed to build OAuth client")?;
    let specs = HashMap::from([
        (
            SALUTE_SPEECH.to_string(),
            TokenSpec {
                scope: "SALUTE_SPEECH_PERS".to_string(),
                auth_key: config.salute_speech_api_key.clone(),
            },
        ),
        (
            GIGA_CHAT.to_string(),
            TokenSpec {
                scope: "GIGACHAT_API_PERS".to_string(),
                auth_key: config.gigachat_api_key.clone(),
            },
        ),
    ]);
    let tokens = Arc::new(CredentialCache::new(
        store,
        Arc::new(issuer),
        specs,
        config.token_safety_margin,
    ));

    let mut options = RecognitionOptionsBuilder::new();
    options
        .audio_encoding(AudioEncoding::PcmS16le)
        .sample_rate(config.sample_rate)
        .channels_count(1)
        .language(&config.language)
        .enable_partial_results(true)
        .enable_vad(true)
        .no_speech_timeout(config.no_speech_timeout)
        .max_speech_timeout(config.max_speech_timeout);
    let recognizer = Arc::new(SaluteRecognizer {
        url: config.recognizer_url.clone(),
        ca_cert: config.ca_cert.clone(),
        options: options.build(),
    });

    let chat = Arc::new(
        GigaChatClient::new(
            config.chat_url.clone(),
            config.chat_model.clone(),
            config.accept_invalid_certs,
        )
        .context("Failed to build chat client")?,
    );
    let synth = Arc::new(
        SaluteSynthesizer::new(
            config.synth_url.clone(),
            config.tts_format.clone(),
            config.tts_voice.clone(),
            config.accept_invalid_certs,
        )
        .context("Failed to build synthesis client")?,
    );

    let bind_address = config.bind_address;
    let state = Arc::new(AppState {
        tokens,
        chat,
        synth,
        recognizer,
        config: Arc::new(config),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!("Listening on {bind_address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("Shutdown signal received");
}
