use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use govor_core::options::parse_duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Default system prompt for the GigaChat conversation.
const DEFAULT_SYSTEM_PROMPT: &str = "Ты — голосовой ассистент. Отвечай коротко и по делу, \
    разговорным языком, без разметки: ответ будет озвучен.";

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub salute_speech_api_key: String,
    pub gigachat_api_key: String,
    pub oauth_url: String,
    pub recognizer_url: String,
    pub synth_url: String,
    pub chat_url: String,
    pub chat_model: String,
    pub tts_voice: String,
    pub tts_format: String,
    pub language: String,
    pub sample_rate: u32,
    pub no_speech_timeout: Duration,
    pub max_speech_timeout: Duration,
    pub token_safety_margin: Duration,
    pub ca_cert: Option<PathBuf>,
    pub accept_invalid_certs: bool,
    pub system_prompt: String,
    pub static_dir: PathBuf,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://govor.db?mode=rwc".to_string());

        let salute_speech_api_key = std::env::var("SALUTE_SPEECH_API_KEY")
            .map_err(|_| ConfigError::MissingVar("SALUTE_SPEECH_API_KEY".to_string()))?;
        let gigachat_api_key = std::env::var("GIGACHAT_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GIGACHAT_API_KEY".to_string()))?;

        let oauth_url = std::env::var("OAUTH_URL")
            .unwrap_or_else(|_| "https://ngw.devices.sberbank.ru:9443/api/v2/oauth".to_string());
        let recognizer_url = std::env::var("RECOGNIZER_URL")
            .unwrap_or_else(|_| "wss://smartspeech.sber.ru/stream/v1/recognize".to_string());
        let synth_url = std::env::var("SYNTH_URL")
            .unwrap_or_else(|_| "https://smartspeech.sber.ru/rest/v1/text:synthesize".to_string());
        let chat_url = std::env::var("CHAT_URL").unwrap_or_else(|_| {
            "https://gigachat.devices.sberbank.ru/api/v1/chat/completions".to_string()
        });
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "GigaChat".to_string());

        let tts_voice = std::env::var("TTS_VOICE").unwrap_or_else(|_| "Bys_24000".to_string());
        let tts_format = std::env::var("TTS_FORMAT").unwrap_or_else(|_| "wav16".to_string());
        let language =
            std::env::var("RECOGNITION_LANGUAGE").unwrap_or_else(|_| "ru-RU".to_string());

        let sample_rate_str =
            std::env::var("SAMPLE_RATE").unwrap_or_else(|_| "16000".to_string());
        let sample_rate = sample_rate_str
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidValue("SAMPLE_RATE".to_string(), e.to_string()))?;

        let no_speech_timeout = env_duration("NO_SPEECH_TIMEOUT", "4s")?;
        let max_speech_timeout = env_duration("MAX_SPEECH_TIMEOUT", "20s")?;

        let margin_str =
            std::env::var("TOKEN_SAFETY_MARGIN_SECS").unwrap_or_else(|_| "60".to_string());
        let token_safety_margin = margin_str
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| {
                ConfigError::InvalidValue("TOKEN_SAFETY_MARGIN_SECS".to_string(), e.to_string())
            })?;

        let ca_cert = std::env::var("CA_CERT_PATH").map(PathBuf::from).ok();
        let accept_invalid_certs = std::env::var("ACCEPT_INVALID_CERTS")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let system_prompt = std::env::var("SYSTEM_PROMPT")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());
        let static_dir = std::env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./static"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            database_url,
            salute_speech_api_key,
            gigachat_api_key,
            oauth_url,
            recognizer_url,
            synth_url,
            chat_url,
            chat_model,
            tts_voice,
            tts_format,
            language,
            sample_rate,
            no_speech_timeout,
            max_speech_timeout,
            token_safety_margin,
            ca_cert,
            accept_invalid_certs,
            system_prompt,
            static_dir,
            log_level,
        })
    }
}

fn env_duration(var: &str, default: &str) -> Result<Duration, ConfigError> {
    let literal = std::env::var(var).unwrap_or_else(|_| default.to_string());
    parse_duration(var, &literal)
        .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))
}
