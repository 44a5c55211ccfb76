//! The recognition options tree and its builder.
//!
//! The recognizer expects a fully assembled options tree as the first frame
//! of every streaming session. The tree is built once per turn from typed
//! setters, or from flat `(key, value)` assignments routed by namespace
//! prefix (`hints_`, `speaker_separation_options_`, `normalization_options_`)
//! and dispatched by field class. Building has no side effects beyond the
//! tree itself; the last write per key wins.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::SpeechError;

/// Audio codecs accepted by the recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    PcmS16le,
    Opus,
    Mp3,
    Flac,
    Alaw,
    Mulaw,
    G729,
}

impl AudioEncoding {
    fn from_key(value: &str) -> Option<Self> {
        match value {
            "pcm" | "pcm_s16le" => Some(Self::PcmS16le),
            "opus" => Some(Self::Opus),
            "mp3" => Some(Self::Mp3),
            "flac" => Some(Self::Flac),
            "alaw" => Some(Self::Alaw),
            "mulaw" => Some(Self::Mulaw),
            "g729" => Some(Self::G729),
            _ => None,
        }
    }
}

/// Phrase hints for the recognizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Hints {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_letters: Option<bool>,
    #[serde(
        serialize_with = "serialize_opt_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub eou_timeout: Option<Duration>,
}

/// Speaker-separation sub-tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpeakerSeparationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_only_main_speaker: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Text-normalization sub-tree. Flags here carry an explicit presence bit,
/// distinct from `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable: Option<bool>,
}

/// The options tree sent to the recognizer as the first outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionOptions {
    pub audio_encoding: AudioEncoding,
    pub sample_rate: u32,
    pub channels_count: u32,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(
        serialize_with = "serialize_opt_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub no_speech_timeout: Option<Duration>,
    #[serde(
        serialize_with = "serialize_opt_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_speech_timeout: Option<Duration>,
    #[serde(
        serialize_with = "serialize_opt_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub eou_timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_partial_results: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_multi_utterance: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_vad: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_long_utterances: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_ws_flow_control: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub insight_models: Vec<String>,
    pub hints: Hints,
    pub speaker_separation_options: SpeakerSeparationOptions,
    pub normalization_options: NormalizationOptions,
    /// Keys outside every recognized namespace pass through untouched; the
    /// recognizer rejects them on decode, not here.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            audio_encoding: AudioEncoding::PcmS16le,
            sample_rate: 16_000,
            channels_count: 1,
            language: "ru-RU".to_string(),
            model: None,
            no_speech_timeout: None,
            max_speech_timeout: None,
            eou_timeout: None,
            enable_partial_results: None,
            enable_multi_utterance: None,
            enable_vad: None,
            enable_long_utterances: None,
            custom_ws_flow_control: None,
            insight_models: Vec::new(),
            hints: Hints::default(),
            speaker_separation_options: SpeakerSeparationOptions::default(),
            normalization_options: NormalizationOptions::default(),
            extra: BTreeMap::new(),
        }
    }
}

/// A flat assignment value accepted by [`RecognitionOptionsBuilder::set`].
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl OptionValue {
    fn expect_str(&self, key: &str) -> Result<&str, SpeechError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(SpeechError::configuration(
                key,
                format!("expected a string, got {other:?}"),
            )),
        }
    }

    fn expect_bool(&self, key: &str) -> Result<bool, SpeechError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(SpeechError::configuration(
                key,
                format!("expected a boolean, got {other:?}"),
            )),
        }
    }

    fn expect_u32(&self, key: &str) -> Result<u32, SpeechError> {
        match self {
            Self::Int(i) => u32::try_from(*i).map_err(|_| {
                SpeechError::configuration(key, format!("{i} is out of range"))
            }),
            other => Err(SpeechError::configuration(
                key,
                format!("expected an integer, got {other:?}"),
            )),
        }
    }

    fn expect_list(&self, key: &str) -> Result<&[String], SpeechError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(SpeechError::configuration(
                key,
                format!("expected a list, got {other:?}"),
            )),
        }
    }

    fn into_json(self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::from(s),
            Self::Int(i) => serde_json::Value::from(i),
            Self::Bool(b) => serde_json::Value::from(b),
            Self::List(items) => serde_json::Value::from(items),
        }
    }
}

const HINTS_PREFIX: &str = "hints_";
const SPEAKER_SEPARATION_PREFIX: &str = "speaker_separation_options_";
const NORMALIZATION_PREFIX: &str = "normalization_options_";

/// Assembles a [`RecognitionOptions`] tree.
///
/// Typed setters cover the options the gateway itself configures; `set`
/// takes the flat, namespaced assignments and routes them to the right
/// sub-tree and field class.
#[derive(Debug, Clone, Default)]
pub struct RecognitionOptionsBuilder {
    options: RecognitionOptions,
}

impl RecognitionOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio_encoding(&mut self, encoding: AudioEncoding) -> &mut Self {
        self.options.audio_encoding = encoding;
        self
    }

    pub fn sample_rate(&mut self, rate: u32) -> &mut Self {
        self.options.sample_rate = rate;
        self
    }

    pub fn channels_count(&mut self, count: u32) -> &mut Self {
        self.options.channels_count = count;
        self
    }

    pub fn language(&mut self, language: impl Into<String>) -> &mut Self {
        self.options.language = language.into();
        self
    }

    pub fn model(&mut self, model: impl Into<String>) -> &mut Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn no_speech_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.no_speech_timeout = Some(timeout);
        self
    }

    pub fn max_speech_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.max_speech_timeout = Some(timeout);
        self
    }

    pub fn eou_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.options.eou_timeout = Some(timeout);
        self
    }

    pub fn enable_partial_results(&mut self, enable: bool) -> &mut Self {
        self.options.enable_partial_results = Some(enable);
        self
    }

    pub fn enable_multi_utterance(&mut self, enable: bool) -> &mut Self {
        self.options.enable_multi_utterance = Some(enable);
        self
    }

    pub fn custom_ws_flow_control(&mut self, enable: bool) -> &mut Self {
        self.options.custom_ws_flow_control = Some(enable);
        self
    }

    pub fn enable_vad(&mut self, enable: bool) -> &mut Self {
        self.options.enable_vad = Some(enable);
        self
    }

    pub fn hints_words(&mut self, words: Vec<String>) -> &mut Self {
        if !words.is_empty() {
            self.options.hints.words = words;
        }
        self
    }

    pub fn insight_models(&mut self, models: Vec<String>) -> &mut Self {
        if !models.is_empty() {
            self.options.insight_models = models;
        }
        self
    }

    pub fn normalization_enable(&mut self, enable: bool) -> &mut Self {
        self.options.normalization_options.enable = Some(enable);
        self
    }

    pub fn speaker_separation_enable(&mut self, enable: bool) -> &mut Self {
        self.options.speaker_separation_options.enable = Some(enable);
        self
    }

    /// Routes a flat `(key, value)` assignment by namespace prefix, then by
    /// field class. Unknown keys outside every prefix become top-level
    /// passthrough scalars.
    pub fn set(&mut self, key: &str, value: OptionValue) -> Result<&mut Self, SpeechError> {
        if let Some(field) = key.strip_prefix(HINTS_PREFIX) {
            self.set_hints(key, field, value)?;
        } else if let Some(field) = key.strip_prefix(SPEAKER_SEPARATION_PREFIX) {
            self.set_speaker_separation(key, field, value)?;
        } else if let Some(field) = key.strip_prefix(NORMALIZATION_PREFIX) {
            self.set_normalization(key, field, value)?;
        } else {
            self.set_top_level(key, value)?;
        }
        Ok(self)
    }

    pub fn build(&self) -> RecognitionOptions {
        self.options.clone()
    }

    fn set_top_level(&mut self, key: &str, value: OptionValue) -> Result<(), SpeechError> {
        let opts = &mut self.options;
        match key {
            "audio_encoding" => {
                let name = value.expect_str(key)?;
                opts.audio_encoding = AudioEncoding::from_key(name).ok_or_else(|| {
                    SpeechError::configuration(key, format!("unknown encoding `{name}`"))
                })?;
            }
            "sample_rate" => opts.sample_rate = value.expect_u32(key)?,
            "channels_count" => opts.channels_count = value.expect_u32(key)?,
            "language" => opts.language = value.expect_str(key)?.to_string(),
            "model" => opts.model = Some(value.expect_str(key)?.to_string()),
            "no_speech_timeout" => {
                opts.no_speech_timeout = Some(parse_duration(key, value.expect_str(key)?)?)
            }
            "max_speech_timeout" => {
                opts.max_speech_timeout = Some(parse_duration(key, value.expect_str(key)?)?)
            }
            "eou_timeout" => {
                opts.eou_timeout = Some(parse_duration(key, value.expect_str(key)?)?)
            }
            "enable_partial_results" => {
                opts.enable_partial_results = Some(value.expect_bool(key)?)
            }
            "enable_multi_utterance" => {
                opts.enable_multi_utterance = Some(value.expect_bool(key)?)
            }
            "enable_vad" => opts.enable_vad = Some(value.expect_bool(key)?),
            "enable_long_utterances" => {
                opts.enable_long_utterances = Some(value.expect_bool(key)?)
            }
            "custom_ws_flow_control" => {
                opts.custom_ws_flow_control = Some(value.expect_bool(key)?)
            }
            "insight_models" => {
                let models = value.expect_list(key)?;
                if !models.is_empty() {
                    opts.insight_models = models.to_vec();
                }
            }
            _ => {
                opts.extra.insert(key.to_string(), value.into_json());
            }
        }
        Ok(())
    }

    fn set_hints(&mut self, key: &str, field: &str, value: OptionValue) -> Result<(), SpeechError> {
        let hints = &mut self.options.hints;
        match field {
            "words" => {
                let words = value.expect_list(key)?;
                if !words.is_empty() {
                    hints.words = words.to_vec();
                }
            }
            "enable_letters" => hints.enable_letters = Some(value.expect_bool(key)?),
            "eou_timeout" => {
                hints.eou_timeout = Some(parse_duration(key, value.expect_str(key)?)?)
            }
            other => {
                return Err(SpeechError::configuration(
                    key,
                    format!("unknown hints field `{other}`"),
                ));
            }
        }
        Ok(())
    }

    fn set_speaker_separation(
        &mut self,
        key: &str,
        field: &str,
        value: OptionValue,
    ) -> Result<(), SpeechError> {
        let sep = &mut self.options.speaker_separation_options;
        match field {
            "enable" => sep.enable = Some(value.expect_bool(key)?),
            "enable_only_main_speaker" => {
                sep.enable_only_main_speaker = Some(value.expect_bool(key)?)
            }
            "count" => sep.count = Some(value.expect_u32(key)?),
            other => {
                return Err(SpeechError::configuration(
                    key,
                    format!("unknown speaker separation field `{other}`"),
                ));
            }
        }
        Ok(())
    }

    fn set_normalization(
        &mut self,
        key: &str,
        field: &str,
        value: OptionValue,
    ) -> Result<(), SpeechError> {
        match field {
            "enable" => {
                self.options.normalization_options.enable = Some(value.expect_bool(key)?)
            }
            other => {
                return Err(SpeechError::configuration(
                    key,
                    format!("unknown normalization field `{other}`"),
                ));
            }
        }
        Ok(())
    }
}

/// Parses a literal duration string such as `"4s"`, `"1.5s"` or `"750ms"`.
pub fn parse_duration(key: &str, literal: &str) -> Result<Duration, SpeechError> {
    let trimmed = literal.trim();
    if let Some(millis) = trimmed.strip_suffix("ms") {
        let millis: u64 = millis.trim().parse().map_err(|_| {
            SpeechError::configuration(key, format!("`{literal}` is not a duration"))
        })?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(secs) = trimmed.strip_suffix('s') {
        let secs: f64 = secs.trim().parse().map_err(|_| {
            SpeechError::configuration(key, format!("`{literal}` is not a duration"))
        })?;
        // Rejects negative, non-finite, and overflowing second counts.
        return Duration::try_from_secs_f64(secs).map_err(|_| {
            SpeechError::configuration(key, format!("`{literal}` is not a duration"))
        });
    }
    Err(SpeechError::configuration(
        key,
        format!("`{literal}` has no `s`/`ms` suffix"),
    ))
}

fn serialize_opt_duration<S: Serializer>(
    duration: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match duration {
        // None is filtered by skip_serializing_if on every field.
        None => serializer.serialize_none(),
        Some(d) if d.subsec_nanos() == 0 => {
            serializer.serialize_str(&format!("{}s", d.as_secs()))
        }
        Some(d) => serializer.serialize_str(&format!("{}ms", d.as_millis())),
    }
}
