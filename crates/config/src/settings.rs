//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Turn engine configuration
    #[serde(default)]
    pub engine: EngineSettings,

    /// Variable extraction configuration
    #[serde(default)]
    pub extraction: ExtractionSettings,

    /// Knowledge retrieval configuration
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Language model configuration
    #[serde(default)]
    pub llm: LlmSettings,

    /// Function-call (webhook) configuration
    #[serde(default)]
    pub tools: ToolSettings,
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from an optional TOML file plus environment overrides.
    ///
    /// Environment variables use the `CALLFLOW__` prefix with `__` as the
    /// section separator, e.g. `CALLFLOW__ENGINE__SILENCE_CHECKIN_SECS=8`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix("CALLFLOW").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.interrupt_word_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.interrupt_word_threshold".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.engine.silence_checkin_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.silence_checkin_secs".to_string(),
                message: "dead-air check-in threshold must be non-zero".to_string(),
            });
        }

        if self.engine.speech_rate_wpm < 60 || self.engine.speech_rate_wpm > 400 {
            return Err(ConfigError::InvalidValue {
                field: "engine.speech_rate_wpm".to_string(),
                message: "speech rate outside plausible range (60-400 wpm)".to_string(),
            });
        }

        if !(0.5..=1.0).contains(&self.retrieval.cache_similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.cache_similarity_threshold".to_string(),
                message: "must be in [0.5, 1.0]".to_string(),
            });
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.top_k".to_string(),
                message: "must retrieve at least one chunk".to_string(),
            });
        }

        if self.retrieval.chunk_overlap_tokens >= self.retrieval.chunk_tokens {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.chunk_overlap_tokens".to_string(),
                message: "overlap must be smaller than the chunk size".to_string(),
            });
        }

        if self.llm.timeout_secs == 0 {
            tracing::warn!("llm.timeout_secs is 0; model calls will fail immediately");
        }

        Ok(())
    }
}

/// Turn engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Minimum word count for a partial transcript to count as an
    /// interruption while the agent is generating or speaking.
    #[serde(default = "default_interrupt_words")]
    pub interrupt_word_threshold: usize,

    /// Seconds past the expected playback end before the dead-air
    /// check-in prompt fires.
    #[serde(default = "default_silence_checkin")]
    pub silence_checkin_secs: u64,

    /// Prompt spoken by the dead-air check-in
    #[serde(default = "default_checkin_prompt")]
    pub checkin_prompt: String,

    /// Safety margin added to every playback segment estimate (ms)
    #[serde(default = "default_safety_margin")]
    pub segment_safety_margin_ms: u64,

    /// Assumed synthesis speech rate used for playback duration estimates
    #[serde(default = "default_speech_rate")]
    pub speech_rate_wpm: u32,

    /// History entries given to the flow machine and extraction per turn
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Maximum concurrent call sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle session expiry in seconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Interval of the background session cleanup task in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            interrupt_word_threshold: default_interrupt_words(),
            silence_checkin_secs: default_silence_checkin(),
            checkin_prompt: default_checkin_prompt(),
            segment_safety_margin_ms: default_safety_margin(),
            speech_rate_wpm: default_speech_rate(),
            history_window: default_history_window(),
            max_sessions: default_max_sessions(),
            session_timeout_secs: default_session_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

/// Variable extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// History entries inspected when extracting variables
    #[serde(default = "default_extraction_window")]
    pub history_window: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            history_window: default_extraction_window(),
        }
    }
}

/// Knowledge retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Cosine similarity above which a cached query is reused
    #[serde(default = "default_cache_threshold")]
    pub cache_similarity_threshold: f32,

    /// Number of chunks returned by a retrieval
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Approximate chunk size in tokens
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,

    /// Overlap between adjacent chunks in tokens
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap_tokens: usize,

    /// Maximum entries held by the semantic cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Embedding call timeout in seconds
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout_secs: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            cache_similarity_threshold: default_cache_threshold(),
            top_k: default_top_k(),
            chunk_tokens: default_chunk_tokens(),
            chunk_overlap_tokens: default_chunk_overlap(),
            cache_capacity: default_cache_capacity(),
            embed_timeout_secs: default_embed_timeout(),
        }
    }
}

/// Language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Per-call timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Function-call (webhook) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Default webhook timeout when a node declares none, in seconds
    #[serde(default = "default_tool_timeout")]
    pub default_timeout_secs: u64,

    /// Backoff before the single idempotent retry, in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_tool_timeout(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

fn default_interrupt_words() -> usize {
    2
}

fn default_silence_checkin() -> u64 {
    6
}

fn default_checkin_prompt() -> String {
    "Are you still there?".to_string()
}

fn default_safety_margin() -> u64 {
    250
}

fn default_speech_rate() -> u32 {
    150
}

fn default_history_window() -> usize {
    12
}

fn default_max_sessions() -> usize {
    500
}

fn default_session_timeout() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_extraction_window() -> usize {
    6
}

fn default_cache_threshold() -> f32 {
    0.95
}

fn default_top_k() -> usize {
    3
}

fn default_chunk_tokens() -> usize {
    400
}

fn default_chunk_overlap() -> usize {
    40
}

fn default_cache_capacity() -> usize {
    2048
}

fn default_embed_timeout() -> u64 {
    5
}

fn default_llm_timeout() -> u64 {
    15
}

fn default_tool_timeout() -> u64 {
    10
}

fn default_retry_backoff() -> u64 {
    500
}
