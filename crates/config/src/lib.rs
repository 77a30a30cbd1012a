//! Configuration for the callflow engine
//!
//! Layered settings: built-in defaults, optional TOML files, then
//! `CALLFLOW__` environment overrides.

mod settings;

pub use settings::{
    EngineSettings, ExtractionSettings, LlmSettings, RetrievalSettings, Settings, ToolSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
