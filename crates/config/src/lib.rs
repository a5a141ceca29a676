//! Configuration management for voxflow
//!
//! Supports loading configuration from:
//! - YAML/TOML/JSON files
//! - Environment variables (VOXFLOW__ prefix)
//!
//! Settings are plain values handed to the task and runner at construction;
//! nothing here is global.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, ObservabilityConfig, PipelineParams, RunnerConfig, RuntimeEnvironment,
    ServiceConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for voxflow_core::Error {
    fn from(err: ConfigError) -> Self {
        voxflow_core::Error::Configuration(err.to_string())
    }
}
