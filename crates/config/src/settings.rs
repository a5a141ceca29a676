//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use voxflow_core::StartParams;

use crate::constants::{audio, env, timeouts};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Parameters of every pipeline run
    #[serde(default)]
    pub pipeline: PipelineParams,

    /// Process-level runner behavior
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Bounds on external service waits
    #[serde(default)]
    pub services: ServiceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Load settings from a single YAML, TOML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let settings: Settings = match extension.as_str() {
            "yaml" | "yml" => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
            "toml" => toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?,
            "json" => {
                serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?
            }
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipeline.validate()?;
        self.services.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

/// Parameters of a pipeline run, carried to every processor by the Start frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineParams {
    /// New user speech may cut in-flight bot output
    #[serde(default)]
    pub allow_interruptions: bool,

    /// Processors report TTFB and processing time
    #[serde(default)]
    pub enable_metrics: bool,

    /// Processors report service usage
    #[serde(default)]
    pub enable_usage_metrics: bool,

    /// Only the first TTFB of each turn is reported
    #[serde(default)]
    pub report_only_initial_ttfb: bool,

    #[serde(default = "default_input_sample_rate")]
    pub audio_in_sample_rate: u32,

    #[serde(default = "default_output_sample_rate")]
    pub audio_out_sample_rate: u32,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            allow_interruptions: false,
            enable_metrics: false,
            enable_usage_metrics: false,
            report_only_initial_ttfb: false,
            audio_in_sample_rate: default_input_sample_rate(),
            audio_out_sample_rate: default_output_sample_rate(),
        }
    }
}

impl PipelineParams {
    /// Payload of the Start frame
    pub fn start_params(&self) -> StartParams {
        StartParams {
            allow_interruptions: self.allow_interruptions,
            enable_metrics: self.enable_metrics,
            enable_usage_metrics: self.enable_usage_metrics,
            report_only_initial_ttfb: self.report_only_initial_ttfb,
            audio_in_sample_rate: self.audio_in_sample_rate,
            audio_out_sample_rate: self.audio_out_sample_rate,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, rate) in [
            ("pipeline.audio_in_sample_rate", self.audio_in_sample_rate),
            ("pipeline.audio_out_sample_rate", self.audio_out_sample_rate),
        ] {
            if !(audio::MIN_SAMPLE_RATE..=audio::MAX_SAMPLE_RATE).contains(&rate) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!(
                        "Must be between {} and {} Hz, got {}",
                        audio::MIN_SAMPLE_RATE,
                        audio::MAX_SAMPLE_RATE,
                        rate
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Process-level runner behavior
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Cancel managed tasks on Ctrl-C
    #[serde(default = "default_true")]
    pub handle_sigint: bool,

    /// Cancel managed tasks on SIGTERM (unix only)
    #[serde(default = "default_true")]
    pub handle_sigterm: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            handle_sigint: true,
            handle_sigterm: true,
        }
    }
}

/// Bounds on waits for external services
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Bound on each wait for a response chunk
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Window after the bot starts speaking in which user speech does not interrupt
    #[serde(default = "default_interruption_grace_ms")]
    pub interruption_grace_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            interruption_grace_ms: default_interruption_grace_ms(),
        }
    }
}

impl ServiceConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn interruption_grace(&self) -> Duration {
        Duration::from_millis(self.interruption_grace_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.response_timeout_ms < timeouts::MIN_RESPONSE_TIMEOUT_MS {
            return Err(ConfigError::InvalidValue {
                field: "services.response_timeout_ms".to_string(),
                message: format!(
                    "Response timeout too low (minimum {}ms)",
                    timeouts::MIN_RESPONSE_TIMEOUT_MS
                ),
            });
        }
        Ok(())
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Log level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Log every frame push between processors at debug level
    #[serde(default)]
    pub log_frames: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            log_frames: false,
        }
    }
}

impl ObservabilityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "observability.log_level".to_string(),
                message: format!("Unknown level '{}'", self.log_level),
            });
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_input_sample_rate() -> u32 {
    audio::INPUT_SAMPLE_RATE
}

fn default_output_sample_rate() -> u32 {
    audio::OUTPUT_SAMPLE_RATE
}

fn default_response_timeout_ms() -> u64 {
    timeouts::RESPONSE_TIMEOUT_MS
}

fn default_interruption_grace_ms() -> u64 {
    timeouts::INTERRUPTION_GRACE_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load settings from `config/default.*`, `config/{env}.*` and `VOXFLOW__*`
/// environment variables, in increasing priority
pub fn load_settings(env_name: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env_name {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix(env::PREFIX)
            .separator(env::SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;
    tracing::debug!(env = env_name.unwrap_or("default"), "Settings loaded");

    Ok(settings)
}
