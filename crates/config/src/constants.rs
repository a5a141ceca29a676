//! Default values shared by the settings and the processors

/// Audio defaults
pub mod audio {
    /// Sample rate of user audio entering the pipeline (Hz)
    pub const INPUT_SAMPLE_RATE: u32 = 16000;

    /// Sample rate of bot audio leaving the pipeline (Hz)
    pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

    /// Lowest accepted sample rate (Hz)
    pub const MIN_SAMPLE_RATE: u32 = 8000;

    /// Highest accepted sample rate (Hz)
    pub const MAX_SAMPLE_RATE: u32 = 192_000;

    /// Gap in an intermittent user stream after which silence is inserted (ms)
    pub const SILENCE_GAP_MS: u64 = 1000;
}

/// Timeouts for waits on external services
pub mod timeouts {
    /// Bound on each wait for a service response chunk (ms)
    pub const RESPONSE_TIMEOUT_MS: u64 = 10_000;

    /// Smallest accepted response timeout (ms)
    pub const MIN_RESPONSE_TIMEOUT_MS: u64 = 100;

    /// Window after the bot starts speaking in which user speech does not interrupt (ms)
    pub const INTERRUPTION_GRACE_MS: u64 = 0;
}

/// Environment variable layering
pub mod env {
    /// Prefix of environment overrides (`VOXFLOW__PIPELINE__ENABLE_METRICS=true`)
    pub const PREFIX: &str = "VOXFLOW";

    /// Separator between nested keys
    pub const SEPARATOR: &str = "__";
}
