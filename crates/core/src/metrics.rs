//! Metrics side channel
//!
//! Processors that opt into metrics measure time-to-first-byte (TTFB),
//! processing time and service usage, and push the results downstream as
//! [`MetricsFrame`]s.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A single measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricsData {
    /// Time from request issuance to the first response chunk
    Ttfb {
        processor: String,
        model: Option<String>,
        value_secs: f64,
    },
    /// Time spent handling one request end to end
    Processing {
        processor: String,
        model: Option<String>,
        value_secs: f64,
    },
    LlmUsage {
        processor: String,
        model: Option<String>,
        prompt_tokens: u64,
        completion_tokens: u64,
    },
    TtsUsage {
        processor: String,
        model: Option<String>,
        characters: usize,
    },
}

impl MetricsData {
    pub fn processor(&self) -> &str {
        match self {
            MetricsData::Ttfb { processor, .. }
            | MetricsData::Processing { processor, .. }
            | MetricsData::LlmUsage { processor, .. }
            | MetricsData::TtsUsage { processor, .. } => processor,
        }
    }
}

/// Payload of a metrics frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricsFrame {
    pub data: Vec<MetricsData>,
}

impl MetricsFrame {
    pub fn single(data: MetricsData) -> Self {
        Self { data: vec![data] }
    }
}

/// Per-processor measurement state
#[derive(Debug, Clone)]
pub struct ProcessorMetrics {
    processor: String,
    model: Option<String>,
    ttfb_start: Option<Instant>,
    processing_start: Option<Instant>,
    /// Cleared after the first TTFB of a turn when only initial TTFB is wanted
    should_report_ttfb: bool,
}

impl ProcessorMetrics {
    pub fn new(processor: impl Into<String>) -> Self {
        Self {
            processor: processor.into(),
            model: None,
            ttfb_start: None,
            processing_start: None,
            should_report_ttfb: true,
        }
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.model = model;
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Begin a TTFB measurement
    pub fn start_ttfb(&mut self, report_only_initial: bool) {
        if self.should_report_ttfb {
            self.ttfb_start = Some(Instant::now());
            self.should_report_ttfb = !report_only_initial;
        }
    }

    /// Finish the running TTFB measurement, if any
    pub fn stop_ttfb(&mut self) -> Option<MetricsData> {
        let start = self.ttfb_start.take()?;
        Some(MetricsData::Ttfb {
            processor: self.processor.clone(),
            model: self.model.clone(),
            value_secs: start.elapsed().as_secs_f64(),
        })
    }

    pub fn start_processing(&mut self) {
        self.processing_start = Some(Instant::now());
    }

    pub fn stop_processing(&mut self) -> Option<MetricsData> {
        let start = self.processing_start.take()?;
        Some(MetricsData::Processing {
            processor: self.processor.clone(),
            model: self.model.clone(),
            value_secs: start.elapsed().as_secs_f64(),
        })
    }

    pub fn llm_usage(&self, prompt_tokens: u64, completion_tokens: u64) -> MetricsData {
        MetricsData::LlmUsage {
            processor: self.processor.clone(),
            model: self.model.clone(),
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn tts_usage(&self, text: &str) -> MetricsData {
        MetricsData::TtsUsage {
            processor: self.processor.clone(),
            model: self.model.clone(),
            characters: text.chars().count(),
        }
    }

    /// A new user turn re-enables TTFB reporting
    pub fn reset_turn(&mut self) {
        self.should_report_ttfb = true;
    }

    /// Drop running measurements without reporting them
    pub fn stop_all(&mut self) {
        self.ttfb_start = None;
        self.processing_start = None;
    }

    /// Elapsed time of the running TTFB measurement
    pub fn ttfb_elapsed(&self) -> Option<Duration> {
        self.ttfb_start.map(|s| s.elapsed())
    }
}
