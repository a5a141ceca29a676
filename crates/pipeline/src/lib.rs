//! Pipeline execution for voxflow
//!
//! This crate drives frame processors:
//! - `Pipeline`: an ordered chain of processors wired both ways
//! - `PipelineTask`: one run from Start to End/Cancel, with an input queue
//! - `PipelineRunner`: runs tasks and maps process signals to cancellation
//! - Processors (SentenceAggregator, InterruptionHandler, AudioBufferProcessor)
//! - Service processors wrapping STT/TTS adapters

mod driver;
pub mod observers;
pub mod pipeline;
pub mod processors;
pub mod runner;
pub mod services;
pub mod task;

pub use observers::LoggingObserver;
pub use pipeline::{Pipeline, PipelineBuilder, ProcessorRef};
pub use runner::PipelineRunner;
pub use task::{PipelineTask, TaskEvent, TaskHandle, TaskOutcome, TaskState};

// Processor exports
pub use processors::{
    AudioBufferConfig, AudioBufferEvent, AudioBufferProcessor, FilterProcessor,
    InterruptionConfig, InterruptionHandler, MapProcessor, PassthroughProcessor,
    RecordingControl, SentenceAggregator,
};

// Service exports
pub use services::{SttProcessor, TtsProcessor};

use thiserror::Error;
use voxflow_core::ErrorFrame;

/// Pipeline errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Pipeline must contain at least one processor")]
    EmptyPipeline,

    #[error("Processor '{0}' appears more than once in the pipeline")]
    DuplicateProcessor(String),

    #[error("Task has already been started")]
    AlreadyStarted,

    #[error("Task no longer accepts frames")]
    TaskFinished,

    #[error("Fatal error: {0}")]
    Fatal(ErrorFrame),

    #[error("Processor task failed: {0}")]
    Join(String),
}

impl From<PipelineError> for voxflow_core::Error {
    fn from(err: PipelineError) -> Self {
        use voxflow_core::Error;

        match err {
            PipelineError::EmptyPipeline => Error::Configuration(err.to_string()),
            PipelineError::DuplicateProcessor(_) => Error::Configuration(err.to_string()),
            PipelineError::AlreadyStarted => Error::Configuration(err.to_string()),
            PipelineError::TaskFinished => Error::ChannelClosed,
            PipelineError::Fatal(frame) => Error::Processor {
                processor: frame.processor.unwrap_or_else(|| "pipeline".to_string()),
                message: frame.message,
            },
            PipelineError::Join(message) => Error::processor("runtime", message),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let core: voxflow_core::Error = PipelineError::DuplicateProcessor("a".into()).into();
        assert!(matches!(core, voxflow_core::Error::Configuration(_)));

        let core: voxflow_core::Error =
            PipelineError::Fatal(ErrorFrame::fatal("boom").with_processor("tts")).into();
        assert_eq!(core, voxflow_core::Error::processor("tts", "boom"));

        let core: voxflow_core::Error = PipelineError::TaskFinished.into();
        assert_eq!(core, voxflow_core::Error::ChannelClosed);
    }
}
