//! Core types for the voxflow pipeline
//!
//! This crate provides the foundation shared by every other crate:
//! - Frame types and the two-lane channels they travel on
//! - The `FrameProcessor` contract and its runtime context
//! - Speech service traits
//! - Sentence boundary detection for streaming text
//! - PCM16 audio utilities
//! - Metrics and event types
//! - Error types

pub mod audio;
pub mod channel;
pub mod error;
pub mod events;
pub mod frames;
pub mod metrics;
pub mod sentence;
pub mod traits;

pub use channel::{frame_channel, Envelope, FrameReceiver, FrameSender, InterruptSignal};
pub use error::{Error, Result};
pub use events::{EventHandlers, FrameObserver, FramePushed, Observers};
pub use frames::{
    time_now_iso8601, AudioOrigin, AudioRawFrame, ErrorFrame, Frame, FrameDirection, FrameId,
    FrameKind, ImageFormat, ImageRawFrame, LanguageTag, StartParams, TranscriptionFrame,
};
pub use audio::StreamResampler;
pub use metrics::{MetricsData, MetricsFrame, ProcessorMetrics};
pub use sentence::{find_sentence_ends, match_end_of_sentence, split_sentences};

pub use traits::{
    unique_name, FrameProcessor, FrameStream, InterruptionWatch, ProcessorContext, SpeechToText,
    TextToSpeech,
};
