//! Frame processors for the pipeline
//!
//! This module contains FrameProcessor implementations for:
//! - SentenceAggregator: Buffers streamed text and emits whole sentences
//! - InterruptionHandler: Turns user speech into interruptions while the bot speaks
//! - AudioBufferProcessor: Records user and bot audio
//! - Passthrough/Filter/Map: Small helpers for composing chains

mod audio_buffer;
mod chain;
mod interruption;
mod sentence_aggregator;

pub use audio_buffer::{AudioBufferConfig, AudioBufferEvent, AudioBufferProcessor, RecordingControl};
pub use chain::{FilterProcessor, MapProcessor, PassthroughProcessor};
pub use interruption::{InterruptionConfig, InterruptionHandler};
pub use sentence_aggregator::SentenceAggregator;
