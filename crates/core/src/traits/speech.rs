//! Speech service contracts
//!
//! Vendor adapters implement these traits and are wrapped by the generic
//! STT/TTS processors in `voxflow-pipeline`, which own timeouts, metrics
//! and error conversion.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{AudioRawFrame, Frame, Result};

/// Lazy, finite, non-restartable sequence of frames produced for one request
///
/// The consumer pulls items; the producer is suspended until the previous
/// item has been taken.
pub type FrameStream<'a> = Pin<Box<dyn Stream<Item = Result<Frame>> + Send + 'a>>;

/// Speech-to-Text service
///
/// `run_stt` yields Transcription / InterimTranscription frames for the audio
/// it is given. Adapters holding a persistent connection open it in
/// `connect` and close it in `disconnect`.
#[async_trait]
pub trait SpeechToText: Send + Sync + 'static {
    /// Model name for logging and metrics
    fn model_name(&self) -> &str;

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_stt<'a>(&'a self, audio: &'a AudioRawFrame) -> FrameStream<'a>;
}

/// Text-to-Speech service
///
/// `run_tts` yields bot AudioRaw frames for one sentence of text.
#[async_trait]
pub trait TextToSpeech: Send + Sync + 'static {
    /// Model name for logging and metrics
    fn model_name(&self) -> &str;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_tts<'a>(&'a self, text: &'a str) -> FrameStream<'a>;
}
