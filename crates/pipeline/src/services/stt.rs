//! Speech-to-Text processor
//!
//! Feeds user audio to a [`SpeechToText`] adapter and pushes the
//! transcription frames it yields downstream, followed by the audio itself
//! unless passthrough is disabled.

use async_trait::async_trait;
use futures::StreamExt;
use voxflow_config::ServiceConfig;
use voxflow_core::{
    unique_name, AudioOrigin, AudioRawFrame, Error, Frame, FrameDirection, FrameKind,
    FrameProcessor, ProcessorContext, Result, SpeechToText,
};

pub struct SttProcessor<S: SpeechToText> {
    name: String,
    service: S,
    config: ServiceConfig,
    audio_passthrough: bool,
}

impl<S: SpeechToText> SttProcessor<S> {
    pub fn new(service: S, config: ServiceConfig) -> Self {
        Self::named(unique_name("SttProcessor"), service, config)
    }

    pub fn named(name: impl Into<String>, service: S, config: ServiceConfig) -> Self {
        Self {
            name: name.into(),
            service,
            config,
            audio_passthrough: true,
        }
    }

    /// Stop forwarding user audio after transcription (builder pattern)
    pub fn without_audio_passthrough(mut self) -> Self {
        self.audio_passthrough = false;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    async fn transcribe(&self, audio: &AudioRawFrame, ctx: &mut ProcessorContext) {
        ctx.start_ttfb_metrics();
        ctx.start_processing_metrics();

        let timeout = self.config.response_timeout();
        let token = ctx.cancellation_token().clone();
        let mut stream = self.service.run_stt(audio);
        let mut first = true;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = tokio::time::timeout(timeout, stream.next()) => next,
            };

            match next {
                Ok(Some(Ok(frame))) => {
                    if first {
                        ctx.stop_ttfb_metrics();
                        first = false;
                    }
                    match frame.kind() {
                        FrameKind::Error(_) => ctx.push_frame(frame, FrameDirection::Upstream),
                        FrameKind::Transcription(t) => {
                            tracing::debug!(processor = %self.name, text = %t.text, "Transcription");
                            ctx.push_frame(frame, FrameDirection::Downstream);
                        }
                        _ => ctx.push_frame(frame, FrameDirection::Downstream),
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::error!(processor = %self.name, error = %e, "STT failed");
                    ctx.push_error(format!("STT failed: {}", e));
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::error!(processor = %self.name, ?timeout, "STT response timed out");
                    ctx.push_error(Error::Timeout(timeout).to_string());
                    break;
                }
            }
        }

        ctx.stop_processing_metrics();
    }
}

#[async_trait]
impl<S: SpeechToText> FrameProcessor for SttProcessor<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Transcribes user audio"
    }

    fn can_generate_metrics(&self) -> bool {
        true
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        match (frame.kind(), direction) {
            (FrameKind::AudioRaw(audio), FrameDirection::Downstream)
                if audio.origin() == AudioOrigin::User =>
            {
                self.transcribe(audio, ctx).await;
                if self.audio_passthrough {
                    ctx.push_frame(frame, direction);
                }
            }
            (FrameKind::UserStartedSpeaking, FrameDirection::Downstream) => {
                ctx.metrics_mut().reset_turn();
                ctx.push_frame(frame, direction);
            }
            _ => ctx.push_frame(frame, direction),
        }
        Ok(())
    }

    async fn on_start(&mut self, ctx: &mut ProcessorContext) -> Result<()> {
        ctx.metrics_mut()
            .set_model(Some(self.service.model_name().to_string()));
        self.service.connect().await
    }

    async fn on_stop(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.service.disconnect().await
    }

    async fn on_cancel(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.service.disconnect().await
    }
}
