//! Text-to-Speech processor
//!
//! Buffers Text frames until the buffer ends on a sentence boundary, then
//! synthesizes the sentence through a [`TextToSpeech`] adapter. Output for
//! one sentence is wrapped in TtsStarted/TtsStopped; BotStartedSpeaking and
//! BotStoppedSpeaking go upstream around the audio so interruption handling
//! knows when the bot is talking.

use async_trait::async_trait;
use futures::StreamExt;
use voxflow_config::ServiceConfig;
use voxflow_core::{
    sentence::match_end_of_sentence, unique_name, Error, Frame, FrameDirection, FrameKind,
    FrameProcessor, ProcessorContext, Result, TextToSpeech,
};

pub struct TtsProcessor<S: TextToSpeech> {
    name: String,
    service: S,
    config: ServiceConfig,
    aggregate_sentences: bool,
    buffer: String,
}

impl<S: TextToSpeech> TtsProcessor<S> {
    pub fn new(service: S, config: ServiceConfig) -> Self {
        Self::named(unique_name("TtsProcessor"), service, config)
    }

    pub fn named(name: impl Into<String>, service: S, config: ServiceConfig) -> Self {
        Self {
            name: name.into(),
            service,
            config,
            aggregate_sentences: true,
            buffer: String::new(),
        }
    }

    /// Synthesize every Text frame as it arrives (builder pattern)
    pub fn without_aggregation(mut self) -> Self {
        self.aggregate_sentences = false;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Text waiting for a sentence boundary
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    async fn flush(&mut self, ctx: &mut ProcessorContext) {
        let text = std::mem::take(&mut self.buffer);
        self.synthesize(&text, ctx).await;
    }

    async fn synthesize(&self, text: &str, ctx: &mut ProcessorContext) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let interruption = ctx.interruption();
        if interruption.is_raised() {
            tracing::debug!(processor = %self.name, text, "Interrupted before synthesis, dropping text");
            return;
        }

        tracing::debug!(processor = %self.name, model = self.service.model_name(), text, "Generating TTS");
        ctx.push_frame(Frame::new(FrameKind::TtsStarted), FrameDirection::Downstream);
        ctx.start_ttfb_metrics();

        let timeout = self.config.response_timeout();
        let token = ctx.cancellation_token().clone();
        let mut stream = self.service.run_tts(text);
        let mut speaking = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(processor = %self.name, "Cancelled during synthesis");
                    break;
                }
                _ = interruption.raised() => {
                    tracing::debug!(processor = %self.name, "Interrupted during synthesis, dropping remaining audio");
                    break;
                }
                next = tokio::time::timeout(timeout, stream.next()) => next,
            };

            match next {
                Ok(Some(Ok(frame))) => {
                    if let Some(error) = frame.as_error() {
                        tracing::warn!(processor = %self.name, error = %error, "TTS service reported an error");
                        ctx.push_frame(frame, FrameDirection::Upstream);
                        continue;
                    }
                    if !speaking {
                        ctx.stop_ttfb_metrics();
                        ctx.push_frame(Frame::new(FrameKind::BotStartedSpeaking), FrameDirection::Upstream);
                        speaking = true;
                    }
                    ctx.push_frame(frame, FrameDirection::Downstream);
                }
                Ok(Some(Err(e))) => {
                    tracing::error!(processor = %self.name, error = %e, "TTS failed");
                    ctx.push_error(format!("TTS failed: {}", e));
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::error!(processor = %self.name, ?timeout, "TTS response timed out");
                    ctx.push_error(Error::Timeout(timeout).to_string());
                    break;
                }
            }
        }
        drop(stream);

        ctx.tts_usage_metrics(text);
        if speaking {
            ctx.push_frame(Frame::new(FrameKind::BotStoppedSpeaking), FrameDirection::Upstream);
        }
        ctx.push_frame(Frame::new(FrameKind::TtsStopped), FrameDirection::Downstream);
    }
}

#[async_trait]
impl<S: TextToSpeech> FrameProcessor for TtsProcessor<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Synthesizes text into bot audio"
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
        if direction == FrameDirection::Upstream {
            ctx.push_frame(frame, direction);
            return Ok(());
        }

        match frame.kind() {
            FrameKind::Text(text) if self.aggregate_sentences => {
                self.buffer.push_str(text);
                if match_end_of_sentence(&self.buffer) > 0 {
                    self.flush(ctx).await;
                }
            }
            FrameKind::Text(text) => {
                self.synthesize(text, ctx).await;
            }
            FrameKind::LlmFullResponseEnd => {
                self.flush(ctx).await;
                ctx.push_frame(frame, direction);
            }
            FrameKind::UserStartedSpeaking => {
                // New turn
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

    async fn on_stop(&mut self, ctx: &mut ProcessorContext) -> Result<()> {
        self.flush(ctx).await;
        self.service.disconnect().await
    }

    async fn on_cancel(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.buffer.clear();
        self.service.disconnect().await
    }

    async fn on_interrupt(&mut self, ctx: &mut ProcessorContext) -> Result<()> {
        self.buffer.clear();
        ctx.metrics_mut().stop_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{drain, started_context};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use voxflow_core::{frame_channel, AudioOrigin, AudioRawFrame, FrameStream, StartParams};

    /// Yields one 10 ms chunk per word
    struct WordTts {
        connects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TextToSpeech for WordTts {
        fn model_name(&self) -> &str {
            "word-tts"
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        async fn connect(&mut self) -> Result<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn run_tts<'a>(&'a self, text: &'a str) -> FrameStream<'a> {
            Box::pin(async_stream::stream! {
                for _ in text.split_whitespace() {
                    yield AudioRawFrame::new(vec![0u8; 320], 16000, 1, AudioOrigin::Bot).map(Frame::audio);
                }
            })
        }
    }

    /// Streams `chunks` chunks, one every `every`
    struct PacedTts {
        chunks: usize,
        every: Duration,
    }

    #[async_trait]
    impl TextToSpeech for PacedTts {
        fn model_name(&self) -> &str {
            "paced"
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn run_tts<'a>(&'a self, _text: &'a str) -> FrameStream<'a> {
            Box::pin(async_stream::stream! {
                for _ in 0..self.chunks {
                    tokio::time::sleep(self.every).await;
                    yield AudioRawFrame::new(vec![0u8; 320], 16000, 1, AudioOrigin::Bot).map(Frame::audio);
                }
            })
        }
    }

    /// Never answers
    struct StalledTts;

    #[async_trait]
    impl TextToSpeech for StalledTts {
        fn model_name(&self) -> &str {
            "stalled"
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn run_tts<'a>(&'a self, _text: &'a str) -> FrameStream<'a> {
            Box::pin(futures::stream::pending::<Result<Frame>>())
        }
    }

    /// Fails after the first chunk
    struct FlakyTts;

    #[async_trait]
    impl TextToSpeech for FlakyTts {
        fn model_name(&self) -> &str {
            "flaky"
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn run_tts<'a>(&'a self, _text: &'a str) -> FrameStream<'a> {
            Box::pin(async_stream::stream! {
                yield AudioRawFrame::new(vec![0u8; 4], 16000, 1, AudioOrigin::Bot).map(Frame::audio);
                yield Err(Error::Connection("socket closed".into()));
            })
        }
    }

    fn word_tts() -> (WordTts, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        (
            WordTts {
                connects: Arc::clone(&connects),
            },
            connects,
        )
    }

    fn names(frames: &[Frame]) -> Vec<&'static str> {
        frames.iter().map(|f| f.name()).collect()
    }

    #[tokio::test]
    async fn test_synthesizes_complete_sentence() {
        let (service, connects) = word_tts();
        let mut tts = TtsProcessor::new(service, ServiceConfig::default());
        let (mut ctx, mut down, mut up) = started_context("tts", StartParams::default(), true);
        tts.on_start(&mut ctx).await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        tts.process_frame(Frame::text("Hello"), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();
        assert!(drain(&mut down).is_empty());
        assert_eq!(tts.pending(), "Hello");

        tts.process_frame(Frame::text(" big world."), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();
        assert!(tts.pending().is_empty());

        assert_eq!(
            names(&drain(&mut down)),
            vec!["tts_started", "audio_raw", "audio_raw", "audio_raw", "tts_stopped"]
        );
        assert_eq!(
            names(&drain(&mut up)),
            vec!["bot_started_speaking", "bot_stopped_speaking"]
        );
    }

    #[tokio::test]
    async fn test_metrics_when_enabled() {
        let (service, _) = word_tts();
        let mut tts = TtsProcessor::new(service, ServiceConfig::default()).without_aggregation();
        let params = StartParams {
            enable_metrics: true,
            enable_usage_metrics: true,
            ..StartParams::default()
        };
        let (mut ctx, mut down, _up) = started_context("tts", params, true);
        tts.on_start(&mut ctx).await.unwrap();

        tts.process_frame(Frame::text("one"), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();

        let frames = drain(&mut down);
        assert_eq!(
            names(&frames),
            vec!["tts_started", "metrics", "audio_raw", "metrics", "tts_stopped"]
        );
        let FrameKind::Metrics(usage) = frames[3].kind() else {
            panic!("expected metrics");
        };
        assert!(matches!(
            &usage.data[0],
            voxflow_core::MetricsData::TtsUsage { characters: 3, model: Some(m), .. } if m == "word-tts"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_error_frame() {
        let config = ServiceConfig {
            response_timeout_ms: 200,
            ..ServiceConfig::default()
        };
        let mut tts = TtsProcessor::new(StalledTts, config).without_aggregation();
        let (mut ctx, mut down, mut up) = started_context("tts", StartParams::default(), true);

        tts.process_frame(Frame::text("anyone there?"), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();

        let errors = drain(&mut up);
        let error = errors[0].as_error().unwrap();
        assert!(!error.fatal);
        assert!(error.message.contains("Timed out"));
        assert_eq!(names(&drain(&mut down)), vec!["tts_started", "tts_stopped"]);
    }

    #[tokio::test]
    async fn test_service_error_keeps_markers_balanced() {
        let mut tts = TtsProcessor::new(FlakyTts, ServiceConfig::default()).without_aggregation();
        let (mut ctx, mut down, mut up) = started_context("tts", StartParams::default(), true);

        tts.process_frame(Frame::text("hi"), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();

        assert_eq!(names(&drain(&mut down)), vec!["tts_started", "audio_raw", "tts_stopped"]);
        // Error rides the priority lane ahead of the speaking markers
        assert_eq!(
            names(&drain(&mut up)),
            vec!["error", "bot_started_speaking", "bot_stopped_speaking"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_synthesis() {
        let (service, _) = word_tts();
        let mut tts = TtsProcessor::new(service, ServiceConfig::default()).without_aggregation();
        let (mut ctx, mut down, _up) = started_context("tts", StartParams::default(), true);
        ctx.cancellation_token().cancel();

        tts.process_frame(Frame::text("a b c"), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();

        assert_eq!(names(&drain(&mut down)), vec!["tts_started", "tts_stopped"]);
    }

    #[tokio::test]
    async fn test_response_end_flushes_partial_text() {
        let (service, _) = word_tts();
        let mut tts = TtsProcessor::new(service, ServiceConfig::default());
        let (mut ctx, mut down, _up) = started_context("tts", StartParams::default(), true);

        tts.process_frame(Frame::text("no terminator"), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();
        tts.process_frame(
            Frame::new(FrameKind::LlmFullResponseEnd),
            FrameDirection::Downstream,
            &mut ctx,
        )
        .await
        .unwrap();

        let frames = drain(&mut down);
        assert_eq!(frames.first().map(|f| f.name()), Some("tts_started"));
        assert_eq!(frames.last().map(|f| f.name()), Some("llm_full_response_end"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruption_stops_synthesis_in_progress() {
        let service = PacedTts {
            chunks: 20,
            every: Duration::from_millis(25),
        };
        let mut tts = TtsProcessor::new(service, ServiceConfig::default()).without_aggregation();
        let (inbox_tx, inbox_rx) = frame_channel("tts");
        let (ctx, mut down, mut up) = started_context("tts", StartParams::default(), true);
        let mut ctx = ctx.with_interrupt_signal(inbox_rx.interrupt_signal());

        let barge_in = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(110)).await;
            inbox_tx
                .send(Frame::new(FrameKind::StartInterruption), FrameDirection::Downstream)
                .unwrap();
            inbox_tx
        });

        tts.process_frame(Frame::text("a long answer"), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();
        barge_in.await.unwrap();

        let frames = drain(&mut down);
        let audio = frames.iter().filter(|f| f.name() == "audio_raw").count();
        assert_eq!(audio, 4);
        assert_eq!(frames.last().map(|f| f.name()), Some("tts_stopped"));
        assert_eq!(
            names(&drain(&mut up)),
            vec!["bot_started_speaking", "bot_stopped_speaking"]
        );

        // Text arriving before the runtime handled the interruption is dropped
        tts.process_frame(Frame::text("stale"), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();
        assert!(drain(&mut down).is_empty());

        ctx.interruption_handled();
        tts.process_frame(Frame::text("fresh"), FrameDirection::Downstream, &mut ctx)
            .await
            .unwrap();
        assert_eq!(
            drain(&mut down).iter().filter(|f| f.name() == "audio_raw").count(),
            20
        );
    }
}
