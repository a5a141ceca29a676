//! Sentence aggregator for streaming LLM output
//!
//! Buffers Text frames and emits one Text frame per complete sentence, so
//! synthesis can start before the full response has arrived.

use async_trait::async_trait;
use voxflow_core::{
    sentence::split_sentences, unique_name, Frame, FrameDirection, FrameKind, FrameProcessor,
    ProcessorContext, Result,
};

pub struct SentenceAggregator {
    name: String,
    buffer: String,
    /// Sentences emitted since the last flush
    sentence_index: usize,
}

impl SentenceAggregator {
    pub fn new() -> Self {
        Self::named(unique_name("SentenceAggregator"))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buffer: String::new(),
            sentence_index: 0,
        }
    }

    /// Text waiting for a sentence boundary
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn push_sentences(&mut self, ctx: &ProcessorContext) {
        let (sentences, remainder) = split_sentences(&self.buffer);
        if sentences.is_empty() {
            return;
        }

        for sentence in sentences {
            tracing::trace!(processor = %self.name, index = self.sentence_index, sentence, "Sentence complete");
            ctx.push_frame(Frame::text(sentence), FrameDirection::Downstream);
            self.sentence_index += 1;
        }
        self.buffer = remainder.to_string();
    }

    /// Emit whatever is left, even without a terminator
    fn flush(&mut self, ctx: &ProcessorContext) {
        let remainder = self.buffer.trim();
        if !remainder.is_empty() {
            ctx.push_frame(Frame::text(remainder), FrameDirection::Downstream);
        }
        self.buffer.clear();
        self.sentence_index = 0;
    }
}

impl Default for SentenceAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameProcessor for SentenceAggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Aggregates streamed text into complete sentences"
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
            FrameKind::Text(text) => {
                self.buffer.push_str(text);
                self.push_sentences(ctx);
            }
            FrameKind::LlmFullResponseEnd => {
                self.flush(ctx);
                ctx.push_frame(frame, direction);
            }
            _ => ctx.push_frame(frame, direction),
        }
        Ok(())
    }

    async fn on_stop(&mut self, ctx: &mut ProcessorContext) -> Result<()> {
        self.flush(ctx);
        Ok(())
    }

    async fn on_cancel(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.buffer.clear();
        Ok(())
    }

    async fn on_interrupt(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        if !self.buffer.is_empty() {
            tracing::debug!(processor = %self.name, dropped = self.buffer.len(), "Interrupted, dropping partial sentence");
        }
        self.buffer.clear();
        self.sentence_index = 0;
        Ok(())
    }
}
