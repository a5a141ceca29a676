//! Conversation audio recorder
//!
//! Buffers user (input) and bot (output) audio at a common sample rate and
//! hands the merged recording to registered handlers: mixed down to mono,
//! or interleaved as stereo with the user on the left and the bot on the
//! right. Handlers run whenever the user buffer exceeds `buffer_size`, and
//! when recording stops (explicitly, on End or on Cancel).

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use voxflow_config::constants::audio::SILENCE_GAP_MS;
use voxflow_core::{
    audio, unique_name, AudioOrigin, AudioRawFrame, EventHandlers, Frame, FrameDirection,
    FrameKind, FrameProcessor, ProcessorContext, Result, StreamResampler,
};

/// Audio buffer configuration
#[derive(Debug, Clone)]
pub struct AudioBufferConfig {
    /// Recording sample rate; the run's output rate when unset
    pub sample_rate: Option<u32>,
    /// 1 mixes user and bot, 2 interleaves them
    pub num_channels: u16,
    /// User buffer size in bytes that triggers an `AudioData` event; 0 waits for stop
    pub buffer_size: usize,
    /// User audio arrives as a continuous stream rather than speech-only chunks
    pub user_continuous_stream: bool,
    /// Begin recording as soon as the run starts
    pub record_on_start: bool,
}

impl Default for AudioBufferConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            num_channels: 1,
            buffer_size: 0,
            user_continuous_stream: true,
            record_on_start: true,
        }
    }
}

/// Events emitted by [`AudioBufferProcessor`]
#[derive(Debug, Clone, PartialEq)]
pub enum AudioBufferEvent {
    /// Merged PCM16 recording
    AudioData {
        audio: Vec<u8>,
        sample_rate: u32,
        num_channels: u16,
    },
}

/// Toggles recording of a processor already moved into a pipeline
///
/// Changes take effect when the next frame reaches the processor.
#[derive(Debug, Clone)]
pub struct RecordingControl {
    wanted: Arc<AtomicBool>,
}

impl RecordingControl {
    pub fn start(&self) {
        self.wanted.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.wanted.store(false, Ordering::SeqCst);
    }
}

pub struct AudioBufferProcessor {
    name: String,
    config: AudioBufferConfig,
    sample_rate: u32,
    user_buffer: Vec<u8>,
    bot_buffer: Vec<u8>,
    user_resampler: Option<StreamResampler>,
    bot_resampler: Option<StreamResampler>,
    last_user_frame_at: Option<Instant>,
    last_bot_frame_at: Option<Instant>,
    recording: bool,
    wanted: Arc<AtomicBool>,
    handlers: EventHandlers<AudioBufferEvent>,
}

impl AudioBufferProcessor {
    pub fn new(config: AudioBufferConfig) -> Self {
        Self::named(unique_name("AudioBufferProcessor"), config)
    }

    pub fn named(name: impl Into<String>, config: AudioBufferConfig) -> Self {
        let wanted = Arc::new(AtomicBool::new(config.record_on_start));
        Self {
            name: name.into(),
            sample_rate: config.sample_rate.unwrap_or(0),
            config,
            user_buffer: Vec::new(),
            bot_buffer: Vec::new(),
            user_resampler: None,
            bot_resampler: None,
            last_user_frame_at: None,
            last_bot_frame_at: None,
            recording: false,
            wanted,
            handlers: EventHandlers::new(),
        }
    }

    /// Register an event handler
    pub fn on_event<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AudioBufferEvent) + Send + Sync + 'static,
    {
        self.handlers.register(handler);
        self
    }

    pub fn recording_control(&self) -> RecordingControl {
        RecordingControl {
            wanted: Arc::clone(&self.wanted),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> u16 {
        self.config.num_channels
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Both sides have buffered audio
    pub fn has_audio(&self) -> bool {
        !self.user_buffer.is_empty() && !self.bot_buffer.is_empty()
    }

    /// Current recording, mixed or interleaved per `num_channels`
    pub fn merge_audio_buffers(&self) -> Vec<u8> {
        match self.config.num_channels {
            1 => audio::mix_mono(&self.user_buffer, &self.bot_buffer),
            2 => audio::interleave_stereo(&self.user_buffer, &self.bot_buffer),
            _ => Vec::new(),
        }
    }

    pub fn start_recording(&mut self) {
        self.recording = true;
        self.wanted.store(true, Ordering::SeqCst);
        self.reset_recording();
    }

    /// Hand the pending recording to the handlers and stop
    pub fn stop_recording(&mut self) {
        if self.recording {
            self.flush_resampler(AudioOrigin::User);
            self.flush_resampler(AudioOrigin::Bot);
        }
        self.emit_audio_data();
        self.recording = false;
        self.wanted.store(false, Ordering::SeqCst);
    }

    fn sync_with_control(&mut self) {
        match (self.recording, self.wanted.load(Ordering::SeqCst)) {
            (false, true) => self.start_recording(),
            (true, false) => self.stop_recording(),
            _ => {}
        }
    }

    fn reset_recording(&mut self) {
        self.reset_buffers();
        self.user_resampler = None;
        self.bot_resampler = None;
        let now = Instant::now();
        self.last_user_frame_at = Some(now);
        self.last_bot_frame_at = Some(now);
    }

    fn reset_buffers(&mut self) {
        self.user_buffer.clear();
        self.bot_buffer.clear();
    }

    fn emit_audio_data(&mut self) {
        if !self.recording || !self.has_audio() {
            return;
        }

        let event = AudioBufferEvent::AudioData {
            audio: self.merge_audio_buffers(),
            sample_rate: self.sample_rate,
            num_channels: self.config.num_channels,
        };
        self.handlers.emit(&event);
        self.reset_buffers();
    }

    fn resampler_mut(&mut self, origin: AudioOrigin) -> &mut Option<StreamResampler> {
        match origin {
            AudioOrigin::User => &mut self.user_resampler,
            AudioOrigin::Bot => &mut self.bot_resampler,
        }
    }

    /// Resample through the stream's resampler, restarting it when the input rate changes
    fn resample(&mut self, frame: &AudioRawFrame) -> Vec<u8> {
        let origin = frame.origin();
        let from_rate = frame.sample_rate();
        let to_rate = self.sample_rate;

        let stale = self
            .resampler_mut(origin)
            .as_ref()
            .is_some_and(|r| r.from_rate() != from_rate || r.to_rate() != to_rate);
        if stale {
            self.flush_resampler(origin);
        }

        let mono = audio::to_mono(frame.audio(), frame.num_channels());
        let resampler = self
            .resampler_mut(origin)
            .get_or_insert_with(|| StreamResampler::new(from_rate, to_rate));
        audio::f32_to_pcm16(&resampler.push(&audio::pcm16_to_f32(&mono)))
    }

    /// Append the tail still held by a stream's resampler
    fn flush_resampler(&mut self, origin: AudioOrigin) {
        let Some(mut resampler) = self.resampler_mut(origin).take() else {
            return;
        };
        let tail = audio::f32_to_pcm16(&resampler.flush());
        if tail.is_empty() {
            return;
        }
        if self.config.user_continuous_stream {
            self.record_continuous(origin, tail);
        } else {
            match origin {
                AudioOrigin::User => self.user_buffer.extend_from_slice(&tail),
                AudioOrigin::Bot => self.bot_buffer.extend_from_slice(&tail),
            }
        }
    }

    fn record(&mut self, frame: &AudioRawFrame) {
        if self.sample_rate == 0 {
            tracing::warn!(processor = %self.name, "Audio before sample rate is known, skipping");
            return;
        }

        let resampled = self.resample(frame);
        if self.config.user_continuous_stream {
            self.record_continuous(frame.origin(), resampled);
        } else {
            self.record_intermittent(frame.origin(), resampled);
        }
    }

    fn record_continuous(&mut self, origin: AudioOrigin, resampled: Vec<u8>) {
        match origin {
            AudioOrigin::User => {
                self.user_buffer.extend_from_slice(&resampled);
                // Keep the bot track aligned with the user track
                if self.user_buffer.len() > self.bot_buffer.len() {
                    self.bot_buffer.resize(self.user_buffer.len(), 0);
                }
            }
            AudioOrigin::Bot => self.bot_buffer.extend_from_slice(&resampled),
        }
    }

    fn record_intermittent(&mut self, origin: AudioOrigin, resampled: Vec<u8>) {
        let now = Instant::now();
        let (buffer, last) = match origin {
            AudioOrigin::User => (&mut self.user_buffer, &mut self.last_user_frame_at),
            AudioOrigin::Bot => (&mut self.bot_buffer, &mut self.last_bot_frame_at),
        };

        if let Some(previous) = *last {
            let quiet = now.duration_since(previous);
            if quiet >= Duration::from_millis(SILENCE_GAP_MS) {
                buffer.extend(audio::silence_for(quiet, self.sample_rate));
            }
        }
        buffer.extend_from_slice(&resampled);
        *last = Some(now);
    }
}

impl Default for AudioBufferProcessor {
    fn default() -> Self {
        Self::new(AudioBufferConfig::default())
    }
}

#[async_trait]
impl FrameProcessor for AudioBufferProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Records user and bot audio"
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        self.sync_with_control();

        if self.recording {
            if let FrameKind::AudioRaw(audio) = frame.kind() {
                self.record(audio);
            }
        }

        if self.config.buffer_size > 0 && self.user_buffer.len() > self.config.buffer_size {
            self.emit_audio_data();
        }

        ctx.push_frame(frame, direction);
        Ok(())
    }

    async fn on_start(&mut self, ctx: &mut ProcessorContext) -> Result<()> {
        self.sample_rate = self
            .config
            .sample_rate
            .unwrap_or(ctx.params().audio_out_sample_rate);
        self.sync_with_control();
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.stop_recording();
        Ok(())
    }

    async fn on_cancel(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.stop_recording();
        Ok(())
    }
}
