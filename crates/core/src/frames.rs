//! Frame types that flow through the pipeline
//!
//! A [`Frame`] is an immutable message with a process-unique, strictly
//! increasing [`FrameId`] and a UTC creation timestamp. The payload is the
//! closed [`FrameKind`] enum so every processor dispatches with an
//! exhaustive `match`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::MetricsFrame;
use crate::{Error, Result};

/// Single atomic increment per frame, monotonic across threads
static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Unique frame identifier, strictly increasing in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(u64);

impl FrameId {
    fn next() -> Self {
        FrameId(NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction a frame travels along the processor chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameDirection {
    /// Source to sink
    #[default]
    Downstream,
    /// Sink to source
    Upstream,
}

impl FrameDirection {
    pub fn reverse(self) -> Self {
        match self {
            FrameDirection::Downstream => FrameDirection::Upstream,
            FrameDirection::Upstream => FrameDirection::Downstream,
        }
    }
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Downstream => f.write_str("downstream"),
            FrameDirection::Upstream => f.write_str("upstream"),
        }
    }
}

/// Current time as ISO-8601 UTC with millisecond resolution
pub fn time_now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parameters carried by the Start frame to every processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartParams {
    /// New user speech may cut in-flight bot output
    pub allow_interruptions: bool,
    /// Processors report TTFB and processing metrics
    pub enable_metrics: bool,
    /// Processors report LLM/TTS usage metrics
    pub enable_usage_metrics: bool,
    /// Only the first TTFB of each turn is reported
    pub report_only_initial_ttfb: bool,
    /// Sample rate of user audio entering the pipeline
    pub audio_in_sample_rate: u32,
    /// Sample rate of bot audio leaving the pipeline
    pub audio_out_sample_rate: u32,
}

impl Default for StartParams {
    fn default() -> Self {
        Self {
            allow_interruptions: false,
            enable_metrics: false,
            enable_usage_metrics: false,
            report_only_initial_ttfb: false,
            audio_in_sample_rate: 16000,
            audio_out_sample_rate: 24000,
        }
    }
}

/// Error payload, normally pushed upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub message: String,
    /// A fatal error cancels the owning task
    pub fatal: bool,
    /// Processor that raised the error, if known
    pub processor: Option<String>,
}

impl ErrorFrame {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
            processor: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            ..Self::new(message)
        }
    }

    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = Some(processor.into());
        self
    }
}

impl fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.processor {
            Some(p) => write!(f, "{}: {}", p, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// BCP-47 style language tag ("en", "en-US", "zh-Hans")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguageTag(String);

impl LanguageTag {
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        let valid = !tag.is_empty()
            && tag.split('-').all(|part| {
                !part.is_empty() && part.len() <= 8 && part.chars().all(|c| c.is_ascii_alphanumeric())
            });
        if valid {
            Ok(Self(tag))
        } else {
            Err(Error::InvalidFrame(format!("invalid language tag '{}'", tag)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LanguageTag {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<LanguageTag> for String {
    fn from(tag: LanguageTag) -> Self {
        tag.0
    }
}

impl fmt::Display for LanguageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Speech recognition result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionFrame {
    pub text: String,
    pub speaker_id: String,
    /// ISO-8601 UTC
    pub timestamp: String,
    pub language: Option<LanguageTag>,
}

impl TranscriptionFrame {
    /// Create a transcription stamped with the current time
    pub fn new(
        text: impl Into<String>,
        speaker_id: impl Into<String>,
        language: Option<LanguageTag>,
    ) -> Self {
        Self {
            text: text.into(),
            speaker_id: speaker_id.into(),
            timestamp: time_now_iso8601(),
            language,
        }
    }
}

/// Which side of the conversation produced the audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioOrigin {
    /// Captured from the user (input)
    User,
    /// Synthesized for the bot (output)
    Bot,
}

/// Raw PCM16 little-endian audio
#[derive(Clone, PartialEq, Eq)]
pub struct AudioRawFrame {
    audio: Arc<[u8]>,
    sample_rate: u32,
    num_channels: u16,
    origin: AudioOrigin,
}

impl AudioRawFrame {
    /// Validate and wrap PCM16 bytes
    pub fn new(
        audio: impl Into<Arc<[u8]>>,
        sample_rate: u32,
        num_channels: u16,
        origin: AudioOrigin,
    ) -> Result<Self> {
        let audio = audio.into();
        if sample_rate == 0 {
            return Err(Error::InvalidFrame("audio sample rate must be non-zero".into()));
        }
        if num_channels == 0 {
            return Err(Error::InvalidFrame("audio channel count must be non-zero".into()));
        }
        let frame_bytes = 2 * num_channels as usize;
        if audio.len() % frame_bytes != 0 {
            return Err(Error::InvalidFrame(format!(
                "audio length {} is not a multiple of {} bytes ({} channel PCM16)",
                audio.len(),
                frame_bytes,
                num_channels
            )));
        }
        Ok(Self {
            audio,
            sample_rate,
            num_channels,
            origin,
        })
    }

    pub fn audio(&self) -> &[u8] {
        &self.audio
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    pub fn origin(&self) -> AudioOrigin {
        self.origin
    }

    /// Number of sample frames (samples per channel)
    pub fn num_frames(&self) -> usize {
        self.audio.len() / (2 * self.num_channels as usize)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.num_frames() as f64 / self.sample_rate as f64)
    }
}

impl fmt::Debug for AudioRawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioRawFrame")
            .field("bytes", &self.audio.len())
            .field("sample_rate", &self.sample_rate)
            .field("num_channels", &self.num_channels)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Raw pixel layouts accepted by [`ImageRawFrame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Rgb,
    Rgba,
    Bgr,
    Bgra,
    /// 8-bit grayscale
    Luma,
}

impl ImageFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ImageFormat::Rgb | ImageFormat::Bgr => 3,
            ImageFormat::Rgba | ImageFormat::Bgra => 4,
            ImageFormat::Luma => 1,
        }
    }

    /// Byte size of a `width`×`height` image, `None` on overflow
    pub fn expected_len(&self, width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(self.bytes_per_pixel())
    }
}

/// Raw image
#[derive(Clone, PartialEq, Eq)]
pub struct ImageRawFrame {
    image: Arc<[u8]>,
    width: u32,
    height: u32,
    format: ImageFormat,
}

impl ImageRawFrame {
    /// Validate that the byte length matches width×height×format
    pub fn new(
        image: impl Into<Arc<[u8]>>,
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> Result<Self> {
        let image = image.into();
        if width == 0 || height == 0 {
            return Err(Error::InvalidFrame(format!(
                "image dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let expected = format.expected_len(width, height).ok_or_else(|| {
            Error::InvalidFrame(format!("image {}x{} is too large", width, height))
        })?;
        if image.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "{:?} image {}x{} needs {} bytes, got {}",
                format,
                width,
                height,
                expected,
                image.len()
            )));
        }
        Ok(Self {
            image,
            width,
            height,
            format,
        })
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }
}

impl fmt::Debug for ImageRawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRawFrame")
            .field("bytes", &self.image.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

/// Frame payloads
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    // Lifecycle
    /// First frame of every run
    Start(StartParams),
    /// Graceful end: processors flush, then stop
    End,
    /// Immediate abort without flushing
    Cancel,
    /// Error report, normally travelling upstream
    Error(ErrorFrame),

    // Interruption control
    /// Discard in-flight bot output
    StartInterruption,
    /// User finished the interrupting utterance
    StopInterruption,

    // Speech state
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,

    // Content
    Text(String),
    Transcription(TranscriptionFrame),
    InterimTranscription(TranscriptionFrame),
    AudioRaw(AudioRawFrame),
    ImageRaw(ImageRawFrame),

    // Service markers
    TtsStarted,
    TtsStopped,
    LlmFullResponseStart,
    LlmFullResponseEnd,

    /// Metrics side channel
    Metrics(MetricsFrame),
}

/// Immutable message flowing through the pipeline
///
/// Frames are not `Clone`: ownership moves from processor to processor, so
/// exactly one processor holds a given frame at a time. Equality is by id.
#[derive(Debug)]
pub struct Frame {
    id: FrameId,
    created_at: DateTime<Utc>,
    kind: FrameKind,
}

impl Frame {
    /// Create a frame with a fresh id and timestamp
    pub fn new(kind: FrameKind) -> Self {
        Self {
            id: FrameId::next(),
            created_at: Utc::now(),
            kind,
        }
    }

    pub fn start(params: StartParams) -> Self {
        Self::new(FrameKind::Start(params))
    }

    pub fn end() -> Self {
        Self::new(FrameKind::End)
    }

    pub fn cancel() -> Self {
        Self::new(FrameKind::Cancel)
    }

    pub fn error(error: ErrorFrame) -> Self {
        Self::new(FrameKind::Error(error))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Text(text.into()))
    }

    pub fn transcription(transcription: TranscriptionFrame) -> Self {
        Self::new(FrameKind::Transcription(transcription))
    }

    pub fn interim_transcription(transcription: TranscriptionFrame) -> Self {
        Self::new(FrameKind::InterimTranscription(transcription))
    }

    pub fn audio(audio: AudioRawFrame) -> Self {
        Self::new(FrameKind::AudioRaw(audio))
    }

    pub fn image(image: ImageRawFrame) -> Self {
        Self::new(FrameKind::ImageRaw(image))
    }

    pub fn metrics(metrics: MetricsFrame) -> Self {
        Self::new(FrameKind::Metrics(metrics))
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    /// Take the payload; re-wrapping it produces a new frame identity
    pub fn into_kind(self) -> FrameKind {
        self.kind
    }

    /// Get the name for this frame type
    pub fn name(&self) -> &'static str {
        match &self.kind {
            FrameKind::Start(_) => "start",
            FrameKind::End => "end",
            FrameKind::Cancel => "cancel",
            FrameKind::Error(_) => "error",
            FrameKind::StartInterruption => "start_interruption",
            FrameKind::StopInterruption => "stop_interruption",
            FrameKind::UserStartedSpeaking => "user_started_speaking",
            FrameKind::UserStoppedSpeaking => "user_stopped_speaking",
            FrameKind::BotStartedSpeaking => "bot_started_speaking",
            FrameKind::BotStoppedSpeaking => "bot_stopped_speaking",
            FrameKind::Text(_) => "text",
            FrameKind::Transcription(_) => "transcription",
            FrameKind::InterimTranscription(_) => "interim_transcription",
            FrameKind::AudioRaw(_) => "audio_raw",
            FrameKind::ImageRaw(_) => "image_raw",
            FrameKind::TtsStarted => "tts_started",
            FrameKind::TtsStopped => "tts_stopped",
            FrameKind::LlmFullResponseStart => "llm_full_response_start",
            FrameKind::LlmFullResponseEnd => "llm_full_response_end",
            FrameKind::Metrics(_) => "metrics",
        }
    }

    /// Frames delivered on the priority lane, ahead of queued data
    pub fn is_system(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Start(_)
                | FrameKind::Cancel
                | FrameKind::Error(_)
                | FrameKind::StartInterruption
                | FrameKind::StopInterruption
        )
    }

    /// Content that an interruption discards while still queued
    pub fn is_interruptible(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Text(_)
                | FrameKind::Transcription(_)
                | FrameKind::InterimTranscription(_)
                | FrameKind::AudioRaw(_)
                | FrameKind::ImageRaw(_)
                | FrameKind::TtsStarted
                | FrameKind::TtsStopped
                | FrameKind::LlmFullResponseStart
                | FrameKind::LlmFullResponseEnd
        )
    }

    /// End and Cancel: the last frame a processor forwards
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, FrameKind::End | FrameKind::Cancel)
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, FrameKind::Start(_))
    }

    pub fn is_end(&self) -> bool {
        matches!(self.kind, FrameKind::End)
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self.kind, FrameKind::Cancel)
    }

    pub fn as_error(&self) -> Option<&ErrorFrame> {
        match &self.kind {
            FrameKind::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.kind {
            FrameKind::Text(t) => Some(t),
            _ => None,
        }
    }
}

impl From<FrameKind> for Frame {
    fn from(kind: FrameKind) -> Self {
        Frame::new(kind)
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Frame {}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ids_strictly_increase() {
        let frames: Vec<Frame> = (0..100).map(|i| Frame::text(i.to_string())).collect();
        for pair in frames.windows(2) {
            assert!(pair[0].id() < pair[1].id());
        }
    }

    #[test]
    fn test_frame_ids_unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| Frame::end().id()).collect::<Vec<_>>()))
            .collect();

        let mut ids: Vec<FrameId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_equality_is_by_id() {
        let a = Frame::text("same");
        let b = Frame::text("same");
        assert_ne!(a, b);
        assert_eq!(a, a);
    }

    #[test]
    fn test_frame_names_and_display() {
        let frame = Frame::end();
        assert_eq!(frame.name(), "end");
        assert_eq!(frame.to_string(), format!("end#{}", frame.id()));
        assert_eq!(Frame::text("hi").name(), "text");
    }

    #[test]
    fn test_frame_classification() {
        assert!(Frame::cancel().is_system());
        assert!(Frame::cancel().is_terminal());
        assert!(Frame::end().is_terminal());
        assert!(!Frame::end().is_system());
        assert!(Frame::text("x").is_interruptible());
        assert!(!Frame::new(FrameKind::UserStartedSpeaking).is_interruptible());
        assert!(Frame::error(ErrorFrame::new("oops")).as_error().is_some());
    }

    #[test]
    fn test_image_rejects_wrong_length() {
        let ok = ImageRawFrame::new(vec![0u8; 4 * 2 * 3], 4, 2, ImageFormat::Rgb);
        assert!(ok.is_ok());

        let short = ImageRawFrame::new(vec![0u8; 4 * 2 * 3 - 1], 4, 2, ImageFormat::Rgb);
        assert!(matches!(short, Err(Error::InvalidFrame(_))));

        let wrong_format = ImageRawFrame::new(vec![0u8; 4 * 2 * 3], 4, 2, ImageFormat::Rgba);
        assert!(wrong_format.is_err());

        let empty = ImageRawFrame::new(Vec::<u8>::new(), 0, 2, ImageFormat::Luma);
        assert!(empty.is_err());
    }

    #[test]
    fn test_audio_validation() {
        let mono = AudioRawFrame::new(vec![0u8; 320], 16000, 1, AudioOrigin::User).unwrap();
        assert_eq!(mono.num_frames(), 160);
        assert_eq!(mono.duration().as_millis(), 10);

        assert!(AudioRawFrame::new(vec![0u8; 6], 16000, 2, AudioOrigin::Bot).is_err());
        assert!(AudioRawFrame::new(vec![0u8; 4], 0, 1, AudioOrigin::Bot).is_err());
        assert!(AudioRawFrame::new(vec![0u8; 4], 16000, 0, AudioOrigin::Bot).is_err());
    }

    #[test]
    fn test_language_tag() {
        assert_eq!(LanguageTag::new("en-US").unwrap().as_str(), "en-US");
        assert!(LanguageTag::new("").is_err());
        assert!(LanguageTag::new("en_US").is_err());
        assert!(LanguageTag::new("en--US").is_err());
    }

    #[test]
    fn test_transcription_timestamp_is_utc_iso8601() {
        let t = TranscriptionFrame::new("hello", "user-1", None);
        assert!(t.timestamp.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&t.timestamp).is_ok());
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(FrameDirection::Downstream.reverse(), FrameDirection::Upstream);
        assert_eq!(FrameDirection::Upstream.reverse(), FrameDirection::Downstream);
    }
}
