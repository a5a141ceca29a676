//! Core traits of the pipeline
//!
//! ```text
//! Pipeline:
//!   - FrameProcessor: a stage receiving and pushing frames
//!
//! Speech services (wrapped by processors):
//!   - SpeechToText: Audio → Transcription frames
//!   - TextToSpeech: Text → Audio frames
//! ```

mod processor;
mod speech;

pub use processor::{unique_name, FrameProcessor, InterruptionWatch, ProcessorContext};
pub use speech::{FrameStream, SpeechToText, TextToSpeech};
