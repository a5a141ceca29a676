//! Service processors
//!
//! Generic processors that drive a speech service adapter:
//! - TtsProcessor: text in, synthesized bot audio out
//! - SttProcessor: user audio in, transcriptions out
//!
//! Both bound every wait on the service by `ServiceConfig::response_timeout`
//! and turn service failures into Error frames.

mod stt;
mod tts;

pub use stt::SttProcessor;
pub use tts::TtsProcessor;
