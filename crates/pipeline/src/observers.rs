//! Frame observers

use voxflow_core::{FrameKind, FrameObserver, FramePushed};

/// Logs every frame push between processors
///
/// Audio and metrics frames are logged at trace level, everything else at
/// debug, so raw audio does not flood the default log output.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl LoggingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl FrameObserver for LoggingObserver {
    fn on_push_frame(&self, event: &FramePushed<'_>) {
        match event.frame.kind() {
            FrameKind::AudioRaw(_) | FrameKind::ImageRaw(_) | FrameKind::Metrics(_) => {
                tracing::trace!(
                    source = event.source,
                    destination = event.destination,
                    direction = %event.direction,
                    frame = %event.frame,
                    "Frame pushed"
                );
            }
            _ => {
                tracing::debug!(
                    source = event.source,
                    destination = event.destination,
                    direction = %event.direction,
                    frame = %event.frame,
                    "Frame pushed"
                );
            }
        }
    }
}
