//! Console output processor

use async_trait::async_trait;
use std::io::Write;
use voxflow_core::{
    unique_name, Frame, FrameDirection, FrameKind, FrameProcessor, ProcessorContext, Result,
};

/// Prints each downstream Text frame on its own stdout line
pub struct ConsolePrinter {
    name: String,
    printed: usize,
}

impl ConsolePrinter {
    pub fn new() -> Self {
        Self {
            name: unique_name("ConsolePrinter"),
            printed: 0,
        }
    }
}

impl Default for ConsolePrinter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameProcessor for ConsolePrinter {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Prints sentences to stdout"
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        if let (FrameKind::Text(text), FrameDirection::Downstream) = (frame.kind(), direction) {
            self.printed += 1;
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "[{}] {}", self.printed, text)
                .map_err(|e| voxflow_core::Error::Connection(format!("stdout: {}", e)))?;
        }
        ctx.push_frame(frame, direction);
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        tracing::info!(sentences = self.printed, "Input finished");
        Ok(())
    }
}
