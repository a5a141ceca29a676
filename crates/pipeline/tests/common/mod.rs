//! Shared helpers for pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use voxflow_core::{Frame, FrameDirection, FrameKind, FrameProcessor, ProcessorContext, Result};
use voxflow_pipeline::{PipelineError, PipelineTask, TaskOutcome};

/// What a [`Recorder`] saw (payload copies of the downstream frames)
#[derive(Clone, Default)]
pub struct Recording {
    pub frames: Arc<Mutex<Vec<Frame>>>,
    pub hooks: Arc<Mutex<Vec<&'static str>>>,
}

impl Recording {
    pub fn names(&self) -> Vec<&'static str> {
        self.frames.lock().iter().map(|f| f.name()).collect()
    }

    pub fn texts(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| f.as_text().map(str::to_string))
            .collect()
    }

    pub fn hooks(&self) -> Vec<&'static str> {
        self.hooks.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.frames.lock().iter().filter(|f| f.name() == name).count()
    }
}

/// Records downstream frames and lifecycle hooks, forwards everything
pub struct Recorder {
    name: String,
    recording: Recording,
}

impl Recorder {
    pub fn new(name: &str) -> (Self, Recording) {
        let recording = Recording::default();
        (
            Self {
                name: name.to_string(),
                recording: recording.clone(),
            },
            recording,
        )
    }
}

#[async_trait]
impl FrameProcessor for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        if direction == FrameDirection::Downstream {
            // Frames move by value; keep a copy of the payload under a fresh id
            self.recording.frames.lock().push(Frame::new(frame.kind().clone()));
        }
        ctx.push_frame(frame, direction);
        Ok(())
    }

    async fn on_start(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.recording.hooks.lock().push("start");
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.recording.hooks.lock().push("stop");
        Ok(())
    }

    async fn on_cancel(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.recording.hooks.lock().push("cancel");
        Ok(())
    }

    async fn on_interrupt(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        self.recording.hooks.lock().push("interrupt");
        Ok(())
    }
}

/// Sleeps on every Text frame before forwarding it
pub struct Slow {
    pub delay: Duration,
}

#[async_trait]
impl FrameProcessor for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        if matches!(frame.kind(), FrameKind::Text(_)) {
            tokio::time::sleep(self.delay).await;
        }
        ctx.push_frame(frame, direction);
        Ok(())
    }
}

/// Run a task with a generous upper bound
pub async fn run_bounded(task: &mut PipelineTask) -> std::result::Result<TaskOutcome, PipelineError> {
    tokio::time::timeout(Duration::from_secs(5), task.run())
        .await
        .expect("task did not finish")
}
