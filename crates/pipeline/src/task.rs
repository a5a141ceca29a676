//! Pipeline task
//!
//! A [`PipelineTask`] owns one pipeline run: it pushes Start, feeds queued
//! frames into the pipeline input, watches what reaches the boundaries and
//! finishes once End or Cancel has travelled through every processor.
//!
//! State machine:
//! - Created -> Running when `run()` pushes Start
//! - Created/Running -> Cancelling on `cancel()` or a fatal Error frame
//! - Running -> Finished when End reaches the output boundary
//! - Cancelling -> Finished when Cancel reaches the output boundary
//!   (or when End got there first; the run still reports `cancelled`)

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use voxflow_config::PipelineParams;
use voxflow_core::{
    frame_channel, Envelope, ErrorFrame, Frame, FrameDirection, FrameKind, FrameObserver,
    FrameSender, Observers,
};

use crate::{Pipeline, PipelineError};

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Created,
    Running,
    Cancelling,
    Finished,
}

impl TaskState {
    /// Queued frames are still accepted
    pub fn is_accepting(&self) -> bool {
        matches!(self, TaskState::Created | TaskState::Running)
    }
}

/// Task events for subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// State transition
    StateChanged(TaskState),
    /// Error frame reached the task boundary
    Error(ErrorFrame),
    /// Run completed
    Finished { cancelled: bool },
}

/// Result of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub state: TaskState,
    /// The run ended through Cancel rather than End
    pub cancelled: bool,
    /// Last non-fatal error seen at the boundary
    pub error: Option<ErrorFrame>,
}

struct TaskShared {
    id: Uuid,
    state: RwLock<TaskState>,
    queue_tx: mpsc::UnboundedSender<Frame>,
    cancel: CancellationToken,
    events: broadcast::Sender<TaskEvent>,
    /// Last processor's inbox while running
    output: Mutex<Option<FrameSender>>,
}

impl TaskShared {
    fn state(&self) -> TaskState {
        *self.state.read()
    }

    fn transition(&self, to: TaskState) -> bool {
        let mut state = self.state.write();
        if *state == to || *state == TaskState::Finished {
            return false;
        }
        tracing::debug!(task = %self.id, from = ?*state, to = ?to, "Task state changed");
        *state = to;
        drop(state);

        self.emit(TaskEvent::StateChanged(to));
        true
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Cloneable control handle for a task
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Queue one frame for the pipeline input
    pub fn queue_frame(&self, frame: Frame) -> Result<(), PipelineError> {
        if !self.state().is_accepting() {
            return Err(PipelineError::TaskFinished);
        }
        self.shared
            .queue_tx
            .send(frame)
            .map_err(|_| PipelineError::TaskFinished)
    }

    /// Queue frames in order
    pub fn queue_frames<I>(&self, frames: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = Frame>,
    {
        frames.into_iter().try_for_each(|frame| self.queue_frame(frame))
    }

    /// Cancel the run
    ///
    /// Cancel overtakes anything still queued; no queued frame is dispatched
    /// once this returns.
    pub fn cancel(&self) {
        let mut state = self.shared.state.write();
        if !state.is_accepting() {
            return;
        }
        tracing::info!(task = %self.shared.id, "Cancelling task");
        *state = TaskState::Cancelling;
        drop(state);

        self.shared.emit(TaskEvent::StateChanged(TaskState::Cancelling));
        self.shared.cancel.cancel();
    }

    /// Push a frame upstream into the pipeline output, e.g. an interruption
    /// raised by a transport
    pub fn push_upstream(&self, frame: Frame) -> Result<(), PipelineError> {
        // Lock order: state, then output
        let state = self.shared.state.read();
        if *state != TaskState::Running {
            return Err(PipelineError::TaskFinished);
        }
        let output = self.shared.output.lock();
        match output.as_ref() {
            Some(output) => output
                .send(frame, FrameDirection::Upstream)
                .map_err(|_| PipelineError::TaskFinished),
            None => Err(PipelineError::TaskFinished),
        }
    }

    /// Subscribe to task events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

/// One run of a pipeline
pub struct PipelineTask {
    pipeline: Option<Pipeline>,
    params: PipelineParams,
    observers: Vec<Arc<dyn FrameObserver>>,
    queue_rx: Option<mpsc::UnboundedReceiver<Frame>>,
    shared: Arc<TaskShared>,
}

impl PipelineTask {
    pub fn new(pipeline: Pipeline, params: PipelineParams) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        Self {
            pipeline: Some(pipeline),
            params,
            observers: Vec::new(),
            queue_rx: Some(queue_rx),
            shared: Arc::new(TaskShared {
                id: Uuid::new_v4(),
                state: RwLock::new(TaskState::Created),
                queue_tx,
                cancel: CancellationToken::new(),
                events,
                output: Mutex::new(None),
            }),
        }
    }

    /// Add a frame observer (builder pattern)
    pub fn observer(mut self, observer: Arc<dyn FrameObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.shared.events.subscribe()
    }

    pub fn queue_frame(&self, frame: Frame) -> Result<(), PipelineError> {
        self.handle().queue_frame(frame)
    }

    pub fn queue_frames<I>(&self, frames: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = Frame>,
    {
        self.handle().queue_frames(frames)
    }

    pub fn cancel(&self) {
        self.handle().cancel()
    }

    /// Run the pipeline to completion
    ///
    /// Returns once End or Cancel has passed through every processor.
    /// A fatal error cancels the run and is returned as `PipelineError::Fatal`.
    pub async fn run(&mut self) -> Result<TaskOutcome, PipelineError> {
        let (Some(pipeline), Some(mut queue_rx)) = (self.pipeline.take(), self.queue_rx.take())
        else {
            return Err(PipelineError::AlreadyStarted);
        };

        let shared = Arc::clone(&self.shared);
        let task_id = shared.id;
        tracing::info!(task = %task_id, pipeline = %pipeline.name(), "Pipeline task starting");

        let (sink_tx, mut sink) = frame_channel("PipelineTask::sink");
        let observers: Observers = Arc::from(self.observers.clone());
        let running = pipeline.spawn(sink_tx.clone(), sink_tx, shared.cancel.clone(), observers);
        let input = running.input;

        let abort_handles: Vec<AbortHandle> =
            running.handles.iter().map(|h| h.abort_handle()).collect();
        let mut handles: FuturesUnordered<_> = running.handles.into_iter().collect();

        {
            // Serialized with cancel(): either cancel() saw Created and the
            // token is already set, or it will see Running.
            // Lock order: state, then output
            let mut state = shared.state.write();
            *shared.output.lock() = Some(running.output);
            let _ = input.send(Frame::start(self.params.start_params()), FrameDirection::Downstream);
            if *state == TaskState::Created {
                *state = TaskState::Running;
                drop(state);
                shared.emit(TaskEvent::StateChanged(TaskState::Running));
            }
        }

        let token = shared.cancel.clone();
        let mut accepting = true;
        let mut cancel_pushed = false;
        let mut outcome = TaskOutcome {
            state: TaskState::Running,
            cancelled: false,
            error: None,
        };
        let mut fatal: Option<ErrorFrame> = None;
        let mut join_error: Option<String> = None;

        loop {
            tokio::select! {
                biased;

                envelope = sink.recv() => {
                    let Some(Envelope { frame, direction }) = envelope else {
                        tracing::debug!(task = %task_id, "All processors stopped");
                        outcome.cancelled = shared.state() == TaskState::Cancelling;
                        break;
                    };

                    match (frame.kind(), direction) {
                        (FrameKind::End, FrameDirection::Downstream) => {
                            tracing::debug!(task = %task_id, "End reached the pipeline output");
                            break;
                        }
                        (FrameKind::Cancel, FrameDirection::Downstream) => {
                            tracing::debug!(task = %task_id, "Cancel reached the pipeline output");
                            outcome.cancelled = true;
                            break;
                        }
                        (FrameKind::Error(error), _) if error.fatal => {
                            tracing::error!(task = %task_id, error = %error, "Fatal error, cancelling task");
                            shared.emit(TaskEvent::Error(error.clone()));
                            if fatal.is_none() {
                                fatal = Some(error.clone());
                            }
                            self.handle().cancel();
                        }
                        (FrameKind::Error(error), _) => {
                            tracing::warn!(task = %task_id, error = %error, "Pipeline error");
                            shared.emit(TaskEvent::Error(error.clone()));
                            outcome.error = Some(error.clone());
                        }
                        (FrameKind::Cancel, FrameDirection::Upstream) => {
                            tracing::debug!(task = %task_id, "Cancel requested from inside the pipeline");
                            self.handle().cancel();
                        }
                        (FrameKind::End, FrameDirection::Upstream) => {
                            // Behind anything already queued
                            if accepting {
                                let _ = shared.queue_tx.send(Frame::end());
                            }
                        }
                        _ => {
                            tracing::trace!(task = %task_id, frame = %frame, %direction, "Frame left the pipeline");
                        }
                    }
                }

                _ = token.cancelled(), if !cancel_pushed => {
                    cancel_pushed = true;
                    accepting = false;
                    let _ = input.send(Frame::cancel(), FrameDirection::Downstream);
                }

                queued = queue_rx.recv(), if accepting => {
                    let Some(frame) = queued else {
                        accepting = false;
                        continue;
                    };

                    if frame.is_cancel() {
                        self.handle().cancel();
                        continue;
                    }

                    // Held across the send so cancel() cannot slip in between
                    let state = shared.state.read();
                    if *state != TaskState::Running {
                        accepting = false;
                        continue;
                    }
                    let is_end = frame.is_end();
                    let _ = input.send(frame, FrameDirection::Downstream);
                    drop(state);

                    if is_end {
                        tracing::debug!(task = %task_id, "End queued, closing input");
                        accepting = false;
                    }
                }

                Some(joined) = handles.next(), if !handles.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(task = %task_id, error = %e, "Processor task failed");
                        join_error = Some(e.to_string());
                        for handle in &abort_handles {
                            handle.abort();
                        }
                        self.handle().cancel();
                        break;
                    }
                }
            }
        }

        // Terminal frame seen: remaining processors are exiting
        while let Some(joined) = handles.next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() && join_error.is_none() {
                    join_error = Some(e.to_string());
                }
            }
        }

        // A cancel that raced a graceful End still ends the run as cancelled
        if shared.state() == TaskState::Cancelling {
            outcome.cancelled = true;
        }

        shared.output.lock().take();
        shared.transition(TaskState::Finished);
        shared.emit(TaskEvent::Finished {
            cancelled: outcome.cancelled,
        });
        outcome.state = TaskState::Finished;

        tracing::info!(task = %task_id, cancelled = outcome.cancelled, "Pipeline task finished");

        if let Some(message) = join_error {
            return Err(PipelineError::Join(message));
        }
        if let Some(error) = fatal {
            return Err(PipelineError::Fatal(error));
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for PipelineTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineTask")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("params", &self.params)
            .finish()
    }
}
