//! Frame processor contract

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::channel::{FrameSender, InterruptSignal};
use crate::events::{FramePushed, Observers};
use crate::metrics::{MetricsData, MetricsFrame, ProcessorMetrics};
use crate::{ErrorFrame, Frame, FrameDirection, Result, StartParams};

static NEXT_PROCESSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Default processor name, unique within the process (`"SentenceAggregator#3"`)
pub fn unique_name(prefix: &str) -> String {
    format!("{}#{}", prefix, NEXT_PROCESSOR_ID.fetch_add(1, Ordering::Relaxed))
}

/// A stage of the pipeline
///
/// Each processor runs on its own task and owns its state exclusively. The
/// runtime handles lifecycle frames before and after calling the hooks
/// below, so a processor cannot stop Start, End, Cancel or Error from
/// reaching its neighbors:
///
/// - Start: `on_start`, then forwarded
/// - End: `on_stop` (flush pending output), then forwarded; nothing follows
/// - Cancel: `on_cancel`, then forwarded immediately; nothing follows
/// - StartInterruption: queued content is discarded, `on_interrupt`, then forwarded
/// - Error: forwarded in its direction
///
/// Everything else goes to [`FrameProcessor::process_frame`], which must push
/// what it wants to forward through the context. Returning an error from any
/// hook except `on_start` turns into an Error frame pushed upstream.
///
/// # Example
///
/// ```ignore
/// struct Shout;
///
/// #[async_trait]
/// impl FrameProcessor for Shout {
///     fn name(&self) -> &str { "shout" }
///
///     async fn process_frame(
///         &mut self,
///         frame: Frame,
///         direction: FrameDirection,
///         ctx: &mut ProcessorContext,
///     ) -> Result<()> {
///         match frame.kind() {
///             FrameKind::Text(t) => ctx.push_frame(Frame::text(t.to_uppercase()), direction),
///             _ => ctx.push_frame(frame, direction),
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait FrameProcessor: Send + 'static {
    /// Unique name within a pipeline, used for tracing and wiring checks
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Handle a non-lifecycle frame
    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()>;

    /// Setup before content frames are accepted (open connections, reset state)
    async fn on_start(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        Ok(())
    }

    /// Graceful stop: flush buffered output
    async fn on_stop(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        Ok(())
    }

    /// Abort: release resources without flushing or waiting on remote peers
    async fn on_cancel(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        Ok(())
    }

    /// Drop in-flight output for the current turn
    async fn on_interrupt(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
        Ok(())
    }

    /// Processors that talk to a remote service report TTFB and usage
    fn can_generate_metrics(&self) -> bool {
        false
    }
}

/// Snapshot of a processor's handled interruptions
#[derive(Debug, Clone)]
pub struct InterruptionWatch {
    signal: InterruptSignal,
    handled: u64,
}

impl InterruptionWatch {
    /// An interruption was queued that the runtime has not handled yet
    pub fn is_raised(&self) -> bool {
        self.signal.generation() > self.handled
    }

    /// Resolves once an unhandled interruption is queued
    pub async fn raised(&self) {
        self.signal.raised_since(self.handled).await
    }
}

/// Per-processor runtime handle passed to every hook
///
/// Holds the neighbor senders (fixed at wiring time), the StartParams of the
/// current run, metrics state and the cancellation token shared with the
/// owning task.
pub struct ProcessorContext {
    name: Arc<str>,
    downstream: Option<FrameSender>,
    upstream: Option<FrameSender>,
    /// Task boundary reached directly when the upstream neighbor has stopped
    boundary: Option<FrameSender>,
    params: StartParams,
    started: bool,
    metrics: ProcessorMetrics,
    metrics_enabled: bool,
    cancel: CancellationToken,
    observers: Observers,
    interrupts: InterruptSignal,
    interrupts_handled: u64,
}

impl ProcessorContext {
    pub fn new(
        name: impl Into<Arc<str>>,
        downstream: Option<FrameSender>,
        upstream: Option<FrameSender>,
        cancel: CancellationToken,
        observers: Observers,
    ) -> Self {
        let name = name.into();
        Self {
            metrics: ProcessorMetrics::new(name.as_ref()),
            name,
            downstream,
            upstream,
            boundary: None,
            params: StartParams::default(),
            started: false,
            metrics_enabled: false,
            cancel,
            observers,
            interrupts: InterruptSignal::new(),
            interrupts_handled: 0,
        }
    }

    /// Watch the interruptions sent to this processor's own inbox
    pub fn with_interrupt_signal(mut self, signal: InterruptSignal) -> Self {
        self.interrupts_handled = signal.generation();
        self.interrupts = signal;
        self
    }

    /// Set the task boundary used for errors when upstream is gone
    pub fn with_boundary(mut self, boundary: Option<FrameSender>) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters of the current run; defaults until Start arrives
    pub fn params(&self) -> &StartParams {
        &self.params
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Record the Start payload; called by the runtime before `on_start`
    pub fn start(&mut self, params: StartParams, can_generate_metrics: bool) {
        self.params = params;
        self.started = true;
        self.metrics_enabled = can_generate_metrics;
    }

    pub fn has_downstream(&self) -> bool {
        self.downstream.is_some()
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    /// Hand a frame to the neighbor in `direction`
    ///
    /// Frames pushed past either end of an unbounded pipeline are dropped.
    /// A neighbor that has already stopped also drops the frame.
    pub fn push_frame(&self, frame: Frame, direction: FrameDirection) {
        let target = match direction {
            FrameDirection::Downstream => self.downstream.as_ref(),
            FrameDirection::Upstream => self.upstream.as_ref(),
        };

        let Some(target) = target else {
            tracing::trace!(processor = %self.name, frame = %frame, %direction, "No neighbor, dropping frame");
            return;
        };

        self.notify_observers(target.name(), &frame, direction);

        if let Err(e) = target.send(frame, direction) {
            tracing::debug!(
                processor = %self.name,
                neighbor = target.name(),
                %direction,
                "Neighbor stopped, frame dropped: {}",
                e
            );
        }
    }

    /// Push a non-fatal Error frame upstream
    pub fn push_error(&self, message: impl Into<String>) {
        self.push_error_frame(ErrorFrame::new(message).with_processor(self.name.as_ref()));
    }

    /// Push a fatal Error frame upstream; the owning task cancels the run
    pub fn push_fatal_error(&self, message: impl Into<String>) {
        self.push_error_frame(ErrorFrame::fatal(message).with_processor(self.name.as_ref()));
    }

    fn push_error_frame(&self, error: ErrorFrame) {
        let upstream_alive = self.upstream.as_ref().is_some_and(|u| !u.is_closed());
        match (&self.boundary, upstream_alive) {
            (Some(boundary), false) => {
                let frame = Frame::error(error);
                self.notify_observers(boundary.name(), &frame, FrameDirection::Upstream);
                if boundary.send(frame, FrameDirection::Upstream).is_err() {
                    tracing::warn!(processor = %self.name, "Task boundary closed, error lost");
                }
            }
            _ => self.push_frame(Frame::error(error), FrameDirection::Upstream),
        }
    }

    fn notify_observers(&self, destination: &str, frame: &Frame, direction: FrameDirection) {
        if self.observers.is_empty() {
            return;
        }
        let event = FramePushed {
            source: &self.name,
            destination,
            frame,
            direction,
        };
        for observer in self.observers.iter() {
            observer.on_push_frame(&event);
        }
    }

    /// Token cancelled when the owning task is cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Watch for an interruption that arrives while this processor is busy
    ///
    /// Long-running work (streaming a synthesis response, say) selects on
    /// [`InterruptionWatch::raised`] next to the cancellation token and
    /// drops its remaining output when it fires.
    pub fn interruption(&self) -> InterruptionWatch {
        InterruptionWatch {
            signal: self.interrupts.clone(),
            handled: self.interrupts_handled,
        }
    }

    /// Mark every interruption raised so far as handled; called by the
    /// runtime when it dequeues a StartInterruption
    pub fn interruption_handled(&mut self) {
        self.interrupts_handled = self.interrupts.generation();
    }

    // Metrics helpers. All are no-ops unless the processor can generate
    // metrics and the run enabled them.

    pub fn metrics(&self) -> &ProcessorMetrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut ProcessorMetrics {
        &mut self.metrics
    }

    fn timing_enabled(&self) -> bool {
        self.metrics_enabled && self.params.enable_metrics
    }

    fn usage_enabled(&self) -> bool {
        self.metrics_enabled && self.params.enable_usage_metrics
    }

    pub fn start_ttfb_metrics(&mut self) {
        if self.timing_enabled() {
            let only_initial = self.params.report_only_initial_ttfb;
            self.metrics.start_ttfb(only_initial);
        }
    }

    pub fn stop_ttfb_metrics(&mut self) {
        if self.timing_enabled() {
            let data = self.metrics.stop_ttfb();
            self.push_metrics(data);
        }
    }

    pub fn start_processing_metrics(&mut self) {
        if self.timing_enabled() {
            self.metrics.start_processing();
        }
    }

    pub fn stop_processing_metrics(&mut self) {
        if self.timing_enabled() {
            let data = self.metrics.stop_processing();
            self.push_metrics(data);
        }
    }

    pub fn tts_usage_metrics(&mut self, text: &str) {
        if self.usage_enabled() {
            let data = self.metrics.tts_usage(text);
            self.push_metrics(Some(data));
        }
    }

    pub fn llm_usage_metrics(&mut self, prompt_tokens: u64, completion_tokens: u64) {
        if self.usage_enabled() {
            let data = self.metrics.llm_usage(prompt_tokens, completion_tokens);
            self.push_metrics(Some(data));
        }
    }

    fn push_metrics(&self, data: Option<MetricsData>) {
        if let Some(data) = data {
            self.push_frame(
                Frame::metrics(MetricsFrame::single(data)),
                FrameDirection::Downstream,
            );
        }
    }
}

impl std::fmt::Debug for ProcessorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorContext")
            .field("name", &self.name)
            .field("downstream", &self.downstream)
            .field("upstream", &self.upstream)
            .field("started", &self.started)
            .finish()
    }
}
