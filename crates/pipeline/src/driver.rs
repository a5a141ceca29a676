//! Per-processor dispatch loop
//!
//! One tokio task per processor. Lifecycle frames travelling downstream are
//! handled here so processor code cannot swallow them.

use voxflow_core::{
    Envelope, Frame, FrameDirection, FrameKind, FrameProcessor, FrameReceiver, ProcessorContext,
};

pub(crate) async fn run_processor(
    mut processor: Box<dyn FrameProcessor>,
    mut inbox: FrameReceiver,
    ctx: ProcessorContext,
) {
    let mut ctx = ctx.with_interrupt_signal(inbox.interrupt_signal());

    // Set by a fatal error; lifecycle frames still flow but content stops
    let mut halted = false;

    tracing::debug!(processor = %ctx.name(), "Processor task started");

    while let Some(Envelope { frame, direction }) = inbox.recv().await {
        // Only downstream lifecycle frames drive the processor's lifecycle.
        // Upstream Start/End/Cancel are requests addressed to the task.
        let lifecycle = direction == FrameDirection::Downstream;

        match frame.kind() {
            FrameKind::Start(params) if lifecycle => {
                ctx.start(*params, processor.can_generate_metrics());
                if let Err(e) = processor.on_start(&mut ctx).await {
                    tracing::error!(processor = %ctx.name(), error = %e, "Processor start failed");
                    halted = true;
                    ctx.push_fatal_error(format!("start failed: {}", e));
                }
                ctx.push_frame(frame, direction);
            }

            FrameKind::End if lifecycle => {
                if ctx.is_started() && !halted {
                    if let Err(e) = processor.on_stop(&mut ctx).await {
                        tracing::warn!(processor = %ctx.name(), error = %e, "Processor stop failed");
                        ctx.push_error(e.to_string());
                    }
                }
                ctx.push_frame(frame, direction);
                break;
            }

            FrameKind::Cancel if lifecycle => {
                if let Err(e) = processor.on_cancel(&mut ctx).await {
                    tracing::warn!(processor = %ctx.name(), error = %e, "Processor cancel failed");
                }
                ctx.push_frame(frame, direction);
                break;
            }

            FrameKind::StartInterruption => {
                ctx.interruption_handled();
                let discarded = inbox.discard_interruptible();
                if discarded > 0 {
                    tracing::debug!(processor = %ctx.name(), discarded, "Interruption discarded queued frames");
                }
                if ctx.is_started() && !halted {
                    if let Err(e) = processor.on_interrupt(&mut ctx).await {
                        ctx.push_error(e.to_string());
                    }
                }
                ctx.push_frame(frame, direction);
            }

            FrameKind::Error(error) => {
                if error.fatal && !halted {
                    tracing::warn!(processor = %ctx.name(), error = %error, "Fatal error observed, halting");
                    halted = true;
                }
                ctx.push_frame(frame, direction);
            }

            _ => dispatch(processor.as_mut(), frame, direction, &mut ctx, halted).await,
        }
    }

    inbox.close();
    tracing::debug!(processor = %ctx.name(), "Processor task exiting");
}

async fn dispatch(
    processor: &mut dyn FrameProcessor,
    frame: Frame,
    direction: FrameDirection,
    ctx: &mut ProcessorContext,
    halted: bool,
) {
    if !ctx.is_started() {
        tracing::warn!(processor = %ctx.name(), frame = %frame, "Frame received before Start, dropping");
        return;
    }
    if halted {
        tracing::trace!(processor = %ctx.name(), frame = %frame, "Processor halted, dropping");
        return;
    }

    if let Err(e) = processor.process_frame(frame, direction, ctx).await {
        tracing::error!(processor = %ctx.name(), error = %e, "Processor error");
        ctx.push_error(e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use voxflow_core::{frame_channel, Error, FrameObserver, Observers, Result, StartParams};

    /// Echoes text in upper case, fails on "fail", records lifecycle calls
    struct Upper {
        calls: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl FrameProcessor for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        async fn process_frame(
            &mut self,
            frame: Frame,
            direction: FrameDirection,
            ctx: &mut ProcessorContext,
        ) -> Result<()> {
            match frame.kind() {
                FrameKind::Text(t) if t == "fail" => Err(Error::Protocol("bad input".into())),
                FrameKind::Text(t) => {
                    ctx.push_frame(Frame::text(t.to_uppercase()), direction);
                    Ok(())
                }
                _ => {
                    ctx.push_frame(frame, direction);
                    Ok(())
                }
            }
        }

        async fn on_start(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
            self.calls.lock().push("start");
            Ok(())
        }

        async fn on_stop(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
            self.calls.lock().push("stop");
            Ok(())
        }

        async fn on_cancel(&mut self, _ctx: &mut ProcessorContext) -> Result<()> {
            self.calls.lock().push("cancel");
            Ok(())
        }
    }

    fn spawn_upper() -> (
        voxflow_core::FrameSender,
        FrameReceiver,
        FrameReceiver,
        Arc<parking_lot::Mutex<Vec<&'static str>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let calls = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (in_tx, in_rx) = frame_channel("upper");
        let (down_tx, down_rx) = frame_channel("sink");
        let (up_tx, up_rx) = frame_channel("source");
        let observers: Observers = Arc::from(Vec::<Arc<dyn FrameObserver>>::new());
        let ctx = ProcessorContext::new(
            "upper",
            Some(down_tx),
            Some(up_tx),
            CancellationToken::new(),
            observers,
        );
        let handle = tokio::spawn(run_processor(
            Box::new(Upper {
                calls: Arc::clone(&calls),
            }),
            in_rx,
            ctx,
        ));
        (in_tx, down_rx, up_rx, calls, handle)
    }

    async fn next(rx: &mut FrameReceiver) -> Frame {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
            .frame
    }

    #[tokio::test]
    async fn test_lifecycle_and_content() {
        let (input, mut down, _up, calls, handle) = spawn_upper();

        input.send(Frame::start(StartParams::default()), FrameDirection::Downstream).unwrap();
        input.send(Frame::text("hi"), FrameDirection::Downstream).unwrap();
        input.send(Frame::end(), FrameDirection::Downstream).unwrap();

        assert!(next(&mut down).await.is_start());
        assert_eq!(next(&mut down).await.as_text(), Some("HI"));
        assert!(next(&mut down).await.is_end());

        handle.await.unwrap();
        assert_eq!(*calls.lock(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn test_content_before_start_is_dropped() {
        let (input, mut down, _up, _calls, handle) = spawn_upper();

        input.send(Frame::text("early"), FrameDirection::Downstream).unwrap();
        input.send(Frame::cancel(), FrameDirection::Downstream).unwrap();

        assert!(next(&mut down).await.is_cancel());
        handle.await.unwrap();
        assert!(down.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_process_error_becomes_upstream_error_frame() {
        let (input, mut down, mut up, _calls, _handle) = spawn_upper();

        input.send(Frame::start(StartParams::default()), FrameDirection::Downstream).unwrap();
        input.send(Frame::text("fail"), FrameDirection::Downstream).unwrap();
        input.send(Frame::text("ok"), FrameDirection::Downstream).unwrap();

        let error = next(&mut up).await;
        let error = error.as_error().unwrap();
        assert!(!error.fatal);
        assert_eq!(error.processor.as_deref(), Some("upper"));

        // The processor keeps going after a non-fatal error
        assert!(next(&mut down).await.is_start());
        assert_eq!(next(&mut down).await.as_text(), Some("OK"));
    }

    #[tokio::test]
    async fn test_cancel_overtakes_queued_content() {
        let (input, mut down, _up, calls, handle) = spawn_upper();

        input.send(Frame::start(StartParams::default()), FrameDirection::Downstream).unwrap();
        assert!(next(&mut down).await.is_start());

        for i in 0..10 {
            input.send(Frame::text(i.to_string()), FrameDirection::Downstream).unwrap();
        }
        input.send(Frame::cancel(), FrameDirection::Downstream).unwrap();
        handle.await.unwrap();

        // Whatever content got through, Cancel is the last frame forwarded
        let mut last = None;
        while let Some(envelope) = down.recv().await {
            last = Some(envelope.frame);
        }
        assert!(last.unwrap().is_cancel());
        assert!(calls.lock().contains(&"cancel"));
    }

    #[tokio::test]
    async fn test_fatal_error_halts_content() {
        let (input, mut down, mut up, _calls, _handle) = spawn_upper();

        input.send(Frame::start(StartParams::default()), FrameDirection::Downstream).unwrap();
        input
            .send(Frame::error(voxflow_core::ErrorFrame::fatal("dead")), FrameDirection::Upstream)
            .unwrap();
        input.send(Frame::text("ignored"), FrameDirection::Downstream).unwrap();
        input.send(Frame::end(), FrameDirection::Downstream).unwrap();

        assert!(next(&mut up).await.as_error().unwrap().fatal);
        assert!(next(&mut down).await.is_start());
        assert!(next(&mut down).await.is_end());
    }
}
