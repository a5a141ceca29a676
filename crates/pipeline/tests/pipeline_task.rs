//! Integration tests for pipeline runs (task lifecycle, cancellation, errors)

mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{run_bounded, Recorder, Slow};
use voxflow_config::PipelineParams;
use voxflow_core::{
    Error, Frame, FrameDirection, FrameKind, FrameObserver, FrameProcessor, FramePushed,
    ProcessorContext, Result,
};
use voxflow_pipeline::{
    InterruptionConfig, InterruptionHandler, MapProcessor, Pipeline, PipelineError, PipelineTask,
    SentenceAggregator, TaskEvent, TaskState,
};

/// Fails or escalates on marker texts
struct Faulty;

#[async_trait]
impl FrameProcessor for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn process_frame(
        &mut self,
        frame: Frame,
        direction: FrameDirection,
        ctx: &mut ProcessorContext,
    ) -> Result<()> {
        match frame.as_text() {
            Some("bad") => Err(Error::Protocol("unparseable".into())),
            Some("boom") => {
                ctx.push_fatal_error("connection lost for good");
                Ok(())
            }
            Some("bye") => {
                ctx.push_frame(Frame::end(), FrameDirection::Upstream);
                Ok(())
            }
            _ => {
                ctx.push_frame(frame, direction);
                Ok(())
            }
        }
    }
}

#[tokio::test]
async fn test_sentences_flow_and_end_finishes() {
    let (recorder, recording) = Recorder::new("recorder");
    let pipeline = Pipeline::builder("sentences")
        .processor(SentenceAggregator::new())
        .processor(recorder)
        .build()
        .unwrap();

    let mut task = PipelineTask::new(pipeline, PipelineParams::default());
    task.queue_frames([
        Frame::text("Hello wor"),
        Frame::text("ld. How are you"),
        Frame::text("? Fine"),
        Frame::end(),
    ])
    .unwrap();

    let outcome = run_bounded(&mut task).await.unwrap();

    assert_eq!(outcome.state, TaskState::Finished);
    assert!(!outcome.cancelled);
    assert!(outcome.error.is_none());
    // The aggregator flushes "Fine" while stopping, before End moves on
    assert_eq!(recording.texts(), vec!["Hello world.", "How are you?", "Fine"]);
    assert_eq!(recording.hooks(), vec!["start", "stop"]);
}

#[tokio::test]
async fn test_cancel_before_dispatch_sends_no_content() {
    let (recorder, recording) = Recorder::new("recorder");
    let pipeline = Pipeline::builder("cancelled")
        .processor(recorder)
        .build()
        .unwrap();

    let mut task = PipelineTask::new(pipeline, PipelineParams::default());
    task.queue_frames([Frame::text("one"), Frame::text("two")]).unwrap();
    task.cancel();

    let outcome = run_bounded(&mut task).await.unwrap();

    assert_eq!(outcome.state, TaskState::Finished);
    assert!(outcome.cancelled);
    assert!(recording.texts().is_empty());
    assert!(recording.hooks().contains(&"cancel"));
    assert!(!recording.hooks().contains(&"stop"));
}

#[tokio::test]
async fn test_cancel_while_running_reaches_every_processor() {
    let (first, first_rec) = Recorder::new("first");
    let (last, last_rec) = Recorder::new("last");
    let pipeline = Pipeline::builder("slow")
        .processor(first)
        .processor(Slow {
            delay: Duration::from_millis(20),
        })
        .processor(last)
        .build()
        .unwrap();

    let mut task = PipelineTask::new(pipeline, PipelineParams::default());
    let handle = task.handle();
    task.queue_frames((0..50).map(|i| Frame::text(i.to_string())))
        .unwrap();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        handle
    });

    let outcome = run_bounded(&mut task).await.unwrap();
    let handle = canceller.await.unwrap();

    assert!(outcome.cancelled);
    assert_eq!(handle.state(), TaskState::Finished);
    assert!(last_rec.texts().len() < 50);
    assert_eq!(first_rec.hooks(), vec!["start", "cancel"]);
    assert_eq!(last_rec.hooks(), vec!["start", "cancel"]);
    assert_eq!(
        handle.queue_frame(Frame::text("late")),
        Err(PipelineError::TaskFinished)
    );
}

#[tokio::test]
async fn test_fatal_error_cancels_and_surfaces() {
    let (recorder, recording) = Recorder::new("recorder");
    let pipeline = Pipeline::builder("fatal")
        .processor(Faulty)
        .processor(recorder)
        .build()
        .unwrap();

    let mut task = PipelineTask::new(pipeline, PipelineParams::default());
    let mut events = task.subscribe();
    task.queue_frames([Frame::text("ok"), Frame::text("boom"), Frame::text("after")])
        .unwrap();

    let result = run_bounded(&mut task).await;

    let error = match result {
        Err(PipelineError::Fatal(error)) => error,
        other => panic!("expected a fatal error, got {:?}", other),
    };
    assert!(error.fatal);
    assert_eq!(error.processor.as_deref(), Some("faulty"));
    assert_eq!(task.state(), TaskState::Finished);
    assert!(recording.hooks().contains(&"cancel"));

    let mut saw_error = false;
    let mut saw_cancelling = false;
    while let Ok(event) = events.try_recv() {
        match event {
            TaskEvent::Error(e) => saw_error |= e.fatal,
            TaskEvent::StateChanged(TaskState::Cancelling) => saw_cancelling = true,
            _ => {}
        }
    }
    assert!(saw_error);
    assert!(saw_cancelling);
}

#[tokio::test]
async fn test_non_fatal_error_keeps_running() {
    let (recorder, recording) = Recorder::new("recorder");
    let pipeline = Pipeline::builder("non-fatal")
        .processor(Faulty)
        .processor(recorder)
        .build()
        .unwrap();

    let mut task = PipelineTask::new(pipeline, PipelineParams::default());
    task.queue_frames([Frame::text("bad"), Frame::text("good"), Frame::end()])
        .unwrap();

    let outcome = run_bounded(&mut task).await.unwrap();

    assert!(!outcome.cancelled);
    let error = outcome.error.expect("error recorded");
    assert!(!error.fatal);
    assert!(error.message.contains("unparseable"));
    assert_eq!(recording.texts(), vec!["good"]);
}

#[tokio::test]
async fn test_processor_can_request_end() {
    let (recorder, recording) = Recorder::new("recorder");
    let pipeline = Pipeline::builder("goodbye")
        .processor(recorder)
        .processor(Faulty)
        .build()
        .unwrap();

    let mut task = PipelineTask::new(pipeline, PipelineParams::default());
    task.queue_frames([Frame::text("hi"), Frame::text("bye")]).unwrap();

    let outcome = run_bounded(&mut task).await.unwrap();

    assert!(!outcome.cancelled);
    assert_eq!(recording.texts(), vec!["hi", "bye"]);
    assert_eq!(recording.hooks(), vec!["start", "stop"]);
}

#[tokio::test]
async fn test_interruption_reaches_downstream_processors() {
    let (recorder, recording) = Recorder::new("recorder");
    let pipeline = Pipeline::builder("interruptible")
        .processor(InterruptionHandler::new(InterruptionConfig::default()))
        .processor(recorder)
        .build()
        .unwrap();

    let params = PipelineParams {
        allow_interruptions: true,
        ..PipelineParams::default()
    };
    let mut task = PipelineTask::new(pipeline, params);
    task.queue_frames([
        Frame::new(FrameKind::BotStartedSpeaking),
        Frame::new(FrameKind::UserStartedSpeaking),
        Frame::new(FrameKind::UserStoppedSpeaking),
        Frame::end(),
    ])
    .unwrap();

    run_bounded(&mut task).await.unwrap();

    assert_eq!(recording.hooks(), vec!["start", "interrupt", "stop"]);
    let names = recording.names();
    assert!(names.contains(&"stop_interruption"));
    assert!(names.contains(&"user_started_speaking"));
}

#[tokio::test]
async fn test_nested_pipeline_runs_in_order() {
    let suffix = |s: &'static str| {
        MapProcessor::new(move |frame: Frame| match frame.as_text() {
            Some(t) => Frame::text(format!("{}{}", t, s)),
            None => frame,
        })
    };

    let inner = Pipeline::builder("inner")
        .processor(suffix("b"))
        .processor(suffix("c"))
        .build()
        .unwrap();
    let (recorder, recording) = Recorder::new("recorder");
    let outer = Pipeline::builder("outer")
        .processor(suffix("a"))
        .pipeline(inner)
        .processor(recorder)
        .build()
        .unwrap();
    assert_eq!(outer.len(), 4);

    let mut task = PipelineTask::new(outer, PipelineParams::default());
    task.queue_frames([Frame::text("x"), Frame::end()]).unwrap();
    run_bounded(&mut task).await.unwrap();

    assert_eq!(recording.texts(), vec!["xabc"]);
}

#[tokio::test]
async fn test_observer_sees_every_push() {
    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl FrameObserver for Counting {
        fn on_push_frame(&self, _event: &FramePushed<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let counter = Arc::new(Counting::default());
    let pipeline = Pipeline::builder("observed")
        .processor(voxflow_pipeline::PassthroughProcessor::new())
        .processor(voxflow_pipeline::PassthroughProcessor::new())
        .build()
        .unwrap();

    let mut task = PipelineTask::new(pipeline, PipelineParams::default())
        .observer(counter.clone())
        .observer(Arc::new(voxflow_pipeline::LoggingObserver::new()));
    task.queue_frames([Frame::text("x"), Frame::end()]).unwrap();
    run_bounded(&mut task).await.unwrap();

    // Start, Text and End each cross two links
    assert_eq!(counter.0.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_push_upstream_into_running_task() {
    let (recorder, _recording) = Recorder::new("recorder");
    let pipeline = Pipeline::builder("upstream")
        .processor(recorder)
        .build()
        .unwrap();

    let mut task = PipelineTask::new(pipeline, PipelineParams::default());
    let handle = task.handle();
    let mut events = task.subscribe();

    let pusher = tokio::spawn(async move {
        // Wait for Running before pushing
        while let Ok(event) = events.recv().await {
            if event == TaskEvent::StateChanged(TaskState::Running) {
                break;
            }
        }
        handle
            .push_upstream(Frame::error(voxflow_core::ErrorFrame::new("transport hiccup")))
            .unwrap();
        handle.queue_frame(Frame::end()).unwrap();
    });

    let outcome = run_bounded(&mut task).await.unwrap();
    pusher.await.unwrap();

    assert_eq!(
        outcome.error.map(|e| e.message),
        Some("transport hiccup".to_string())
    );
}

#[tokio::test]
async fn test_second_end_is_never_dispatched() {
    #[derive(Default)]
    struct EndCounter(AtomicUsize);

    impl FrameObserver for EndCounter {
        fn on_push_frame(&self, event: &FramePushed<'_>) {
            if event.frame.is_end() {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    let (recorder, recording) = Recorder::new("recorder");
    let pipeline = Pipeline::builder("double-end")
        .processor(recorder)
        .build()
        .unwrap();

    let ends = Arc::new(EndCounter::default());
    let mut task = PipelineTask::new(pipeline, PipelineParams::default()).observer(ends.clone());
    task.queue_frames([Frame::text("only"), Frame::end(), Frame::end(), Frame::text("late")])
        .unwrap();

    let outcome = run_bounded(&mut task).await.unwrap();

    assert!(!outcome.cancelled);
    assert_eq!(ends.0.load(Ordering::SeqCst), 1);
    assert_eq!(recording.texts(), vec!["only"]);
    assert_eq!(recording.hooks(), vec!["start", "stop"]);
}
