//! voxflow command-line runner
//!
//! Streams stdin through a sentence-splitting pipeline and prints one
//! sentence per line. An optional first argument names a settings file;
//! otherwise settings come from `config/` and `VOXFLOW__*` variables.

mod console;

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voxflow_config::{load_settings, Settings};
use voxflow_core::Frame;
use voxflow_pipeline::{
    LoggingObserver, Pipeline, PipelineRunner, PipelineTask, SentenceAggregator, TaskHandle,
};

use console::ConsolePrinter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("VOXFLOW_ENV").ok();
    let settings = match std::env::args().nth(1) {
        Some(path) => Settings::from_file(&path)?,
        None => match load_settings(env.as_deref()) {
            Ok(settings) => settings,
            Err(e) => {
                // Tracing not yet initialized
                eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
                Settings::default()
            }
        },
    };

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?settings.environment,
        "Starting voxflow"
    );

    let pipeline = Pipeline::builder("stdin-sentences")
        .processor(SentenceAggregator::new())
        .processor(ConsolePrinter::new())
        .build()?;

    let mut task = PipelineTask::new(pipeline, settings.pipeline);
    if settings.observability.log_frames {
        task = task.observer(Arc::new(LoggingObserver::new()));
    }

    let reader = tokio::spawn(feed_stdin(task.handle()));
    let runner = PipelineRunner::new(settings.runner);
    let outcome = runner.run(task).await;
    reader.abort();

    let outcome = outcome?;
    if let Some(error) = &outcome.error {
        tracing::warn!(error = %error, "Run finished with errors");
    }
    tracing::info!(cancelled = outcome.cancelled, "voxflow finished");
    Ok(())
}

/// Queue stdin lines as Text frames, then End at EOF
async fn feed_stdin(task: TaskHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                // Lines are chunks of one text stream
                if task.queue_frame(Frame::text(format!("{} ", line))).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        }
    }

    if task.queue_frame(Frame::end()).is_err() {
        tracing::debug!("Task finished before end of input");
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &settings.observability.log_level;
        format!("voxflow={0},voxflow_pipeline={0},voxflow_core={0}", level).into()
    });

    // stdout carries the sentences
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
