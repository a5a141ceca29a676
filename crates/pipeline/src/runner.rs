//! Pipeline runner
//!
//! Runs pipeline tasks to completion and maps process shutdown signals
//! (Ctrl+C, SIGTERM) to cancellation of every task it manages.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;
use voxflow_config::RunnerConfig;

use crate::task::{PipelineTask, TaskHandle, TaskOutcome};
use crate::PipelineError;

/// Process-wide driver for pipeline tasks
#[derive(Clone)]
pub struct PipelineRunner {
    config: RunnerConfig,
    tasks: Arc<Mutex<HashMap<Uuid, TaskHandle>>>,
}

impl PipelineRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run a task to completion
    ///
    /// A shutdown signal cancels every managed task; this call still waits
    /// for the task to finish.
    pub async fn run(&self, mut task: PipelineTask) -> Result<TaskOutcome, PipelineError> {
        let id = task.id();
        self.tasks.lock().insert(id, task.handle());
        tracing::debug!(task = %id, "Runner managing task");

        let result = {
            let run = task.run();
            tokio::pin!(run);

            let finished = tokio::select! {
                result = &mut run => Some(result),
                signal = shutdown_signal(self.config) => {
                    tracing::info!(signal, "Shutdown signal received, stopping tasks");
                    self.stop();
                    None
                }
            };

            match finished {
                Some(result) => result,
                None => run.await,
            }
        };

        self.tasks.lock().remove(&id);
        tracing::debug!(task = %id, ok = result.is_ok(), "Runner released task");
        result
    }

    /// Run several tasks concurrently, results in input order
    pub async fn run_all(
        &self,
        tasks: Vec<PipelineTask>,
    ) -> Vec<Result<TaskOutcome, PipelineError>> {
        join_all(tasks.into_iter().map(|task| self.run(task))).await
    }

    /// Cancel every managed task
    pub fn stop(&self) {
        let handles: Vec<TaskHandle> = self.tasks.lock().values().cloned().collect();
        tracing::info!(tasks = handles.len(), "Stopping all tasks");
        for handle in handles {
            handle.cancel();
        }
    }

    /// Ids of the tasks currently managed
    pub fn active_tasks(&self) -> Vec<Uuid> {
        self.tasks.lock().keys().copied().collect()
    }
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

/// Resolves with the signal name once an enabled shutdown signal arrives
///
/// Never resolves when no signal is enabled or handlers cannot be installed.
async fn shutdown_signal(config: RunnerConfig) -> &'static str {
    let ctrl_c = async {
        if !config.handle_sigint {
            return std::future::pending().await;
        }
        match tokio::signal::ctrl_c().await {
            Ok(()) => "SIGINT",
            Err(e) => {
                tracing::warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        if !config.handle_sigterm {
            return std::future::pending().await;
        }
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "SIGTERM"
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    }
}
