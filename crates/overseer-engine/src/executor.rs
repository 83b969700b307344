use overseer_core::{GovernanceError, ProviderAdapter, Result, Task, TaskId};
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::GovernanceEngine;

/// Drives one cleared task through a provider adapter.
pub struct Executor {
    engine: GovernanceEngine,
    adapter: Arc<dyn ProviderAdapter>,
}

impl Executor {
    pub fn new(engine: GovernanceEngine, adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self { engine, adapter }
    }

    /// `markExecuting`, call the adapter, then complete or fail the task.
    ///
    /// The adapter must serve the session's provider; otherwise nothing is
    /// started. An adapter error becomes the task's failure reason and is not
    /// returned to the caller.
    pub async fn run(&self, task_id: TaskId, owner: &str) -> Result<Task> {
        let engine = self.engine.clone();
        let owner_for_check = owner.to_string();
        let provider = self.adapter.name().to_string();
        let task = blocking(move || {
            let task = engine.get_task(task_id, &owner_for_check)?;
            let session = engine.get_session(task.session_id, &owner_for_check)?;
            if session.provider != provider {
                let err = GovernanceError::Validation(format!(
                    "adapter '{provider}' cannot run tasks for provider '{}'",
                    session.provider
                ));
                engine.record_failure(
                    &owner_for_check,
                    &owner_for_check,
                    "task.execute",
                    "task",
                    &task_id.to_string(),
                    &err,
                );
                return Err(err);
            }
            engine.mark_executing(task_id, &owner_for_check)
        })
        .await?;

        info!(task_id = %task.id, adapter = self.adapter.name(), "handing task to provider");
        let report = self.adapter.execute(&task).await;

        let engine = self.engine.clone();
        let owner = owner.to_string();
        match report {
            Ok(report) => {
                blocking(move || engine.mark_completed(task_id, &owner, report.actual_cost))
                    .await
                    .map(|c| c.task)
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "provider failed task");
                let reason = e.to_string();
                blocking(move || engine.mark_failed(task_id, &owner, &reason)).await
            }
        }
    }
}

async fn blocking<T: Send + 'static>(f: impl FnOnce() -> Result<T> + Send + 'static) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GovernanceError::Internal(format!("blocking task failed: {e}")))?
}
