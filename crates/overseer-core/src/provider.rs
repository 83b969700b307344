use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Task;

/// What a provider reports after physically performing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Provider-reported cost; this, not the estimate, is posted to the ledger.
    pub actual_cost: f64,
    #[serde(default)]
    pub output: Value,
}

/// Contract a provider adapter (headless browser, scraping backend, ...) satisfies
/// to run tasks under governance. Adapters only ever see tasks that are already
/// `executing`; admission, approval, and cost posting stay with the engine.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Must equal the `provider` of the sessions it serves.
    fn name(&self) -> &str;

    /// Perform the task. An `Err` marks the task failed and posts no cost.
    async fn execute(&self, task: &Task) -> crate::Result<ExecutionReport>;
}
