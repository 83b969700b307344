#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use overseer_config::OverseerConfig;
    use overseer_core::*;
    use overseer_engine::{Executor, GovernanceEngine, SubmitTask, spawn_reapers};
    use overseer_store::GovernanceStore;
    use parking_lot::RwLock;
    use serde_json::{Map, json};
    use std::sync::Arc;

    struct FakeBrowser {
        cost: f64,
        fail: bool,
    }

    #[async_trait]
    impl ProviderAdapter for FakeBrowser {
        fn name(&self) -> &str {
            "playwright"
        }

        async fn execute(&self, task: &Task) -> Result<ExecutionReport> {
            if self.fail {
                return Err(GovernanceError::Internal("page crashed".into()));
            }
            Ok(ExecutionReport {
                actual_cost: self.cost,
                output: json!({ "task": task.id }),
            })
        }
    }

    fn setup(provider: &str) -> (GovernanceEngine, Task) {
        let store = GovernanceStore::open_in_memory().unwrap();
        let engine = GovernanceEngine::new(store, Arc::new(RwLock::new(OverseerConfig::default())));
        let session = engine
            .open_session("alice", "shop.test", provider, Map::new())
            .unwrap();
        let task = engine
            .submit_task(
                "alice",
                SubmitTask {
                    session_id: session.id,
                    task_type: "purchase".into(),
                    cost_estimate: Some(4.0),
                    metadata: Map::new(),
                },
            )
            .unwrap()
            .task;
        (engine, task)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_completes_and_posts_reported_cost() {
        let (engine, task) = setup("playwright");
        let executor = Executor::new(engine.clone(), Arc::new(FakeBrowser { cost: 4.5, fail: false }));

        let done = executor.run(task.id, "alice").await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.actual_cost, Some(4.5));
        assert_eq!(engine.daily_cost("alice").unwrap(), 4.5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_adapter_error_fails_task() {
        let (engine, task) = setup("playwright");
        let executor = Executor::new(engine.clone(), Arc::new(FakeBrowser { cost: 9.0, fail: true }));

        let failed = executor.run(task.id, "alice").await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.failure_reason.unwrap().contains("page crashed"));
        assert_eq!(engine.daily_cost("alice").unwrap(), 0.0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wrong_provider_never_starts() {
        let (engine, task) = setup("scrapy");
        let executor = Executor::new(engine.clone(), Arc::new(FakeBrowser { cost: 1.0, fail: false }));

        let err = executor.run(task.id, "alice").await.unwrap_err();
        assert_eq!(err.code(), "Validation");
        assert_eq!(engine.get_task(task.id, "alice").unwrap().status, TaskStatus::Approved);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reapers_stop_on_shutdown() {
        let (engine, _) = setup("playwright");
        let reapers = spawn_reapers(&engine);
        reapers.shutdown();
        assert!(engine.verify_audit("alice").unwrap().valid);
    }
}
