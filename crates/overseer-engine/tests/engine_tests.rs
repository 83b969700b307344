#[cfg(test)]
mod tests {
    use chrono::{Duration, SubsecRound, Utc};
    use overseer_config::OverseerConfig;
    use overseer_core::*;
    use overseer_engine::{Clock, GovernanceEngine, ManualClock, RuleUpdate, SubmitTask};
    use overseer_store::GovernanceStore;
    use parking_lot::RwLock;
    use serde_json::{Map, json};
    use std::sync::Arc;

    fn engine_with(config: OverseerConfig) -> GovernanceEngine {
        let store = GovernanceStore::open_in_memory().unwrap();
        GovernanceEngine::new(store, Arc::new(RwLock::new(config)))
    }

    fn engine() -> GovernanceEngine {
        engine_with(OverseerConfig::default())
    }

    fn engine_with_clock(config: OverseerConfig) -> (GovernanceEngine, Arc<ManualClock>) {
        // Whole seconds so stored timestamps compare equal after a round trip
        let clock = Arc::new(ManualClock::new(Utc::now().trunc_subsecs(0)));
        let engine = engine_with(config).with_clock(clock.clone());
        (engine, clock)
    }

    fn open(engine: &GovernanceEngine, owner: &str) -> Session {
        engine
            .open_session(owner, "shop.test", "playwright", Map::new())
            .unwrap()
    }

    fn submit(engine: &GovernanceEngine, owner: &str, session: &Session, task_type: &str, cost: f64) -> Result<overseer_engine::Submitted> {
        engine.submit_task(
            owner,
            SubmitTask {
                session_id: session.id,
                task_type: task_type.into(),
                cost_estimate: Some(cost),
                metadata: Map::new(),
            },
        )
    }

    fn require_form_approval(engine: &GovernanceEngine) -> AdaptiveRule {
        engine
            .add_rule(
                RuleCondition {
                    task_type: Some("form_submit".into()),
                    ..Default::default()
                },
                RuleAction::RequireApproval,
                None,
                "root",
            )
            .unwrap()
    }

    fn successes(engine: &GovernanceEngine, owner: &str) -> Vec<AuditEntry> {
        engine
            .query_audit(owner, None, None)
            .unwrap()
            .into_iter()
            .filter(|e| e.outcome == AuditOutcome::Success)
            .collect()
    }

    // ── Scenarios ──────────────────────────────────────────────

    mod scenarios {
        use super::*;

        #[test]
        fn test_rule_forces_pending_approval() {
            let engine = engine();
            require_form_approval(&engine);
            let session = open(&engine, "alice");

            let submitted = submit(&engine, "alice", &session, "form_submit", 5.0).unwrap();
            assert_eq!(submitted.task.status, TaskStatus::Pending);
            let approval = submitted.approval.unwrap();
            assert_eq!(approval.status, ApprovalStatus::Pending);
            assert_eq!(submitted.task.approval_id, Some(approval.id));

            let pending = engine.list_approvals(Some(ApprovalStatus::Pending)).unwrap();
            assert_eq!(pending.len(), 1);
        }

        #[test]
        fn test_approve_then_second_decision_is_already_resolved() {
            let engine = engine();
            require_form_approval(&engine);
            let session = open(&engine, "alice");
            let submitted = submit(&engine, "alice", &session, "form_submit", 5.0).unwrap();
            let approval_id = submitted.approval.unwrap().id;

            let decided = engine.decide(approval_id, "rita", Decision::Approve).unwrap();
            assert_eq!(decided.status, ApprovalStatus::Approved);
            let task = engine.get_task(submitted.task.id, "alice").unwrap();
            assert_eq!(task.status, TaskStatus::Approved);

            for decision in [Decision::Approve, Decision::Deny, Decision::Escalate] {
                let err = engine.decide(approval_id, "rob", decision).unwrap_err();
                assert_eq!(err.code(), "AlreadyResolved");
            }
        }

        #[test]
        fn test_ceiling_forces_approval_without_rule() {
            let mut config = OverseerConfig::default();
            config.ledger.default_daily_ceiling = 100.0;
            let engine = engine_with(config);
            engine.post_cost("alice", 98.0, "alice").unwrap();
            assert_eq!(engine.daily_cost("alice").unwrap(), 98.0);

            let session = open(&engine, "alice");
            let submitted = submit(&engine, "alice", &session, "purchase", 10.0).unwrap();
            assert_eq!(submitted.task.status, TaskStatus::Pending);
            let approval = submitted.approval.unwrap();
            assert!(approval.rule_triggered.is_none());
            assert!(approval.reason.contains("ceiling"));
            assert!(submitted.classification.matched.is_empty());
            assert_eq!(submitted.classification.budget.outcome, Reservation::Deny);
            // Reservation never posts
            assert_eq!(engine.daily_cost("alice").unwrap(), 98.0);
        }

        #[test]
        fn test_closed_session_rejects_tasks_and_close_is_idempotent() {
            let engine = engine();
            let session = open(&engine, "alice");
            let closed = engine.close_session(session.id, "alice").unwrap();
            assert_eq!(closed.status, SessionStatus::Closed);

            let err = submit(&engine, "alice", &session, "navigate", 0.0).unwrap_err();
            assert_eq!(err.code(), "SessionClosed");

            let again = engine.close_session(session.id, "alice").unwrap();
            assert_eq!(again, closed);
        }

        #[test]
        fn test_completion_posts_actual_cost_not_estimate() {
            let engine = engine();
            let session = open(&engine, "alice");
            let submitted = submit(&engine, "alice", &session, "purchase", 10.0).unwrap();
            assert_eq!(submitted.task.status, TaskStatus::Approved);

            let before = engine.daily_cost("alice").unwrap();
            engine.mark_executing(submitted.task.id, "alice").unwrap();
            let completed = engine.mark_completed(submitted.task.id, "alice", 12.0).unwrap();
            assert_eq!(completed.task.status, TaskStatus::Completed);
            assert_eq!(completed.drift, 2.0);
            assert_eq!(engine.daily_cost("alice").unwrap() - before, 12.0);

            let entry = engine
                .audit_trail("alice", &submitted.task.id.to_string())
                .unwrap()
                .into_iter()
                .find(|e| e.action == "task.completed")
                .unwrap();
            assert_eq!(entry.payload["costEstimate"], 10.0);
            assert_eq!(entry.payload["actualCost"], 12.0);
        }
    }

    // ── Sessions ───────────────────────────────────────────────

    mod sessions {
        use super::*;

        #[test]
        fn test_open_requires_fields() {
            let engine = engine();
            let err = engine.open_session("alice", "", "playwright", Map::new()).unwrap_err();
            assert_eq!(err.code(), "Validation");
            let err = engine.open_session("alice", "shop.test", " ", Map::new()).unwrap_err();
            assert_eq!(err.code(), "Validation");
        }

        #[test]
        fn test_other_owner_sees_not_found() {
            let engine = engine();
            let session = open(&engine, "alice");
            assert_eq!(engine.get_session(session.id, "bob").unwrap_err().code(), "NotFound");
            assert_eq!(engine.close_session(session.id, "bob").unwrap_err().code(), "NotFound");
            let err = submit(&engine, "bob", &session, "navigate", 0.0).unwrap_err();
            assert_eq!(err.code(), "NotFound");
        }

        #[test]
        fn test_list_is_newest_first() {
            let (engine, clock) = engine_with_clock(OverseerConfig::default());
            let first = open(&engine, "alice");
            clock.advance(Duration::seconds(1));
            let second = open(&engine, "alice");
            open(&engine, "bob");
            let listed = engine.list_sessions("alice").unwrap();
            assert_eq!(listed.iter().map(|s| s.id).collect::<Vec<_>>(), vec![second.id, first.id]);
        }

        #[test]
        fn test_close_idle_uses_last_activity() {
            let (engine, clock) = engine_with_clock(OverseerConfig::default());
            let quiet = open(&engine, "alice");
            let busy = open(&engine, "alice");
            clock.advance(Duration::minutes(20));
            submit(&engine, "alice", &busy, "navigate", 0.0).unwrap();
            clock.advance(Duration::minutes(20));

            let closed = engine.close_idle(Duration::minutes(30)).unwrap();
            assert_eq!(closed, vec![quiet.id]);
            assert!(engine.get_session(busy.id, "alice").unwrap().is_active());

            let entry = successes(&engine, "alice")
                .into_iter()
                .find(|e| e.action == "session.closed")
                .unwrap();
            assert_eq!(entry.actor, overseer_engine::REAPER_ACTOR);
        }

        #[test]
        fn test_close_idle_zero_disables() {
            let engine = engine();
            open(&engine, "alice");
            assert!(engine.close_idle(Duration::zero()).unwrap().is_empty());
        }
    }

    // ── Tasks ──────────────────────────────────────────────────

    mod tasks {
        use super::*;

        #[test]
        fn test_negative_estimate_rejected_and_audited() {
            let engine = engine();
            let session = open(&engine, "alice");
            let err = submit(&engine, "alice", &session, "purchase", -1.0).unwrap_err();
            assert_eq!(err.code(), "Validation");
            let failed: Vec<_> = engine
                .query_audit("alice", None, None)
                .unwrap()
                .into_iter()
                .filter(|e| e.outcome == AuditOutcome::Failed)
                .collect();
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].action, "task.submit");
            assert_eq!(failed[0].payload["code"], "Validation");
        }

        #[test]
        fn test_estimate_falls_back_to_purchase_amount() {
            let engine = engine();
            let session = open(&engine, "alice");
            let submitted = engine
                .submit_task(
                    "alice",
                    SubmitTask {
                        session_id: session.id,
                        task_type: "purchase".into(),
                        cost_estimate: None,
                        metadata: json!({ "amount": 7.5, "merchant": "acme" })
                            .as_object()
                            .unwrap()
                            .clone(),
                    },
                )
                .unwrap();
            assert_eq!(submitted.task.cost_estimate, 7.5);
            assert_eq!(submitted.task.domain, "shop.test");
        }

        #[test]
        fn test_pending_task_cannot_execute() {
            let engine = engine();
            require_form_approval(&engine);
            let session = open(&engine, "alice");
            let submitted = submit(&engine, "alice", &session, "form_submit", 1.0).unwrap();
            let err = engine.mark_executing(submitted.task.id, "alice").unwrap_err();
            assert_eq!(err.code(), "NotApproved");
        }

        #[test]
        fn test_execute_after_session_closed_fails() {
            let engine = engine();
            let session = open(&engine, "alice");
            let submitted = submit(&engine, "alice", &session, "navigate", 0.0).unwrap();
            engine.close_session(session.id, "alice").unwrap();
            let err = engine.mark_executing(submitted.task.id, "alice").unwrap_err();
            assert_eq!(err.code(), "SessionClosed");
        }

        #[test]
        fn test_complete_requires_executing() {
            let engine = engine();
            let session = open(&engine, "alice");
            let submitted = submit(&engine, "alice", &session, "navigate", 0.0).unwrap();
            let err = engine.mark_completed(submitted.task.id, "alice", 1.0).unwrap_err();
            assert_eq!(err.code(), "NotApproved");
            assert_eq!(engine.daily_cost("alice").unwrap(), 0.0);
        }

        #[test]
        fn test_failed_task_posts_nothing() {
            let engine = engine();
            let session = open(&engine, "alice");
            let submitted = submit(&engine, "alice", &session, "scrape", 3.0).unwrap();
            engine.mark_executing(submitted.task.id, "alice").unwrap();
            let failed = engine.mark_failed(submitted.task.id, "alice", "captcha").unwrap();
            assert_eq!(failed.status, TaskStatus::Failed);
            assert_eq!(failed.failure_reason.as_deref(), Some("captcha"));
            assert_eq!(engine.daily_cost("alice").unwrap(), 0.0);
            assert_eq!(
                engine.mark_failed(submitted.task.id, "alice", "again").unwrap_err().code(),
                "NotApproved"
            );
        }

        #[test]
        fn test_deny_rule_denies_without_approval() {
            let engine = engine();
            engine
                .add_rule(
                    RuleCondition {
                        domain: Some("*.casino.test".into()),
                        ..Default::default()
                    },
                    RuleAction::Deny,
                    None,
                    "root",
                )
                .unwrap();
            let session = engine
                .open_session("alice", "www.casino.test", "playwright", Map::new())
                .unwrap();
            let submitted = submit(&engine, "alice", &session, "purchase", 1.0).unwrap();
            assert_eq!(submitted.task.status, TaskStatus::Denied);
            assert!(submitted.approval.is_none());
        }

        #[test]
        fn test_submission_audit_explains_classification() {
            let engine = engine();
            let rule = engine
                .add_rule(RuleCondition::default(), RuleAction::Allow, Some(50.0), "root")
                .unwrap();
            let session = open(&engine, "alice");
            let submitted = submit(&engine, "alice", &session, "purchase", 60.0).unwrap();
            assert_eq!(submitted.task.status, TaskStatus::Pending);

            let trail = engine.audit_trail("alice", &submitted.task.id.to_string()).unwrap();
            let entry = &trail[0];
            assert_eq!(entry.action, "task.submitted");
            let matched = &entry.payload["classification"]["matched"][0];
            assert_eq!(matched["ruleId"], rule.id.to_string());
            assert_eq!(matched["version"], 1);
            assert_eq!(matched["exceedsThreshold"], true);
        }

        #[test]
        fn test_list_tasks_checks_session_owner() {
            let engine = engine();
            let session = open(&engine, "alice");
            submit(&engine, "alice", &session, "navigate", 0.0).unwrap();
            submit(&engine, "alice", &session, "scrape", 0.0).unwrap();
            assert_eq!(engine.list_tasks(session.id, "alice").unwrap().len(), 2);
            assert_eq!(engine.list_tasks(session.id, "bob").unwrap_err().code(), "NotFound");
        }
    }

    // ── Approvals ──────────────────────────────────────────────

    mod approvals {
        use super::*;

        fn pending(engine: &GovernanceEngine) -> (Task, ApprovalRequest) {
            require_form_approval(engine);
            let session = open(engine, "alice");
            let submitted = submit(engine, "alice", &session, "form_submit", 1.0).unwrap();
            (submitted.task, submitted.approval.unwrap())
        }

        #[test]
        fn test_deny_denies_task() {
            let engine = engine();
            let (task, approval) = pending(&engine);
            engine.decide(approval.id, "rita", Decision::Deny).unwrap();
            assert_eq!(engine.get_task(task.id, "alice").unwrap().status, TaskStatus::Denied);
        }

        #[test]
        fn test_escalation_tightens_deadline_and_caps_tier() {
            let mut config = OverseerConfig::default();
            config.approval.timeout_secs = 600;
            config.approval.escalation_factor = 0.5;
            config.approval.max_escalation_tier = 1;
            let (engine, clock) = engine_with_clock(config);
            let (task, approval) = pending(&engine);

            let escalated = engine.decide(approval.id, "rita", Decision::Escalate).unwrap();
            assert_eq!(escalated.status, ApprovalStatus::Escalated);
            assert_eq!(escalated.tier, 1);
            assert_eq!(escalated.deadline, clock.now() + Duration::seconds(300));

            let err = engine.decide(approval.id, "rita", Decision::Escalate).unwrap_err();
            assert_eq!(err.code(), "Validation");

            // Escalated is still open
            engine.decide(approval.id, "boss", Decision::Approve).unwrap();
            assert_eq!(engine.get_task(task.id, "alice").unwrap().status, TaskStatus::Approved);
        }

        #[test]
        fn test_expire_due_fails_closed() {
            let mut config = OverseerConfig::default();
            config.approval.timeout_secs = 60;
            let (engine, clock) = engine_with_clock(config);
            let (task, approval) = pending(&engine);

            assert!(engine.expire_due().unwrap().is_empty());
            clock.advance(Duration::seconds(61));
            assert_eq!(engine.expire_due().unwrap(), vec![approval.id]);

            assert_eq!(engine.get_approval(approval.id).unwrap().status, ApprovalStatus::Expired);
            assert_eq!(engine.get_task(task.id, "alice").unwrap().status, TaskStatus::Denied);
            assert!(engine.expire_due().unwrap().is_empty());
        }

        #[test]
        fn test_expire_due_continues_past_a_failure() {
            let mut config = OverseerConfig::default();
            config.approval.timeout_secs = 60;
            let (engine, clock) = engine_with_clock(config);
            require_form_approval(&engine);
            let session = open(&engine, "alice");
            let broken = submit(&engine, "alice", &session, "form_submit", 1.0).unwrap();
            let healthy = submit(&engine, "alice", &session, "form_submit", 1.0).unwrap();

            // A task that left `pending` behind the gate's back cannot be expired
            let now = clock.now();
            engine
                .store()
                .with_tx("t", |tx| {
                    overseer_store::tasks::transition(tx, broken.task.id, TaskStatus::Pending, TaskStatus::Executing, now)
                })
                .unwrap();

            clock.advance(Duration::seconds(61));
            let healthy_approval = healthy.approval.unwrap();
            assert_eq!(engine.expire_due().unwrap(), vec![healthy_approval.id]);
            assert_eq!(engine.get_approval(healthy_approval.id).unwrap().status, ApprovalStatus::Expired);
            assert_eq!(engine.get_task(healthy.task.id, "alice").unwrap().status, TaskStatus::Denied);
            let broken_approval = broken.approval.unwrap();
            assert!(engine.get_approval(broken_approval.id).unwrap().status.is_open());
        }

        #[test]
        fn test_late_decision_expires_instead() {
            let mut config = OverseerConfig::default();
            config.approval.timeout_secs = 60;
            let (engine, clock) = engine_with_clock(config);
            let (task, approval) = pending(&engine);

            clock.advance(Duration::seconds(120));
            let err = engine.decide(approval.id, "rita", Decision::Approve).unwrap_err();
            assert_eq!(err.code(), "AlreadyResolved");
            assert_eq!(engine.get_approval(approval.id).unwrap().status, ApprovalStatus::Expired);
            assert_eq!(engine.get_task(task.id, "alice").unwrap().status, TaskStatus::Denied);
        }

        #[test]
        fn test_manual_expire_only_while_open() {
            let engine = engine();
            let (_, approval) = pending(&engine);
            engine.expire(approval.id, "root").unwrap();
            assert_eq!(engine.expire(approval.id, "root").unwrap_err().code(), "AlreadyResolved");
        }

        #[test]
        fn test_unknown_approval_not_found() {
            let engine = engine();
            let err = engine.decide(uuid::Uuid::new_v4(), "rita", Decision::Approve).unwrap_err();
            assert_eq!(err.code(), "NotFound");
        }

        #[test]
        fn test_denial_rate_feeds_rule_context() {
            let engine = engine();
            engine
                .add_rule(
                    RuleCondition {
                        task_type: Some("navigate".into()),
                        min_denial_rate: Some(0.5),
                        ..Default::default()
                    },
                    RuleAction::RequireApproval,
                    None,
                    "root",
                )
                .unwrap();
            let session = open(&engine, "alice");
            let first = submit(&engine, "alice", &session, "navigate", 0.0).unwrap();
            assert_eq!(first.task.status, TaskStatus::Approved);

            let (_, approval) = pending(&engine);
            engine.decide(approval.id, "rita", Decision::Deny).unwrap();

            let second = submit(&engine, "alice", &session, "navigate", 0.0).unwrap();
            assert_eq!(second.task.status, TaskStatus::Pending);
            assert_eq!(second.classification.context.denial_rate, 1.0);
        }
    }

    // ── Rules ──────────────────────────────────────────────────

    mod rules {
        use super::*;

        #[test]
        fn test_update_appends_version_and_supersedes() {
            let engine = engine();
            let rule = require_form_approval(&engine);
            let updated = engine
                .update_rule(
                    rule.id,
                    RuleUpdate {
                        threshold: Some(Some(20.0)),
                        ..Default::default()
                    },
                    "root",
                )
                .unwrap();
            assert_eq!(updated.version, 2);
            assert_eq!(updated.threshold, Some(20.0));
            assert_eq!(updated.action, RuleAction::RequireApproval);

            let history = engine.rule_history(rule.id).unwrap();
            assert_eq!(history.len(), 2);
            assert!(history[0].superseded);
            assert_eq!(history[0].threshold, None);
            assert_eq!(engine.list_rules().unwrap().len(), 1);
        }

        #[test]
        fn test_stale_base_version_conflicts() {
            let engine = engine();
            let rule = require_form_approval(&engine);
            let stale = RuleUpdate {
                action: Some(RuleAction::Deny),
                base_version: Some(1),
                ..Default::default()
            };
            engine.update_rule(rule.id, stale.clone(), "root").unwrap();
            let err = engine.update_rule(rule.id, stale, "root").unwrap_err();
            assert_eq!(err.code(), "RuleConflict");
        }

        #[test]
        fn test_disable_stops_matching_and_enable_restores() {
            let engine = engine();
            let rule = require_form_approval(&engine);
            let session = open(&engine, "alice");

            let disabled = engine.disable_rule(rule.id, "root").unwrap();
            assert!(!disabled.enabled);
            assert_eq!(disabled.version, 2);
            let again = engine.disable_rule(rule.id, "root").unwrap();
            assert_eq!(again.version, 2);
            let submitted = submit(&engine, "alice", &session, "form_submit", 1.0).unwrap();
            assert_eq!(submitted.task.status, TaskStatus::Approved);

            let enabled = engine.enable_rule(rule.id, "root").unwrap();
            assert_eq!(enabled.version, 3);
            let submitted = submit(&engine, "alice", &session, "form_submit", 1.0).unwrap();
            assert_eq!(submitted.task.status, TaskStatus::Pending);
        }

        #[test]
        fn test_invalid_condition_rejected() {
            let engine = engine();
            let err = engine
                .add_rule(
                    RuleCondition {
                        min_denial_rate: Some(2.0),
                        ..Default::default()
                    },
                    RuleAction::RequireApproval,
                    None,
                    "root",
                )
                .unwrap_err();
            assert_eq!(err.code(), "Validation");
        }

        #[test]
        fn test_rule_changes_chain_under_system() {
            let engine = engine();
            let rule = require_form_approval(&engine);
            engine.disable_rule(rule.id, "root").unwrap();
            let entries = successes(&engine, SYSTEM_OWNER);
            let actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
            assert_eq!(actions, vec!["rule.added", "rule.disabled"]);
            assert!(engine.verify_audit(SYSTEM_OWNER).unwrap().valid);
        }

        #[test]
        fn test_seed_only_into_empty_table() {
            let engine = engine();
            let seeds = vec![overseer_config::RuleSeed {
                condition: RuleCondition::default(),
                action: RuleAction::RequireApproval,
                threshold: Some(10.0),
            }];
            assert_eq!(engine.seed_rules(&seeds).unwrap(), 1);
            assert_eq!(engine.seed_rules(&seeds).unwrap(), 0);
            assert_eq!(engine.list_rules().unwrap()[0].created_by, overseer_engine::SEED_ACTOR);
        }
    }

    // ── Ledger ─────────────────────────────────────────────────

    mod ledger {
        use super::*;
        use overseer_policy::CeilingSource;

        #[test]
        fn test_stored_ceiling_overrides_config() {
            let mut config = OverseerConfig::default();
            config.ledger.owner_ceilings.insert("alice".into(), 40.0);
            let engine = engine_with(config);
            assert_eq!(engine.ceiling_for("alice").unwrap(), (40.0, CeilingSource::Config));
            engine.set_ceiling("alice", 5.0, "root").unwrap();
            assert_eq!(engine.ceiling_for("alice").unwrap(), (5.0, CeilingSource::Stored));

            let summary = engine.cost_summary("alice").unwrap();
            assert_eq!(summary.ceiling, 5.0);
            assert_eq!(summary.remaining, 5.0);
        }

        #[test]
        fn test_reserve_never_posts() {
            let engine = engine();
            let check = engine.reserve("alice", 500.0).unwrap();
            assert_eq!(check.outcome, Reservation::Deny);
            assert_eq!(engine.daily_cost("alice").unwrap(), 0.0);
        }

        #[test]
        fn test_post_rejects_negative() {
            let engine = engine();
            assert_eq!(engine.post_cost("alice", -3.0, "alice").unwrap_err().code(), "Validation");
            assert_eq!(engine.set_ceiling("alice", f64::NAN, "root").unwrap_err().code(), "Validation");
        }

        #[test]
        fn test_day_rollover_starts_fresh_total() {
            let (engine, clock) = engine_with_clock(OverseerConfig::default());
            engine.post_cost("alice", 30.0, "alice").unwrap();
            clock.advance(Duration::days(1));
            assert_eq!(engine.daily_cost("alice").unwrap(), 0.0);
            engine.post_cost("alice", 2.0, "alice").unwrap();
            let history = engine.cost_history("alice").unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].total_cost, 2.0);
            assert_eq!(history[1].total_cost, 30.0);
        }
    }

    // ── Properties ─────────────────────────────────────────────

    mod properties {
        use super::*;

        #[test]
        fn test_cost_monotonic_and_equals_sum_of_actuals() {
            let engine = engine();
            let session = open(&engine, "alice");
            let actuals = [1.25, 0.0, 7.5, 3.0];
            let mut last = 0.0;
            for actual in actuals {
                let submitted = submit(&engine, "alice", &session, "purchase", 1.0).unwrap();
                engine.mark_executing(submitted.task.id, "alice").unwrap();
                engine.mark_completed(submitted.task.id, "alice", actual).unwrap();
                let now = engine.daily_cost("alice").unwrap();
                assert!(now >= last);
                last = now;
            }
            assert_eq!(last, actuals.iter().sum::<f64>());
        }

        #[test]
        fn test_audit_count_matches_transitions() {
            let engine = engine();
            require_form_approval(&engine);
            let session = open(&engine, "alice"); // 1
            let auto = submit(&engine, "alice", &session, "navigate", 0.0).unwrap(); // 2
            let gated = submit(&engine, "alice", &session, "form_submit", 0.0).unwrap(); // 3, 4
            engine.mark_executing(auto.task.id, "alice").unwrap(); // 5
            engine.mark_completed(auto.task.id, "alice", 0.5).unwrap(); // 6
            engine
                .decide(gated.approval.unwrap().id, "rita", Decision::Deny)
                .unwrap(); // 7
            engine.close_session(session.id, "alice").unwrap(); // 8
            engine.close_session(session.id, "alice").unwrap(); // no transition

            // Rejected attempts are recorded but never as transitions
            let _ = engine.mark_executing(gated.task.id, "alice");

            assert_eq!(successes(&engine, "alice").len(), 8);
            let report = engine.verify_audit("alice").unwrap();
            assert!(report.valid, "{report:?}");
            assert_eq!(report.entries, 9);
        }

        #[test]
        fn test_events_published_after_commit() {
            let engine = engine();
            let mut rx = engine.subscribe();
            let session = open(&engine, "alice");
            match rx.try_recv().unwrap() {
                GovernanceEvent::SessionOpened { session_id, .. } => assert_eq!(session_id, session.id),
                other => panic!("unexpected event {other:?}"),
            }
            let _ = submit(&engine, "alice", &session, "purchase", -5.0);
            assert!(rx.try_recv().is_err());
        }
    }

    // ── Concurrency ────────────────────────────────────────────

    mod concurrency {
        use super::*;
        use std::sync::Barrier;

        fn file_engine(dir: &tempfile::TempDir) -> GovernanceEngine {
            let mut config = OverseerConfig::default();
            config.store.db_path = dir.path().join("overseer.db");
            config.ledger.default_daily_ceiling = 1_000_000.0;
            GovernanceEngine::open(Arc::new(RwLock::new(config))).unwrap()
        }

        #[test]
        fn test_concurrent_decisions_exactly_one_wins() {
            let dir = tempfile::tempdir().unwrap();
            let engine = file_engine(&dir);
            require_form_approval(&engine);
            let session = open(&engine, "alice");
            let approval = submit(&engine, "alice", &session, "form_submit", 1.0)
                .unwrap()
                .approval
                .unwrap();

            let barrier = Barrier::new(8);
            let results: Vec<Result<ApprovalRequest>> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..8)
                    .map(|i| {
                        let engine = engine.clone();
                        let barrier = &barrier;
                        s.spawn(move || {
                            barrier.wait();
                            let decision = if i % 2 == 0 { Decision::Approve } else { Decision::Deny };
                            engine.decide(approval.id, &format!("reviewer-{i}"), decision)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let wins = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(wins, 1);
            for r in results.iter().filter_map(|r| r.as_ref().err()) {
                assert_eq!(r.code(), "AlreadyResolved");
            }
            assert!(engine.verify_audit("alice").unwrap().valid);
        }

        #[test]
        fn test_close_and_submit_are_linearizable() {
            let dir = tempfile::tempdir().unwrap();
            let engine = file_engine(&dir);
            let session = open(&engine, "alice");

            let barrier = Barrier::new(5);
            let outcomes: Vec<Result<TaskStatus>> = std::thread::scope(|s| {
                let closer = {
                    let engine = engine.clone();
                    let barrier = &barrier;
                    s.spawn(move || {
                        barrier.wait();
                        engine.close_session(session.id, "alice").map(|_| TaskStatus::Denied)
                    })
                };
                let submitters: Vec<_> = (0..4)
                    .map(|_| {
                        let engine = engine.clone();
                        let barrier = &barrier;
                        let session = session.clone();
                        s.spawn(move || {
                            barrier.wait();
                            submit(&engine, "alice", &session, "navigate", 0.0).map(|s| s.task.status)
                        })
                    })
                    .collect();
                closer.join().unwrap().unwrap();
                submitters.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let accepted = outcomes.iter().filter(|o| o.is_ok()).count();
            for o in outcomes.iter().filter_map(|o| o.as_ref().err()) {
                assert_eq!(o.code(), "SessionClosed");
            }
            // Every accepted task was written before the close
            let tasks = engine.list_tasks(session.id, "alice").unwrap();
            assert_eq!(tasks.len(), accepted);
            let closed = engine.get_session(session.id, "alice").unwrap();
            let ended = closed.ended_at.unwrap();
            assert!(tasks.iter().all(|t| t.created_at <= ended));
            assert!(engine.verify_audit("alice").unwrap().valid);
        }

        #[test]
        fn test_concurrent_posts_sum_exactly() {
            let dir = tempfile::tempdir().unwrap();
            let engine = file_engine(&dir);
            std::thread::scope(|s| {
                for _ in 0..8 {
                    let engine = engine.clone();
                    s.spawn(move || {
                        for _ in 0..25 {
                            engine.post_cost("alice", 0.5, "alice").unwrap();
                        }
                    });
                }
            });
            assert_eq!(engine.daily_cost("alice").unwrap(), 100.0);
            let report = engine.verify_audit("alice").unwrap();
            assert!(report.valid);
            assert_eq!(report.entries, 200);
        }

        #[test]
        fn test_two_stores_on_one_file_share_chain() {
            let dir = tempfile::tempdir().unwrap();
            let a = file_engine(&dir);
            let b = file_engine(&dir);
            std::thread::scope(|s| {
                for engine in [a.clone(), b.clone()] {
                    s.spawn(move || {
                        for _ in 0..20 {
                            engine.post_cost("alice", 1.0, "alice").unwrap();
                        }
                    });
                }
            });
            assert_eq!(a.daily_cost("alice").unwrap(), 40.0);
            assert!(b.verify_audit("alice").unwrap().valid);
        }
    }
}
