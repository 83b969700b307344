#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use overseer_core::*;
    use overseer_store::{AuditRecord, GovernanceStore};
    use serde_json::json;
    use uuid::Uuid;

    fn make_session(owner: &str) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            domain: "shop.test".into(),
            provider: "browser".into(),
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            metadata: serde_json::Map::new(),
            last_activity_at: now,
        }
    }

    fn make_task(session: &Session, status: TaskStatus) -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            session_id: session.id,
            owner: session.owner.clone(),
            task_type: "purchase".into(),
            domain: session.domain.clone(),
            status,
            cost_estimate: 10.0,
            actual_cost: None,
            requires_approval: status == TaskStatus::Pending,
            approval_id: None,
            failure_reason: None,
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    // ── Audit chain ────────────────────────────────────────────

    mod audit {
        use super::*;
        use overseer_store::audit;

        fn append(store: &GovernanceStore, owner: &str, action: &str) -> AuditEntry {
            store
                .with_tx("test", |tx| {
                    audit::append(
                        tx,
                        &AuditRecord::success(owner, owner, action, "session", "s-1", json!({"n": 1})),
                        Utc::now(),
                    )
                })
                .unwrap()
        }

        #[test]
        fn test_first_entry_links_to_genesis() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let entry = append(&store, "alice", "session.opened");
            assert_eq!(entry.seq, 1);
            assert_eq!(entry.prev_hash, GENESIS_HASH);
            assert_eq!(entry.entry_hash.len(), 64);
        }

        #[test]
        fn test_chains_are_per_owner() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let a1 = append(&store, "alice", "one");
            let b1 = append(&store, "bob", "one");
            let a2 = append(&store, "alice", "two");
            assert_eq!(b1.seq, 1);
            assert_eq!(b1.prev_hash, GENESIS_HASH);
            assert_eq!(a2.seq, 2);
            assert_eq!(a2.prev_hash, a1.entry_hash);
        }

        #[test]
        fn test_verify_clean_chain() {
            let store = GovernanceStore::open_in_memory().unwrap();
            for i in 0..5 {
                append(&store, "alice", &format!("step.{i}"));
            }
            let report = store.read("verify", |c| audit::verify_chain(c, "alice")).unwrap();
            assert!(report.valid, "{report:?}");
            assert_eq!(report.entries, 5);
        }

        #[test]
        fn test_verify_detects_payload_tamper() {
            let store = GovernanceStore::open_in_memory().unwrap();
            for i in 0..3 {
                append(&store, "alice", &format!("step.{i}"));
            }
            store
                .read("tamper", |c| {
                    c.execute(
                        "UPDATE audit_log SET payload = '{\"n\":2}' WHERE owner = 'alice' AND seq = 2",
                        [],
                    )
                    .map_err(overseer_store::store::sql_err)
                })
                .unwrap();
            let report = store.read("verify", |c| audit::verify_chain(c, "alice")).unwrap();
            assert!(!report.valid);
            assert_eq!(report.broken_at, Some(2));
        }

        #[test]
        fn test_verify_detects_truncated_tail() {
            let store = GovernanceStore::open_in_memory().unwrap();
            for i in 0..3 {
                append(&store, "alice", &format!("step.{i}"));
            }
            store
                .read("truncate", |c| {
                    c.execute("DELETE FROM audit_log WHERE owner = 'alice' AND seq = 3", [])
                        .map_err(overseer_store::store::sql_err)
                })
                .unwrap();
            let report = store.read("verify", |c| audit::verify_chain(c, "alice")).unwrap();
            assert!(!report.valid);
        }

        #[test]
        fn test_timestamps_never_go_backwards() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let now = Utc::now();
            let first = store
                .with_tx("t", |tx| {
                    audit::append(tx, &AuditRecord::success("alice", "alice", "a", "x", "1", json!({})), now)
                })
                .unwrap();
            let second = store
                .with_tx("t", |tx| {
                    audit::append(
                        tx,
                        &AuditRecord::success("alice", "alice", "b", "x", "1", json!({})),
                        now - Duration::seconds(30),
                    )
                })
                .unwrap();
            assert!(second.timestamp >= first.timestamp);
        }

        #[test]
        fn test_failed_record_carries_error_code() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let err = GovernanceError::SessionClosed("s-1".into());
            let entry = store
                .with_tx("t", |tx| {
                    audit::append(
                        tx,
                        &AuditRecord::failed("alice", "alice", "task.submit", "session", "s-1", &err),
                        Utc::now(),
                    )
                })
                .unwrap();
            assert_eq!(entry.outcome, AuditOutcome::Failed);
            assert_eq!(entry.payload["code"], "SessionClosed");
        }

        #[test]
        fn test_query_filters_by_time() {
            let store = GovernanceStore::open_in_memory().unwrap();
            append(&store, "alice", "a");
            let cutoff = Utc::now() + Duration::hours(1);
            let all = store.read("q", |c| audit::query(c, "alice", None, None)).unwrap();
            let none = store.read("q", |c| audit::query(c, "alice", Some(cutoff), None)).unwrap();
            assert_eq!(all.len(), 1);
            assert!(none.is_empty());
        }

        #[test]
        fn test_rollback_discards_audit_entry() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let result: Result<()> = store.with_tx("t", |tx| {
                audit::append(tx, &AuditRecord::success("alice", "alice", "a", "x", "1", json!({})), Utc::now())?;
                Err(GovernanceError::Validation("nope".into()))
            });
            assert!(result.is_err());
            let entries = store.read("q", |c| audit::query(c, "alice", None, None)).unwrap();
            assert!(entries.is_empty());
        }
    }

    // ── Retry ──────────────────────────────────────────────────

    mod retry {
        use super::*;
        use std::cell::Cell;

        #[test]
        fn test_transient_errors_are_retried() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let attempts = Cell::new(0);
            let value = store
                .with_tx("flaky", |_tx| {
                    attempts.set(attempts.get() + 1);
                    if attempts.get() < 3 {
                        Err(GovernanceError::transient("database is locked"))
                    } else {
                        Ok(7)
                    }
                })
                .unwrap();
            assert_eq!(value, 7);
            assert_eq!(attempts.get(), 3);
        }

        #[test]
        fn test_exhausted_retries_surface_internal() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let err = store
                .with_tx("always", |_tx| -> Result<()> { Err(GovernanceError::transient("busy")) })
                .unwrap_err();
            assert_eq!(err.code(), "Internal");
            assert!(!err.is_transient());
        }

        #[test]
        fn test_permanent_errors_are_not_retried() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let attempts = Cell::new(0);
            let err = store
                .with_tx("bad", |_tx| -> Result<()> {
                    attempts.set(attempts.get() + 1);
                    Err(GovernanceError::Validation("bad".into()))
                })
                .unwrap_err();
            assert_eq!(err.code(), "Validation");
            assert_eq!(attempts.get(), 1);
        }
    }

    // ── Rows ───────────────────────────────────────────────────

    mod rows {
        use super::*;
        use overseer_store::{approvals, ledger, rules, sessions, tasks};

        #[test]
        fn test_session_close_only_once() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let session = make_session("alice");
            store.with_tx("t", |tx| sessions::insert(tx, &session)).unwrap();
            let first = store
                .with_tx("t", |tx| sessions::close_if_active(tx, session.id, Utc::now()))
                .unwrap();
            let second = store
                .with_tx("t", |tx| sessions::close_if_active(tx, session.id, Utc::now()))
                .unwrap();
            assert!(first);
            assert!(!second);
            let stored = store.read("g", |c| sessions::get(c, session.id)).unwrap().unwrap();
            assert_eq!(stored.status, SessionStatus::Closed);
            assert!(stored.ended_at.is_some());
        }

        #[test]
        fn test_idle_close_skips_recent_activity() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let mut session = make_session("alice");
            let scanned_at = Utc::now();
            session.last_activity_at = scanned_at - Duration::hours(2);
            store.with_tx("t", |tx| sessions::insert(tx, &session)).unwrap();
            let cutoff = scanned_at - Duration::hours(1);

            // Activity lands between the idle scan and the close
            store.with_tx("t", |tx| sessions::touch(tx, session.id, scanned_at)).unwrap();
            let closed = store
                .with_tx("t", |tx| sessions::close_if_idle(tx, session.id, cutoff, Utc::now()))
                .unwrap();
            assert!(!closed);
            let stored = store.read("g", |c| sessions::get(c, session.id)).unwrap().unwrap();
            assert_eq!(stored.status, SessionStatus::Active);

            let later = scanned_at + Duration::hours(2);
            let closed = store
                .with_tx("t", |tx| sessions::close_if_idle(tx, session.id, later - Duration::hours(1), later))
                .unwrap();
            assert!(closed);
        }

        #[test]
        fn test_session_metadata_roundtrip() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let mut session = make_session("alice");
            session.metadata.insert("agent".into(), json!("buyer-1"));
            store.with_tx("t", |tx| sessions::insert(tx, &session)).unwrap();
            let stored = store.read("g", |c| sessions::get(c, session.id)).unwrap().unwrap();
            assert_eq!(stored, session_with_micros(&session));
        }

        // Stored timestamps keep microsecond precision.
        fn session_with_micros(s: &Session) -> Session {
            let trunc = |t: chrono::DateTime<Utc>| {
                chrono::DateTime::parse_from_rfc3339(&overseer_store::store::ts(t))
                    .unwrap()
                    .with_timezone(&Utc)
            };
            Session {
                started_at: trunc(s.started_at),
                last_activity_at: trunc(s.last_activity_at),
                ..s.clone()
            }
        }

        #[test]
        fn test_task_transition_is_conditional() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let session = make_session("alice");
            let task = make_task(&session, TaskStatus::Approved);
            store
                .with_tx("t", |tx| {
                    sessions::insert(tx, &session)?;
                    tasks::insert(tx, &task)
                })
                .unwrap();
            let from_pending = store
                .with_tx("t", |tx| {
                    tasks::transition(tx, task.id, TaskStatus::Pending, TaskStatus::Executing, Utc::now())
                })
                .unwrap();
            assert!(!from_pending);
            let from_approved = store
                .with_tx("t", |tx| {
                    tasks::transition(tx, task.id, TaskStatus::Approved, TaskStatus::Executing, Utc::now())
                })
                .unwrap();
            assert!(from_approved);
            assert!(store.with_tx("t", |tx| tasks::complete(tx, task.id, 9.5, Utc::now())).unwrap());
            let stored = store.read("g", |c| tasks::get(c, task.id)).unwrap().unwrap();
            assert_eq!(stored.status, TaskStatus::Completed);
            assert_eq!(stored.actual_cost, Some(9.5));
        }

        #[test]
        fn test_approval_resolves_exactly_once() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let session = make_session("alice");
            let task = make_task(&session, TaskStatus::Pending);
            let now = Utc::now();
            let approval = ApprovalRequest {
                id: Uuid::new_v4(),
                task_id: task.id,
                owner: "alice".into(),
                status: ApprovalStatus::Pending,
                rule_triggered: None,
                reason: "ceiling".into(),
                tier: 0,
                deadline: now + Duration::minutes(5),
                decided_by: None,
                decided_at: None,
                created_at: now,
            };
            store
                .with_tx("t", |tx| {
                    sessions::insert(tx, &session)?;
                    tasks::insert(tx, &task)?;
                    approvals::insert(tx, &approval)
                })
                .unwrap();

            let won = store
                .with_tx("t", |tx| {
                    approvals::resolve_before_deadline(tx, approval.id, ApprovalStatus::Approved, "rita", Utc::now())
                })
                .unwrap();
            let lost = store
                .with_tx("t", |tx| {
                    approvals::resolve_before_deadline(tx, approval.id, ApprovalStatus::Denied, "rob", Utc::now())
                })
                .unwrap();
            assert!(won);
            assert!(!lost);
            let stored = store.read("g", |c| approvals::get(c, approval.id)).unwrap().unwrap();
            assert_eq!(stored.status, ApprovalStatus::Approved);
            assert_eq!(stored.decided_by.as_deref(), Some("rita"));
        }

        #[test]
        fn test_approval_past_deadline_cannot_be_decided() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let session = make_session("alice");
            let task = make_task(&session, TaskStatus::Pending);
            let now = Utc::now();
            let approval = ApprovalRequest {
                id: Uuid::new_v4(),
                task_id: task.id,
                owner: "alice".into(),
                status: ApprovalStatus::Pending,
                rule_triggered: None,
                reason: "rule".into(),
                tier: 0,
                deadline: now - Duration::seconds(1),
                decided_by: None,
                decided_at: None,
                created_at: now - Duration::minutes(1),
            };
            store
                .with_tx("t", |tx| {
                    sessions::insert(tx, &session)?;
                    tasks::insert(tx, &task)?;
                    approvals::insert(tx, &approval)
                })
                .unwrap();
            let decided = store
                .with_tx("t", |tx| {
                    approvals::resolve_before_deadline(tx, approval.id, ApprovalStatus::Approved, "rita", now)
                })
                .unwrap();
            assert!(!decided);
            let overdue = store.read("o", |c| approvals::overdue(c, now)).unwrap();
            assert_eq!(overdue.len(), 1);
            assert!(store.with_tx("t", |tx| approvals::expire_if_open(tx, approval.id, "system:reaper", now)).unwrap());
        }

        #[test]
        fn test_ledger_post_accumulates() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let now = Utc::now();
            store.with_tx("t", |tx| ledger::post(tx, "alice", 2.5, now)).unwrap();
            let total = store.with_tx("t", |tx| ledger::post(tx, "alice", 4.0, now)).unwrap();
            assert_eq!(total, 6.5);
            let day = ledger::day_key(now);
            assert_eq!(store.read("r", |c| ledger::daily_total(c, "alice", &day)).unwrap(), 6.5);
            assert_eq!(store.read("r", |c| ledger::daily_total(c, "bob", &day)).unwrap(), 0.0);
        }

        #[test]
        fn test_ledger_rejects_negative_amount() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let err = store
                .with_tx("t", |tx| ledger::post(tx, "alice", -1.0, Utc::now()))
                .unwrap_err();
            assert_eq!(err.code(), "Validation");
            let err = store
                .with_tx("t", |tx| ledger::post(tx, "alice", f64::NAN, Utc::now()))
                .unwrap_err();
            assert_eq!(err.code(), "Validation");
        }

        #[test]
        fn test_ledger_day_keys_are_separate() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let today = Utc::now();
            let yesterday = today - Duration::days(1);
            store.with_tx("t", |tx| ledger::post(tx, "alice", 3.0, yesterday)).unwrap();
            store.with_tx("t", |tx| ledger::post(tx, "alice", 1.0, today)).unwrap();
            let history = store.read("h", |c| ledger::history(c, "alice")).unwrap();
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].day, ledger::day_key(today));
            assert_eq!(history[0].total_cost, 1.0);
        }

        #[test]
        fn test_rule_version_collision_is_conflict() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let rule = AdaptiveRule {
                id: Uuid::new_v4(),
                version: 1,
                condition: RuleCondition::default(),
                action: RuleAction::RequireApproval,
                threshold: None,
                enabled: true,
                superseded: false,
                created_by: "root".into(),
                created_at: Utc::now(),
            };
            store.with_tx("t", |tx| rules::insert_version(tx, &rule)).unwrap();
            let err = store
                .with_tx("t", |tx| rules::insert_version(tx, &rule))
                .unwrap_err();
            assert_eq!(err.code(), "RuleConflict");
        }

        #[test]
        fn test_rule_heads_pick_highest_version() {
            let store = GovernanceStore::open_in_memory().unwrap();
            let v1 = AdaptiveRule {
                id: Uuid::new_v4(),
                version: 1,
                condition: RuleCondition {
                    task_type: Some("purchase".into()),
                    ..Default::default()
                },
                action: RuleAction::RequireApproval,
                threshold: Some(50.0),
                enabled: true,
                superseded: false,
                created_by: "root".into(),
                created_at: Utc::now(),
            };
            let v2 = AdaptiveRule {
                version: 2,
                threshold: Some(20.0),
                ..v1.clone()
            };
            store
                .with_tx("t", |tx| {
                    rules::insert_version(tx, &v1)?;
                    rules::mark_superseded(tx, v1.id, 1)?;
                    rules::insert_version(tx, &v2)
                })
                .unwrap();
            let heads = store.read("h", rules::heads).unwrap();
            assert_eq!(heads.len(), 1);
            assert_eq!(heads[0].version, 2);
            assert_eq!(heads[0].threshold, Some(20.0));
            let history = store.read("h", |c| rules::history(c, v1.id)).unwrap();
            assert!(history[0].superseded);
            assert!(!history[1].superseded);
        }
    }

    // ── File-backed store ──────────────────────────────────────

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overseer.db");
        let session = make_session("alice");
        {
            let store = GovernanceStore::open(&path).unwrap();
            store
                .with_tx("t", |tx| overseer_store::sessions::insert(tx, &session))
                .unwrap();
        }
        let store = GovernanceStore::open(&path).unwrap();
        let stored = store
            .read("g", |c| overseer_store::sessions::get(c, session.id))
            .unwrap();
        assert!(stored.is_some());
    }
}
