use overseer_core::{
    ApprovalRequest, ApprovalStatus, GovernanceError, GovernanceEvent, Result, SessionId, Task,
    TaskId, TaskKind, TaskStatus,
};
use overseer_policy::budget::{BudgetCheck, resolve_ceiling};
use overseer_policy::classifier::{self, Classification};
use overseer_policy::rules::{self as policy_rules, EvaluationContext};
use overseer_store::{AuditRecord, Connection, approvals, audit, ledger, rules, sessions, tasks};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{GovernanceEngine, require_amount, require_non_empty};

/// A task submission as received from a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTask {
    pub session_id: SessionId,
    pub task_type: String,
    /// Falls back to a purchase `amount` in metadata, then 0.
    #[serde(default)]
    pub cost_estimate: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SubmitTask {
    fn resolved_estimate(&self) -> f64 {
        if let Some(estimate) = self.cost_estimate {
            return estimate;
        }
        match TaskKind::from_parts(&self.task_type, &self.metadata) {
            TaskKind::Purchase {
                amount: Some(amount),
                ..
            } => amount,
            _ => 0.0,
        }
    }
}

/// Result of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submitted {
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRequest>,
    pub classification: Classification,
}

/// Result of completing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completed {
    pub task: Task,
    pub daily_total: f64,
    pub drift: f64,
}

impl GovernanceEngine {
    /// Submit a task into an active session and classify it.
    ///
    /// The session check, classification inputs, task row, optional approval
    /// request, and both audit entries all land in one transaction, so a
    /// concurrent close either happens entirely before or entirely after.
    pub fn submit_task(&self, owner: &str, request: SubmitTask) -> Result<Submitted> {
        let target = request.session_id.to_string();
        let result = self.submit_inner(owner, &request);
        let submitted = self.audit_rejection(owner, "task.submit", "session", &target, result)?;

        info!(
            %owner,
            task_id = %submitted.task.id,
            task_type = %submitted.task.task_type,
            status = submitted.task.status.as_str(),
            "task submitted"
        );

        let mut events = vec![GovernanceEvent::TaskSubmitted {
            owner: owner.to_string(),
            task_id: submitted.task.id,
            session_id: submitted.task.session_id,
            status: submitted.task.status,
        }];
        if let Some(approval) = &submitted.approval {
            events.push(GovernanceEvent::ApprovalRequested {
                owner: owner.to_string(),
                approval_id: approval.id,
                task_id: approval.task_id,
                reason: approval.reason.clone(),
            });
        }
        self.publish(events);
        Ok(submitted)
    }

    fn submit_inner(&self, owner: &str, request: &SubmitTask) -> Result<Submitted> {
        require_non_empty("taskType", &request.task_type)?;
        let estimate = request.resolved_estimate();
        require_amount("costEstimate", estimate)?;

        let (ledger_config, approval_config, denial_window) = {
            let cfg = self.config.read();
            (cfg.ledger.clone(), cfg.approval.clone(), cfg.rules.denial_window)
        };
        let now = self.now();

        self.store.with_tx("task.submit", |tx| {
            let session = sessions::get(tx, request.session_id)?
                .filter(|s| s.owner == owner)
                .ok_or_else(|| GovernanceError::not_found("session", request.session_id))?;
            if !session.is_active() {
                return Err(GovernanceError::SessionClosed(session.id.to_string()));
            }

            // Classification inputs are read inside the transaction
            let recent = approvals::recent_resolutions(tx, owner, denial_window)?;
            let context = EvaluationContext::at(now, policy_rules::denial_rate(&recent));
            let heads = rules::heads(tx)?;
            let matched =
                policy_rules::evaluate(&heads, &request.task_type, &session.domain, estimate, &context);
            let used = ledger::daily_total(tx, owner, &ledger::day_key(now))?;
            let (limit, source) = resolve_ceiling(ledger::ceiling(tx, owner)?, &ledger_config, owner);
            let budget = BudgetCheck::reserve(owner, used, estimate, limit, source);
            let classification = classifier::classify(matched, budget, context);

            let mut task = Task {
                id: Uuid::new_v4(),
                session_id: session.id,
                owner: owner.to_string(),
                task_type: request.task_type.clone(),
                domain: session.domain.clone(),
                status: classification.task_status(),
                cost_estimate: estimate,
                actual_cost: None,
                requires_approval: classification.requires_approval(),
                approval_id: None,
                failure_reason: None,
                metadata: request.metadata.clone(),
                created_at: now,
                updated_at: now,
            };
            tasks::insert(tx, &task)?;
            sessions::touch(tx, session.id, now)?;
            audit::append(
                tx,
                &AuditRecord::success(
                    owner,
                    owner,
                    "task.submitted",
                    "task",
                    task.id,
                    json!({
                        "sessionId": session.id,
                        "taskType": task.task_type,
                        "domain": task.domain,
                        "costEstimate": estimate,
                        "status": task.status,
                        "classification": classification,
                    }),
                ),
                now,
            )?;

            let approval = match &classification.verdict {
                classifier::Verdict::RequireApproval { rule, reason } => {
                    let approval = ApprovalRequest {
                        id: Uuid::new_v4(),
                        task_id: task.id,
                        owner: owner.to_string(),
                        status: ApprovalStatus::Pending,
                        rule_triggered: *rule,
                        reason: reason.clone(),
                        tier: 0,
                        deadline: now + approval_config.timeout_for_tier(0),
                        decided_by: None,
                        decided_at: None,
                        created_at: now,
                    };
                    approvals::insert(tx, &approval)?;
                    tasks::link_approval(tx, task.id, approval.id)?;
                    task.approval_id = Some(approval.id);
                    audit::append(
                        tx,
                        &AuditRecord::success(
                            owner,
                            owner,
                            "approval.requested",
                            "approval",
                            approval.id,
                            json!({
                                "taskId": task.id,
                                "ruleTriggered": approval.rule_triggered,
                                "reason": approval.reason,
                                "tier": approval.tier,
                                "deadline": approval.deadline,
                            }),
                        ),
                        now,
                    )?;
                    Some(approval)
                }
                _ => None,
            };

            Ok(Submitted {
                task,
                approval,
                classification,
            })
        })
    }

    /// Fetch a task owned by `owner`.
    pub fn get_task(&self, id: TaskId, owner: &str) -> Result<Task> {
        self.store
            .read("task.get", |conn| tasks::get(conn, id))?
            .filter(|t| t.owner == owner)
            .ok_or_else(|| GovernanceError::not_found("task", id))
    }

    /// Tasks in one of `owner`'s sessions, newest first.
    pub fn list_tasks(&self, session_id: SessionId, owner: &str) -> Result<Vec<Task>> {
        self.get_session(session_id, owner)?;
        self.store
            .read("task.list", |conn| tasks::list_for_session(conn, session_id))
    }

    /// `approved -> executing`.
    pub fn mark_executing(&self, id: TaskId, owner: &str) -> Result<Task> {
        let now = self.now();
        let result = self.store.with_tx("task.execute", |tx| {
            let task = owned_task(tx, id, owner)?;
            let session = sessions::get(tx, task.session_id)?
                .ok_or_else(|| GovernanceError::not_found("session", task.session_id))?;
            if !session.is_active() {
                return Err(GovernanceError::SessionClosed(session.id.to_string()));
            }
            if task.status != TaskStatus::Approved {
                return Err(not_approved(&task));
            }
            if task.requires_approval {
                let approved = match task.approval_id {
                    Some(aid) => approvals::get(tx, aid)?
                        .is_some_and(|a| a.status == ApprovalStatus::Approved),
                    None => false,
                };
                if !approved {
                    return Err(not_approved(&task));
                }
            }
            if !tasks::transition(tx, id, TaskStatus::Approved, TaskStatus::Executing, now)? {
                return Err(not_approved(&task));
            }
            audit::append(
                tx,
                &AuditRecord::success(owner, owner, "task.executing", "task", id, json!({})),
                now,
            )?;
            reload(tx, id)
        });
        let task = self.audit_rejection(owner, "task.execute", "task", &id.to_string(), result)?;

        info!(%owner, task_id = %id, "task executing");
        self.publish(vec![GovernanceEvent::TaskStatusChanged {
            owner: owner.to_string(),
            task_id: id,
            status: task.status,
        }]);
        Ok(task)
    }

    /// `executing -> completed`, posting `actual_cost` to today's ledger row.
    pub fn mark_completed(&self, id: TaskId, owner: &str, actual_cost: f64) -> Result<Completed> {
        let now = self.now();
        let result = require_amount("actualCost", actual_cost).and_then(|_| {
            self.store.with_tx("task.complete", |tx| {
                let task = owned_task(tx, id, owner)?;
                if task.status != TaskStatus::Executing {
                    return Err(not_approved(&task));
                }
                if !tasks::complete(tx, id, actual_cost, now)? {
                    return Err(not_approved(&task));
                }
                let daily_total = ledger::post(tx, owner, actual_cost, now)?;
                let drift = actual_cost - task.cost_estimate;
                audit::append(
                    tx,
                    &AuditRecord::success(
                        owner,
                        owner,
                        "task.completed",
                        "task",
                        id,
                        json!({
                            "costEstimate": task.cost_estimate,
                            "actualCost": actual_cost,
                            "drift": drift,
                            "dailyTotal": daily_total,
                        }),
                    ),
                    now,
                )?;
                Ok(Completed {
                    task: reload(tx, id)?,
                    daily_total,
                    drift,
                })
            })
        });
        let completed = self.audit_rejection(owner, "task.complete", "task", &id.to_string(), result)?;

        let drift_ratio = self.config.read().ledger.drift_warn_ratio;
        let estimate = completed.task.cost_estimate;
        let relative = if estimate > 0.0 {
            completed.drift.abs() / estimate
        } else if completed.drift != 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        if completed.drift != 0.0 && relative > drift_ratio {
            warn!(
                %owner,
                task_id = %id,
                estimate,
                actual = actual_cost,
                drift = completed.drift,
                "actual cost drifted from estimate"
            );
        }
        info!(%owner, task_id = %id, actual_cost, daily_total = completed.daily_total, "task completed");

        self.publish(vec![
            GovernanceEvent::TaskStatusChanged {
                owner: owner.to_string(),
                task_id: id,
                status: TaskStatus::Completed,
            },
            GovernanceEvent::CostPosted {
                owner: owner.to_string(),
                amount: actual_cost,
                daily_total: completed.daily_total,
            },
        ]);
        Ok(completed)
    }

    /// `executing -> failed`. No cost is posted.
    pub fn mark_failed(&self, id: TaskId, owner: &str, reason: &str) -> Result<Task> {
        let now = self.now();
        let reason = if reason.trim().is_empty() { "unspecified" } else { reason };
        let result = self.store.with_tx("task.fail", |tx| {
            let task = owned_task(tx, id, owner)?;
            if task.status != TaskStatus::Executing {
                return Err(not_approved(&task));
            }
            if !tasks::fail(tx, id, reason, now)? {
                return Err(not_approved(&task));
            }
            audit::append(
                tx,
                &AuditRecord::success(owner, owner, "task.failed", "task", id, json!({ "reason": reason })),
                now,
            )?;
            reload(tx, id)
        });
        let task = self.audit_rejection(owner, "task.fail", "task", &id.to_string(), result)?;

        info!(%owner, task_id = %id, %reason, "task failed");
        self.publish(vec![GovernanceEvent::TaskStatusChanged {
            owner: owner.to_string(),
            task_id: id,
            status: TaskStatus::Failed,
        }]);
        Ok(task)
    }
}

fn owned_task(conn: &Connection, id: TaskId, owner: &str) -> Result<Task> {
    tasks::get(conn, id)?
        .filter(|t| t.owner == owner)
        .ok_or_else(|| GovernanceError::not_found("task", id))
}

fn reload(conn: &Connection, id: TaskId) -> Result<Task> {
    tasks::get(conn, id)?.ok_or_else(|| GovernanceError::Internal(format!("task {id} vanished")))
}

fn not_approved(task: &Task) -> GovernanceError {
    GovernanceError::NotApproved {
        task: task.id.to_string(),
        status: task.status.as_str().to_string(),
    }
}
