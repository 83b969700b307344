use chrono::{DateTime, Utc};
use overseer_core::{
    ApprovalId, ApprovalRequest, ApprovalStatus, Decision, GovernanceError, GovernanceEvent,
    Result, TaskStatus,
};
use overseer_store::{AuditRecord, Connection, approvals, audit, tasks};
use serde_json::json;
use tracing::{info, warn};

use crate::engine::{GovernanceEngine, REAPER_ACTOR, require_non_empty};

/// How a decision transaction ended.
enum DecideOutcome {
    Applied(ApprovalRequest),
    /// The deadline had passed; the request was expired instead.
    Late(ApprovalRequest),
}

impl GovernanceEngine {
    /// Record a reviewer decision.
    ///
    /// Exactly one of several concurrent deciders wins; the rest get
    /// `AlreadyResolved`. A decision that arrives after the deadline expires
    /// the request and the task is denied.
    pub fn decide(&self, approval_id: ApprovalId, reviewer: &str, decision: Decision) -> Result<ApprovalRequest> {
        let result = require_non_empty("reviewer", reviewer).and_then(|_| self.decide_inner(approval_id, reviewer, decision));
        let outcome = self.audit_rejection(
            reviewer,
            &format!("approval.{decision}"),
            "approval",
            &approval_id.to_string(),
            result,
        )?;

        match outcome {
            DecideOutcome::Applied(approval) => {
                info!(
                    approval_id = %approval.id,
                    %reviewer,
                    status = approval.status.as_str(),
                    tier = approval.tier,
                    "approval decided"
                );
                self.publish_resolution(&approval);
                Ok(approval)
            }
            DecideOutcome::Late(approval) => {
                warn!(approval_id = %approval.id, %reviewer, "decision arrived after deadline, request expired");
                self.publish_resolution(&approval);
                let err = GovernanceError::AlreadyResolved {
                    approval: approval.id.to_string(),
                    status: approval.status.as_str().to_string(),
                };
                self.record_failure(
                    reviewer,
                    reviewer,
                    &format!("approval.{decision}"),
                    "approval",
                    &approval.id.to_string(),
                    &err,
                );
                Err(err)
            }
        }
    }

    fn decide_inner(&self, id: ApprovalId, reviewer: &str, decision: Decision) -> Result<DecideOutcome> {
        let approval_config = self.config.read().approval.clone();
        let now = self.now();

        self.store.with_tx("approval.decide", |tx| {
            let approval =
                approvals::get(tx, id)?.ok_or_else(|| GovernanceError::not_found("approval", id))?;
            if !approval.status.is_open() {
                return Err(already_resolved(&approval));
            }
            if approval.deadline <= now {
                let expired = expire_in_tx(tx, &approval, reviewer, "deadline passed before decision", now)?;
                return Ok(DecideOutcome::Late(expired));
            }

            let (applied, task_status, payload) = match decision {
                Decision::Approve | Decision::Deny => {
                    let (to, task_to) = if decision == Decision::Approve {
                        (ApprovalStatus::Approved, TaskStatus::Approved)
                    } else {
                        (ApprovalStatus::Denied, TaskStatus::Denied)
                    };
                    let applied = approvals::resolve_before_deadline(tx, id, to, reviewer, now)?;
                    (applied, Some(task_to), json!({ "taskId": approval.task_id, "tier": approval.tier }))
                }
                Decision::Escalate => {
                    let next_tier = approval.tier + 1;
                    if next_tier > approval_config.max_escalation_tier {
                        return Err(GovernanceError::Validation(format!(
                            "approval {id} is at tier {}, the highest allowed",
                            approval.tier
                        )));
                    }
                    let deadline = now + approval_config.timeout_for_tier(next_tier);
                    let applied =
                        approvals::escalate_before_deadline(tx, id, next_tier, deadline, reviewer, now)?;
                    (
                        applied,
                        None,
                        json!({
                            "taskId": approval.task_id,
                            "fromTier": approval.tier,
                            "tier": next_tier,
                            "deadline": deadline,
                        }),
                    )
                }
            };
            if !applied {
                let current = approvals::get(tx, id)?.unwrap_or(approval);
                return Err(already_resolved(&current));
            }

            if let Some(task_to) = task_status {
                if !tasks::transition(tx, approval.task_id, TaskStatus::Pending, task_to, now)? {
                    return Err(GovernanceError::Internal(format!(
                        "task {} was not pending while its approval was open",
                        approval.task_id
                    )));
                }
            }

            let updated = approvals::get(tx, id)?
                .ok_or_else(|| GovernanceError::Internal(format!("approval {id} vanished")))?;
            audit::append(
                tx,
                &AuditRecord::success(
                    &approval.owner,
                    reviewer,
                    format!("approval.{}", updated.status.as_str()),
                    "approval",
                    id,
                    payload,
                ),
                now,
            )?;
            Ok(DecideOutcome::Applied(updated))
        })
    }

    /// Expire an open request; its task becomes `denied`.
    pub fn expire(&self, approval_id: ApprovalId, actor: &str) -> Result<ApprovalRequest> {
        let now = self.now();
        let result = self.store.with_tx("approval.expire", |tx| {
            let approval = approvals::get(tx, approval_id)?
                .ok_or_else(|| GovernanceError::not_found("approval", approval_id))?;
            if !approval.status.is_open() {
                return Err(already_resolved(&approval));
            }
            expire_in_tx(tx, &approval, actor, "expired", now)
        });
        let approval = self.audit_rejection(actor, "approval.expire", "approval", &approval_id.to_string(), result)?;

        info!(approval_id = %approval.id, actor, "approval expired");
        self.publish_resolution(&approval);
        Ok(approval)
    }

    /// Expire every open request whose deadline has passed.
    pub fn expire_due(&self) -> Result<Vec<ApprovalId>> {
        let now = self.now();
        let overdue = self
            .store
            .read("approval.overdue", |conn| approvals::overdue(conn, now))?;

        let mut expired = Vec::with_capacity(overdue.len());
        for approval in overdue {
            match self.expire(approval.id, REAPER_ACTOR) {
                Ok(a) => expired.push(a.id),
                // A reviewer got there first
                Err(GovernanceError::AlreadyResolved { .. }) => {}
                // Already audited by `expire`; the rest of the sweep still runs
                Err(e) => warn!(approval_id = %approval.id, error = %e, "could not expire overdue approval"),
            }
        }
        Ok(expired)
    }

    pub fn get_approval(&self, id: ApprovalId) -> Result<ApprovalRequest> {
        self.store
            .read("approval.get", |conn| approvals::get(conn, id))?
            .ok_or_else(|| GovernanceError::not_found("approval", id))
    }

    /// Reviewer view of the queue, oldest deadline first.
    pub fn list_approvals(&self, status: Option<ApprovalStatus>) -> Result<Vec<ApprovalRequest>> {
        self.store
            .read("approval.list", |conn| approvals::list(conn, status))
    }

    fn publish_resolution(&self, approval: &ApprovalRequest) {
        let mut events = vec![GovernanceEvent::ApprovalResolved {
            owner: approval.owner.clone(),
            approval_id: approval.id,
            task_id: approval.task_id,
            status: approval.status,
        }];
        let task_status = match approval.status {
            ApprovalStatus::Approved => Some(TaskStatus::Approved),
            ApprovalStatus::Denied | ApprovalStatus::Expired => Some(TaskStatus::Denied),
            _ => None,
        };
        if let Some(status) = task_status {
            events.push(GovernanceEvent::TaskStatusChanged {
                owner: approval.owner.clone(),
                task_id: approval.task_id,
                status,
            });
        }
        self.publish(events);
    }
}

fn expire_in_tx(
    tx: &Connection,
    approval: &ApprovalRequest,
    actor: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<ApprovalRequest> {
    if !approvals::expire_if_open(tx, approval.id, actor, now)? {
        return Err(already_resolved(approval));
    }
    if !tasks::transition(tx, approval.task_id, TaskStatus::Pending, TaskStatus::Denied, now)? {
        return Err(GovernanceError::Internal(format!(
            "task {} was not pending while its approval was open",
            approval.task_id
        )));
    }
    audit::append(
        tx,
        &AuditRecord::success(
            &approval.owner,
            actor,
            "approval.expired",
            "approval",
            approval.id,
            json!({ "taskId": approval.task_id, "tier": approval.tier, "reason": reason, "deadline": approval.deadline }),
        ),
        now,
    )?;
    approvals::get(tx, approval.id)?
        .ok_or_else(|| GovernanceError::Internal(format!("approval {} vanished", approval.id)))
}

fn already_resolved(approval: &ApprovalRequest) -> GovernanceError {
    GovernanceError::AlreadyResolved {
        approval: approval.id.to_string(),
        status: approval.status.as_str().to_string(),
    }
}
