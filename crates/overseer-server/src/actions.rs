//! The action API: one JSON body per call, keyed by `action`.

use chrono::{DateTime, Utc};
use overseer_core::{
    ApprovalId, ApprovalStatus, Decision, GovernanceError, Result, RuleAction, RuleCondition,
    RuleId, SessionId, TaskId,
};
use overseer_engine::{GovernanceEngine, RuleUpdate, SubmitTask};
use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Every action the API accepts.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Action {
    // ── Sessions ───────────────────────────────────────────────
    Create {
        domain: String,
        provider: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Get {
        session_id: SessionId,
    },
    List,
    Close {
        session_id: SessionId,
    },

    // ── Tasks ──────────────────────────────────────────────────
    AddTask {
        session_id: SessionId,
        task_type: String,
        #[serde(default)]
        cost_estimate: Option<f64>,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    GetTask {
        task_id: TaskId,
    },
    ListTasks {
        session_id: SessionId,
    },
    MarkExecuting {
        task_id: TaskId,
    },
    MarkCompleted {
        task_id: TaskId,
        actual_cost: f64,
    },
    MarkFailed {
        task_id: TaskId,
        #[serde(default)]
        reason: String,
    },

    // ── Ledger & audit ─────────────────────────────────────────
    GetCost,
    GetAudit {
        #[serde(default)]
        from_time: Option<DateTime<Utc>>,
        #[serde(default)]
        to_time: Option<DateTime<Utc>>,
    },
    VerifyAudit,

    // ── Reviewers ──────────────────────────────────────────────
    ListApprovals {
        #[serde(default)]
        status: Option<ApprovalStatus>,
    },
    Decide {
        approval_id: ApprovalId,
        decision: Decision,
    },

    // ── Rules (admins, except list) ────────────────────────────
    ListRules,
    AddRule {
        #[serde(default)]
        condition: RuleCondition,
        rule_action: RuleAction,
        #[serde(default)]
        threshold: Option<f64>,
    },
    UpdateRule {
        rule_id: RuleId,
        #[serde(default)]
        condition: Option<RuleCondition>,
        #[serde(default)]
        rule_action: Option<RuleAction>,
        #[serde(default)]
        threshold: Option<f64>,
        /// Drop the threshold; wins over `threshold`.
        #[serde(default)]
        clear_threshold: bool,
        #[serde(default)]
        base_version: Option<u32>,
    },
    DisableRule {
        rule_id: RuleId,
    },
    EnableRule {
        rule_id: RuleId,
    },
    SetCeiling {
        owner: String,
        daily_limit: f64,
    },
}

/// Action names, for telling an unknown action apart from a malformed one.
pub const ACTIONS: &[&str] = &[
    "create",
    "get",
    "list",
    "close",
    "add_task",
    "get_task",
    "list_tasks",
    "mark_executing",
    "mark_completed",
    "mark_failed",
    "get_cost",
    "get_audit",
    "verify_audit",
    "list_approvals",
    "decide",
    "list_rules",
    "add_rule",
    "update_rule",
    "disable_rule",
    "enable_rule",
    "set_ceiling",
];

/// Role an action needs beyond a valid token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Reviewer,
    Admin,
}

impl Action {
    /// Parse a request body. Unknown and malformed actions are both `Validation`.
    pub fn parse(body: Value) -> Result<Self> {
        let name = body
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| GovernanceError::Validation("missing 'action'".into()))?;
        if !ACTIONS.contains(&name) {
            return Err(GovernanceError::Validation(format!("unknown action '{name}'")));
        }
        let name = name.to_string();
        serde_json::from_value(body)
            .map_err(|e| GovernanceError::Validation(format!("invalid '{name}' request: {e}")))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Get { .. } => "get",
            Self::List => "list",
            Self::Close { .. } => "close",
            Self::AddTask { .. } => "add_task",
            Self::GetTask { .. } => "get_task",
            Self::ListTasks { .. } => "list_tasks",
            Self::MarkExecuting { .. } => "mark_executing",
            Self::MarkCompleted { .. } => "mark_completed",
            Self::MarkFailed { .. } => "mark_failed",
            Self::GetCost => "get_cost",
            Self::GetAudit { .. } => "get_audit",
            Self::VerifyAudit => "verify_audit",
            Self::ListApprovals { .. } => "list_approvals",
            Self::Decide { .. } => "decide",
            Self::ListRules => "list_rules",
            Self::AddRule { .. } => "add_rule",
            Self::UpdateRule { .. } => "update_rule",
            Self::DisableRule { .. } => "disable_rule",
            Self::EnableRule { .. } => "enable_rule",
            Self::SetCeiling { .. } => "set_ceiling",
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::ListApprovals { .. } | Self::Decide { .. } => Role::Reviewer,
            Self::AddRule { .. }
            | Self::UpdateRule { .. }
            | Self::DisableRule { .. }
            | Self::EnableRule { .. }
            | Self::SetCeiling { .. } => Role::Admin,
            _ => Role::Owner,
        }
    }

    /// Run the action as `caller`. Blocking: call from `spawn_blocking`.
    pub fn dispatch(self, engine: &GovernanceEngine, caller: &str) -> Result<Value> {
        let value = match self {
            Self::Create {
                domain,
                provider,
                metadata,
            } => {
                let session = engine.open_session(caller, &domain, &provider, metadata)?;
                json!({ "sessionId": session.id, "status": session.status })
            }
            Self::Get { session_id } => serde_json::to_value(engine.get_session(session_id, caller)?)?,
            Self::List => serde_json::to_value(engine.list_sessions(caller)?)?,
            Self::Close { session_id } => {
                serde_json::to_value(engine.close_session(session_id, caller)?)?
            }

            Self::AddTask {
                session_id,
                task_type,
                cost_estimate,
                metadata,
            } => {
                let submitted = engine.submit_task(
                    caller,
                    SubmitTask {
                        session_id,
                        task_type,
                        cost_estimate,
                        metadata,
                    },
                )?;
                let mut out = json!({
                    "taskId": submitted.task.id,
                    "status": submitted.task.status,
                    "classification": submitted.classification,
                });
                if let Some(approval) = submitted.approval {
                    out["approvalId"] = json!(approval.id);
                    out["deadline"] = json!(approval.deadline);
                }
                out
            }
            Self::GetTask { task_id } => serde_json::to_value(engine.get_task(task_id, caller)?)?,
            Self::ListTasks { session_id } => {
                serde_json::to_value(engine.list_tasks(session_id, caller)?)?
            }
            Self::MarkExecuting { task_id } => {
                serde_json::to_value(engine.mark_executing(task_id, caller)?)?
            }
            Self::MarkCompleted {
                task_id,
                actual_cost,
            } => serde_json::to_value(engine.mark_completed(task_id, caller, actual_cost)?.task)?,
            Self::MarkFailed { task_id, reason } => {
                serde_json::to_value(engine.mark_failed(task_id, caller, &reason)?)?
            }

            Self::GetCost => serde_json::to_value(engine.cost_summary(caller)?)?,
            Self::GetAudit { from_time, to_time } => {
                serde_json::to_value(engine.query_audit(caller, from_time, to_time)?)?
            }
            Self::VerifyAudit => serde_json::to_value(engine.verify_audit(caller)?)?,

            Self::ListApprovals { status } => serde_json::to_value(engine.list_approvals(status)?)?,
            Self::Decide {
                approval_id,
                decision,
            } => serde_json::to_value(engine.decide(approval_id, caller, decision)?)?,

            Self::ListRules => serde_json::to_value(engine.list_rules()?)?,
            Self::AddRule {
                condition,
                rule_action,
                threshold,
            } => serde_json::to_value(engine.add_rule(condition, rule_action, threshold, caller)?)?,
            Self::UpdateRule {
                rule_id,
                condition,
                rule_action,
                threshold,
                clear_threshold,
                base_version,
            } => {
                let threshold = if clear_threshold {
                    Some(None)
                } else {
                    threshold.map(Some)
                };
                let update = RuleUpdate {
                    condition,
                    action: rule_action,
                    threshold,
                    base_version,
                };
                serde_json::to_value(engine.update_rule(rule_id, update, caller)?)?
            }
            Self::DisableRule { rule_id } => {
                serde_json::to_value(engine.disable_rule(rule_id, caller)?)?
            }
            Self::EnableRule { rule_id } => serde_json::to_value(engine.enable_rule(rule_id, caller)?)?,
            Self::SetCeiling { owner, daily_limit } => {
                serde_json::to_value(engine.set_ceiling(&owner, daily_limit, caller)?)?
            }
        };
        Ok(value)
    }
}
