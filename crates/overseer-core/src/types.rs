use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::task::TaskKind;

/// Unique identifier for a session.
pub type SessionId = Uuid;

/// Unique identifier for a task.
pub type TaskId = Uuid;

/// Unique identifier for an approval request.
pub type ApprovalId = Uuid;

/// Unique identifier for an adaptive rule (stable across versions).
pub type RuleId = Uuid;

/// Owner identity as resolved from a bearer credential.
pub type Owner = String;

/// Audit chain key for transitions that belong to no single owner (rule changes).
pub const SYSTEM_OWNER: &str = "system";

/// `prevHash` of the first entry in every audit chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ── Statuses ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Approved,
    Denied,
    Executing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "executing" => Some(Self::Executing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Denied | Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Escalated,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Escalated => "escalated",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "escalated" => Some(Self::Escalated),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// `pending` and `escalated` still accept decisions.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Escalated)
    }
}

/// A reviewer's decision on an open approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    #[serde(alias = "approved")]
    Approve,
    #[serde(alias = "denied")]
    Deny,
    #[serde(alias = "escalated")]
    Escalate,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Approve => "approve",
            Self::Deny => "deny",
            Self::Escalate => "escalate",
        })
    }
}

// ── Session ────────────────────────────────────────────────────

/// A bounded unit of agent-provider interaction under one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub owner: Owner,
    pub domain: String,
    pub provider: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Start time or most recent task submission; drives the idle reaper.
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

// ── Task ───────────────────────────────────────────────────────

/// A discrete unit of agent-requested work scoped to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub session_id: SessionId,
    pub owner: Owner,
    pub task_type: String,
    pub domain: String,
    pub status: TaskStatus,
    pub cost_estimate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_cost: Option<f64>,
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<ApprovalId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Typed view over `task_type` + `metadata`.
    pub fn kind(&self) -> TaskKind {
        TaskKind::from_parts(&self.task_type, &self.metadata)
    }
}

// ── Cost ledger ────────────────────────────────────────────────

/// Per-owner, per-UTC-day spend aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostRecord {
    pub owner: Owner,
    /// `YYYY-MM-DD` in UTC.
    pub day: String,
    pub total_cost: f64,
    pub updated_at: DateTime<Utc>,
}

/// Per-owner daily ceiling override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetCeiling {
    pub owner: Owner,
    pub daily_limit: f64,
}

/// Outcome of a soft reservation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reservation {
    Allow,
    Deny,
}

// ── Approval ───────────────────────────────────────────────────

/// Human-review workflow item blocking a risky task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub task_id: TaskId,
    pub owner: Owner,
    pub status: ApprovalStatus,
    /// Rule that forced review; `None` when only the budget ceiling did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_triggered: Option<RuleId>,
    pub reason: String,
    /// Reviewer tier; escalation increments it.
    pub tier: u32,
    pub deadline: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ── Adaptive rules ─────────────────────────────────────────────

/// What a matching rule asks the classifier to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleAction {
    RequireApproval,
    /// Matches without forcing review; only its cost threshold applies.
    Allow,
    Deny,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequireApproval => "requireApproval",
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requireApproval" | "require_approval" => Some(Self::RequireApproval),
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

/// UTC hour window `[start, end)`; wraps midnight when `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Conjunction of optional predicates; an empty condition matches every task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    /// Exact domain, or `*.example.com` to match any subdomain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_utc: Option<HourWindow>,
    /// Matches when the owner's recent denial rate is at or above this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_denial_rate: Option<f64>,
}

/// One version of a versioned policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptiveRule {
    pub id: RuleId,
    pub version: u32,
    pub condition: RuleCondition,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub enabled: bool,
    pub superseded: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// ── Audit ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    /// Attempted-but-rejected action; never counts as a transition.
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One link in an owner's hash-chained audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub owner: Owner,
    pub seq: u64,
    pub actor: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub outcome: AuditOutcome,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Result of re-walking an owner's audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    pub owner: Owner,
    pub entries: u64,
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}
