use overseer_core::{RuleAction, RuleId, TaskStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::budget::BudgetCheck;
use crate::rules::{EvaluationContext, MatchedRule};

/// What happens to a submitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    AutoClear,
    RequireApproval {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rule: Option<RuleId>,
        reason: String,
    },
    Deny { rule: RuleId, reason: String },
}

/// Full record of how a task was classified. Stored in the `task.submitted`
/// audit payload so past decisions stay explainable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    #[serde(flatten)]
    pub verdict: Verdict,
    pub matched: Vec<MatchedRule>,
    pub budget: BudgetCheck,
    pub context: EvaluationContext,
}

impl Classification {
    pub fn task_status(&self) -> TaskStatus {
        match self.verdict {
            Verdict::AutoClear => TaskStatus::Approved,
            Verdict::RequireApproval { .. } => TaskStatus::Pending,
            Verdict::Deny { .. } => TaskStatus::Denied,
        }
    }

    pub fn requires_approval(&self) -> bool {
        matches!(self.verdict, Verdict::RequireApproval { .. })
    }
}

/// Decide a task's fate. The first applicable reason wins:
///
/// 1. a matched `deny` rule denies outright
/// 2. a refused budget reservation forces review
/// 3. a matched `requireApproval` rule forces review
/// 4. an estimate above any matched rule's threshold forces review
/// 5. otherwise the task is auto-cleared
pub fn classify(matched: Vec<MatchedRule>, budget: BudgetCheck, context: EvaluationContext) -> Classification {
    let verdict = decide(&matched, &budget);
    match &verdict {
        Verdict::AutoClear => {}
        Verdict::RequireApproval { reason, .. } => info!(owner = %budget.owner, %reason, "task requires approval"),
        Verdict::Deny { reason, .. } => info!(owner = %budget.owner, %reason, "task denied by rule"),
    }
    Classification {
        verdict,
        matched,
        budget,
        context,
    }
}

fn decide(matched: &[MatchedRule], budget: &BudgetCheck) -> Verdict {
    if let Some(rule) = matched.iter().find(|m| m.action == RuleAction::Deny) {
        return Verdict::Deny {
            rule: rule.rule_id,
            reason: format!("denied by rule {} v{}", rule.rule_id, rule.version),
        };
    }

    if !budget.allowed() {
        return Verdict::RequireApproval {
            rule: None,
            reason: format!(
                "daily ceiling {:.2} would be exceeded ({:.2} used + {:.2} requested)",
                budget.limit, budget.used, budget.amount
            ),
        };
    }

    if let Some(rule) = matched.iter().find(|m| m.action == RuleAction::RequireApproval) {
        return Verdict::RequireApproval {
            rule: Some(rule.rule_id),
            reason: format!("rule {} v{} requires approval", rule.rule_id, rule.version),
        };
    }

    if let Some(rule) = matched.iter().find(|m| m.exceeds_threshold) {
        return Verdict::RequireApproval {
            rule: Some(rule.rule_id),
            reason: format!(
                "estimate {:.2} exceeds rule {} v{} threshold {:.2}",
                budget.amount,
                rule.rule_id,
                rule.version,
                rule.threshold.unwrap_or_default()
            ),
        };
    }

    Verdict::AutoClear
}
