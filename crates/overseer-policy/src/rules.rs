use chrono::{DateTime, Timelike, Utc};
use overseer_core::{AdaptiveRule, ApprovalStatus, RuleAction, RuleCondition, RuleId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inputs to rule matching that do not come from the task itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub hour_utc: u32,
    /// Share of the owner's recent resolved approvals that ended denied or expired.
    pub denial_rate: f64,
}

impl EvaluationContext {
    pub fn at(now: DateTime<Utc>, denial_rate: f64) -> Self {
        Self {
            hour_utc: now.hour(),
            denial_rate,
        }
    }
}

/// `denied + expired` over everything resolved; 0 with no history.
pub fn denial_rate(resolutions: &[ApprovalStatus]) -> f64 {
    if resolutions.is_empty() {
        return 0.0;
    }
    let negative = resolutions
        .iter()
        .filter(|s| matches!(s, ApprovalStatus::Denied | ApprovalStatus::Expired))
        .count();
    negative as f64 / resolutions.len() as f64
}

/// One rule that matched a task, as recorded in the classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedRule {
    pub rule_id: RuleId,
    pub version: u32,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub exceeds_threshold: bool,
}

/// Exact, case-insensitive match, or `*.suffix` for any subdomain of `suffix`.
pub fn domain_matches(pattern: &str, domain: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => domain
            .strip_suffix(suffix)
            .is_some_and(|head| head.ends_with('.') && head.len() > 1),
        None => pattern == domain,
    }
}

pub fn condition_matches(
    condition: &RuleCondition,
    task_type: &str,
    domain: &str,
    context: &EvaluationContext,
) -> bool {
    if let Some(t) = &condition.task_type {
        if t != task_type {
            return false;
        }
    }
    if let Some(d) = &condition.domain {
        if !domain_matches(d, domain) {
            return false;
        }
    }
    if let Some(window) = &condition.hours_utc {
        if !window.contains(context.hour_utc) {
            return false;
        }
    }
    if let Some(min) = condition.min_denial_rate {
        if context.denial_rate < min {
            return false;
        }
    }
    true
}

/// Match a task against the current rule set.
///
/// Only the highest version of each rule id is considered, and only if that
/// version is enabled. Passing full history is fine; older versions are
/// ignored. Output is ordered by rule id.
pub fn evaluate(
    rules: &[AdaptiveRule],
    task_type: &str,
    domain: &str,
    cost_estimate: f64,
    context: &EvaluationContext,
) -> Vec<MatchedRule> {
    let mut heads: BTreeMap<RuleId, &AdaptiveRule> = BTreeMap::new();
    for rule in rules {
        match heads.get(&rule.id) {
            Some(existing) if existing.version >= rule.version => {}
            _ => {
                heads.insert(rule.id, rule);
            }
        }
    }

    heads
        .into_values()
        .filter(|rule| rule.enabled)
        .filter(|rule| condition_matches(&rule.condition, task_type, domain, context))
        .map(|rule| MatchedRule {
            rule_id: rule.id,
            version: rule.version,
            action: rule.action,
            threshold: rule.threshold,
            exceeds_threshold: rule.threshold.is_some_and(|t| cost_estimate > t),
        })
        .collect()
}

/// Validate a condition before it is stored.
pub fn validate_condition(condition: &RuleCondition) -> Result<(), String> {
    if let Some(t) = &condition.task_type {
        if t.trim().is_empty() {
            return Err("condition.taskType must not be empty".into());
        }
    }
    if let Some(d) = &condition.domain {
        let bare = d.strip_prefix("*.").unwrap_or(d);
        if bare.trim().is_empty() || bare.contains('*') {
            return Err(format!("condition.domain '{d}' is not a domain or *.suffix pattern"));
        }
    }
    if let Some(w) = &condition.hours_utc {
        if w.start > 23 || w.end > 24 || w.start == w.end {
            return Err(format!(
                "condition.hoursUtc {{start: {}, end: {}}} is not a valid window",
                w.start, w.end
            ));
        }
    }
    if let Some(r) = condition.min_denial_rate {
        if !(0.0..=1.0).contains(&r) {
            return Err(format!("condition.minDenialRate must be within 0.0..=1.0, got {r}"));
        }
    }
    Ok(())
}

pub fn validate_threshold(threshold: Option<f64>) -> Result<(), String> {
    match threshold {
        Some(t) if !t.is_finite() || t < 0.0 => {
            Err(format!("threshold must be a non-negative number, got {t}"))
        }
        _ => Ok(()),
    }
}
