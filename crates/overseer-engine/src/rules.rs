use overseer_config::schema::RuleSeed;
use overseer_core::{
    AdaptiveRule, GovernanceError, GovernanceEvent, Result, RuleAction, RuleCondition, RuleId,
    SYSTEM_OWNER,
};
use overseer_policy::rules as policy_rules;
use overseer_store::{AuditRecord, Connection, audit, rules};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::engine::{GovernanceEngine, SEED_ACTOR};

/// Partial change to a rule. Absent fields carry over from the current version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    #[serde(default)]
    pub condition: Option<RuleCondition>,
    #[serde(default)]
    pub action: Option<RuleAction>,
    /// `Some(None)` clears the threshold.
    #[serde(default, with = "double_option")]
    pub threshold: Option<Option<f64>>,
    /// Reject the update unless this is still the current version.
    #[serde(default)]
    pub base_version: Option<u32>,
}

impl GovernanceEngine {
    /// Create version 1 of a new rule.
    pub fn add_rule(
        &self,
        condition: RuleCondition,
        action: RuleAction,
        threshold: Option<f64>,
        actor: &str,
    ) -> Result<AdaptiveRule> {
        let now = self.now();
        let rule = AdaptiveRule {
            id: Uuid::new_v4(),
            version: 1,
            condition,
            action,
            threshold,
            enabled: true,
            superseded: false,
            created_by: actor.to_string(),
            created_at: now,
        };
        let result = validate(&rule).and_then(|_| {
            self.store.with_tx("rule.add", |tx| {
                rules::insert_version(tx, &rule)?;
                audit_rule(tx, &rule, "rule.added", actor, now)
            })
        });
        self.audit_rejection(actor, "rule.add", "rule", &rule.id.to_string(), result)?;

        info!(rule_id = %rule.id, action = rule.action.as_str(), actor, "rule added");
        self.publish_rule(&rule);
        Ok(rule)
    }

    /// Append version N+1 with the given changes and mark N superseded.
    pub fn update_rule(&self, id: RuleId, update: RuleUpdate, actor: &str) -> Result<AdaptiveRule> {
        let result = self.append_version(id, actor, "rule.updated", |head| {
            if let Some(base) = update.base_version {
                if base != head.version {
                    return Err(GovernanceError::RuleConflict(format!(
                        "rule {id} is at version {}, update was based on version {base}",
                        head.version
                    )));
                }
            }
            let mut next = head.clone();
            if let Some(condition) = &update.condition {
                next.condition = condition.clone();
            }
            if let Some(action) = update.action {
                next.action = action;
            }
            if let Some(threshold) = update.threshold {
                next.threshold = threshold;
            }
            Ok(Some(next))
        });
        let rule = self.audit_rejection(actor, "rule.update", "rule", &id.to_string(), result)?;
        Ok(rule)
    }

    /// Append a version with `enabled = false`. No-op if already disabled.
    pub fn disable_rule(&self, id: RuleId, actor: &str) -> Result<AdaptiveRule> {
        self.set_enabled(id, false, actor)
    }

    /// Append a version with `enabled = true`. No-op if already enabled.
    pub fn enable_rule(&self, id: RuleId, actor: &str) -> Result<AdaptiveRule> {
        self.set_enabled(id, true, actor)
    }

    fn set_enabled(&self, id: RuleId, enabled: bool, actor: &str) -> Result<AdaptiveRule> {
        let action = if enabled { "rule.enabled" } else { "rule.disabled" };
        let result = self.append_version(id, actor, action, |head| {
            if head.enabled == enabled {
                return Ok(None);
            }
            let mut next = head.clone();
            next.enabled = enabled;
            Ok(Some(next))
        });
        let attempted = if enabled { "rule.enable" } else { "rule.disable" };
        self.audit_rejection(actor, attempted, "rule", &id.to_string(), result)
    }

    /// Shared path for every new version: read the head inside the
    /// transaction, derive the next version, insert it, supersede the head.
    /// `derive` returning `None` means nothing changes.
    fn append_version(
        &self,
        id: RuleId,
        actor: &str,
        audit_action: &str,
        derive: impl Fn(&AdaptiveRule) -> Result<Option<AdaptiveRule>>,
    ) -> Result<AdaptiveRule> {
        let now = self.now();
        let (rule, changed) = self.store.with_tx("rule.version", |tx| {
            let head = rules::head(tx, id)?.ok_or_else(|| GovernanceError::not_found("rule", id))?;
            let Some(mut next) = derive(&head)? else {
                return Ok((head, false));
            };
            next.version = head.version + 1;
            next.superseded = false;
            next.created_by = actor.to_string();
            next.created_at = now;
            validate(&next)?;

            rules::insert_version(tx, &next)?;
            rules::mark_superseded(tx, id, head.version)?;
            audit_rule(tx, &next, audit_action, actor, now)?;
            Ok((next, true))
        })?;

        if changed {
            info!(
                rule_id = %rule.id,
                version = rule.version,
                enabled = rule.enabled,
                actor,
                "{audit_action}"
            );
            self.publish_rule(&rule);
        }
        Ok(rule)
    }

    /// Current head of every rule, ordered by id.
    pub fn list_rules(&self) -> Result<Vec<AdaptiveRule>> {
        self.store.read("rule.list", rules::heads)
    }

    /// All versions of one rule, ascending.
    pub fn rule_history(&self, id: RuleId) -> Result<Vec<AdaptiveRule>> {
        let history = self
            .store
            .read("rule.history", |conn| rules::history(conn, id))?;
        if history.is_empty() {
            return Err(GovernanceError::not_found("rule", id));
        }
        Ok(history)
    }

    pub(crate) fn insert_seed_rules(&self, seeds: &[RuleSeed]) -> Result<usize> {
        let now = self.now();
        let seeded = self.store.with_tx("rule.seed", |tx| {
            if rules::count(tx)? > 0 {
                return Ok(Vec::new());
            }
            let mut seeded = Vec::with_capacity(seeds.len());
            for seed in seeds {
                let rule = AdaptiveRule {
                    id: Uuid::new_v4(),
                    version: 1,
                    condition: seed.condition.clone(),
                    action: seed.action,
                    threshold: seed.threshold,
                    enabled: true,
                    superseded: false,
                    created_by: SEED_ACTOR.to_string(),
                    created_at: now,
                };
                validate(&rule)?;
                rules::insert_version(tx, &rule)?;
                audit_rule(tx, &rule, "rule.added", SEED_ACTOR, now)?;
                seeded.push(rule);
            }
            Ok(seeded)
        })?;
        for rule in &seeded {
            self.publish_rule(rule);
        }
        Ok(seeded.len())
    }

    fn publish_rule(&self, rule: &AdaptiveRule) {
        self.publish(vec![GovernanceEvent::RuleChanged {
            rule_id: rule.id,
            version: rule.version,
            action: rule.action,
            enabled: rule.enabled,
        }]);
    }
}

fn validate(rule: &AdaptiveRule) -> Result<()> {
    policy_rules::validate_condition(&rule.condition).map_err(GovernanceError::Validation)?;
    policy_rules::validate_threshold(rule.threshold).map_err(GovernanceError::Validation)
}

fn audit_rule(
    tx: &Connection,
    rule: &AdaptiveRule,
    action: &str,
    actor: &str,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    audit::append(
        tx,
        &AuditRecord::success(
            SYSTEM_OWNER,
            actor,
            action,
            "rule",
            rule.id,
            json!({
                "version": rule.version,
                "condition": rule.condition,
                "action": rule.action,
                "threshold": rule.threshold,
                "enabled": rule.enabled,
            }),
        ),
        now,
    )?;
    Ok(())
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Option<f64>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Option<f64>>, D::Error> {
        Option::<f64>::deserialize(deserializer).map(Some)
    }
}
