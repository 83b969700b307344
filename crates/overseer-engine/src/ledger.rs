use overseer_core::{BudgetCeiling, CostRecord, GovernanceEvent, Result};
use overseer_policy::budget::{BudgetCheck, CeilingSource, resolve_ceiling};
use overseer_store::{AuditRecord, audit, ledger};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::engine::{GovernanceEngine, require_amount, require_non_empty};

/// Today's spend for one owner alongside the ceiling that applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub owner: String,
    pub day: String,
    pub daily_cost: f64,
    pub ceiling: f64,
    pub ceiling_source: CeilingSource,
    pub remaining: f64,
}

impl GovernanceEngine {
    /// Current UTC-day aggregate; 0 when nothing was posted.
    pub fn daily_cost(&self, owner: &str) -> Result<f64> {
        let day = ledger::day_key(self.now());
        self.store
            .read("ledger.daily", |conn| ledger::daily_total(conn, owner, &day))
    }

    pub fn ceiling_for(&self, owner: &str) -> Result<(f64, CeilingSource)> {
        let stored = self
            .store
            .read("ledger.ceiling", |conn| ledger::ceiling(conn, owner))?;
        let config = self.config.read();
        Ok(resolve_ceiling(stored, &config.ledger, owner))
    }

    pub fn cost_summary(&self, owner: &str) -> Result<CostSummary> {
        let day = ledger::day_key(self.now());
        let daily_cost = self
            .store
            .read("ledger.daily", |conn| ledger::daily_total(conn, owner, &day))?;
        let (ceiling, ceiling_source) = self.ceiling_for(owner)?;
        Ok(CostSummary {
            owner: owner.to_string(),
            day,
            daily_cost,
            ceiling,
            ceiling_source,
            remaining: (ceiling - daily_cost).max(0.0),
        })
    }

    /// Soft check: would `amount` fit under today's ceiling? Never posts.
    pub fn reserve(&self, owner: &str, amount: f64) -> Result<BudgetCheck> {
        require_amount("amount", amount)?;
        let used = self.daily_cost(owner)?;
        let (limit, source) = self.ceiling_for(owner)?;
        Ok(BudgetCheck::reserve(owner, used, amount, limit, source))
    }

    /// Add `amount` to today's total for `owner`. Returns the new total.
    pub fn post_cost(&self, owner: &str, amount: f64, actor: &str) -> Result<f64> {
        let now = self.now();
        let result = require_amount("amount", amount).and_then(|_| {
            self.store.with_tx("ledger.post", |tx| {
                let total = ledger::post(tx, owner, amount, now)?;
                audit::append(
                    tx,
                    &AuditRecord::success(
                        owner,
                        actor,
                        "cost.posted",
                        "ledger",
                        ledger::day_key(now),
                        json!({ "amount": amount, "dailyTotal": total }),
                    ),
                    now,
                )?;
                Ok(total)
            })
        });
        let total = self.audit_rejection(owner, "cost.post", "ledger", &ledger::day_key(now), result)?;

        info!(%owner, amount, daily_total = total, "cost posted");
        self.publish(vec![GovernanceEvent::CostPosted {
            owner: owner.to_string(),
            amount,
            daily_total: total,
        }]);
        Ok(total)
    }

    /// Set the stored ceiling override for `owner`. Audited on the owner's chain.
    pub fn set_ceiling(&self, owner: &str, daily_limit: f64, actor: &str) -> Result<BudgetCeiling> {
        let now = self.now();
        let ceiling = BudgetCeiling {
            owner: owner.to_string(),
            daily_limit,
        };
        let result = require_non_empty("owner", owner)
            .and_then(|_| require_amount("dailyLimit", daily_limit))
            .and_then(|_| {
                self.store.with_tx("ledger.ceiling", |tx| {
                    let previous = ledger::ceiling(tx, owner)?;
                    ledger::set_ceiling(tx, &ceiling, now)?;
                    audit::append(
                        tx,
                        &AuditRecord::success(
                            owner,
                            actor,
                            "ceiling.set",
                            "ledger",
                            owner,
                            json!({ "dailyLimit": daily_limit, "previous": previous }),
                        ),
                        now,
                    )?;
                    Ok(())
                })
            });
        self.audit_rejection(actor, "ceiling.set", "ledger", owner, result)?;

        info!(%owner, daily_limit, actor, "daily ceiling set");
        Ok(ceiling)
    }

    /// Every recorded day for `owner`, newest first.
    pub fn cost_history(&self, owner: &str) -> Result<Vec<CostRecord>> {
        self.store
            .read("ledger.history", |conn| ledger::history(conn, owner))
    }
}
