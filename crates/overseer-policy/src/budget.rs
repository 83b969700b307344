use overseer_config::schema::LedgerConfig;
use overseer_core::{GovernanceError, Reservation};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Where an owner's daily ceiling came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeilingSource {
    /// `budget_ceilings` row set through `set_ceiling`.
    Stored,
    /// `[ledger.owner_ceilings]` in config.
    Config,
    Default,
}

/// Stored override, then per-owner config, then the config default.
pub fn resolve_ceiling(stored: Option<f64>, config: &LedgerConfig, owner: &str) -> (f64, CeilingSource) {
    if let Some(limit) = stored {
        return (limit, CeilingSource::Stored);
    }
    if let Some(limit) = config.owner_ceilings.get(owner) {
        return (*limit, CeilingSource::Config);
    }
    (config.default_daily_ceiling, CeilingSource::Default)
}

/// Result of a soft reservation. Never posts, never errors on excess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetCheck {
    pub owner: String,
    pub used: f64,
    pub amount: f64,
    pub limit: f64,
    pub source: CeilingSource,
    pub outcome: Reservation,
}

impl BudgetCheck {
    pub fn reserve(owner: &str, used: f64, amount: f64, limit: f64, source: CeilingSource) -> Self {
        let outcome = if used + amount > limit {
            warn!(owner, used, amount, limit, "reservation would exceed daily ceiling");
            Reservation::Deny
        } else {
            Reservation::Allow
        };
        Self {
            owner: owner.to_string(),
            used,
            amount,
            limit,
            source,
            outcome,
        }
    }

    pub fn allowed(&self) -> bool {
        self.outcome == Reservation::Allow
    }

    /// The budget signal as an error, for reasons and logs.
    pub fn exceeded(&self) -> Option<GovernanceError> {
        (!self.allowed()).then(|| GovernanceError::BudgetExceeded {
            owner: self.owner.clone(),
            used: self.used + self.amount,
            limit: self.limit,
        })
    }
}
