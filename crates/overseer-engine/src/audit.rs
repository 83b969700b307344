use chrono::{DateTime, Utc};
use overseer_core::{AuditEntry, ChainReport, Result};
use overseer_store::audit;

use crate::engine::GovernanceEngine;

impl GovernanceEngine {
    /// The owner's audit entries, ordered by timestamp then seq. Bounds are inclusive.
    pub fn query_audit(
        &self,
        owner: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<AuditEntry>> {
        self.store
            .read("audit.query", |conn| audit::query(conn, owner, from, to))
    }

    /// Entries touching one target (task, approval, session, rule) on an owner's chain.
    pub fn audit_trail(&self, owner: &str, target_id: &str) -> Result<Vec<AuditEntry>> {
        self.store
            .read("audit.trail", |conn| audit::for_target(conn, owner, target_id))
    }

    /// Recompute the owner's chain.
    pub fn verify_audit(&self, owner: &str) -> Result<ChainReport> {
        self.store
            .read("audit.verify", |conn| audit::verify_chain(conn, owner))
    }

    /// Verify every chain in the store, including `system`.
    pub fn verify_all(&self) -> Result<Vec<ChainReport>> {
        let owners = self.store.read("audit.owners", audit::owners)?;
        owners.iter().map(|owner| self.verify_audit(owner)).collect()
    }
}
