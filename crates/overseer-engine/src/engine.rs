use chrono::{DateTime, Utc};
use overseer_config::OverseerConfig;
use overseer_config::schema::RuleSeed;
use overseer_core::{EventBus, GovernanceError, GovernanceEvent, Result};
use overseer_store::{AuditRecord, GovernanceStore, audit};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Actor recorded for transitions made by the background reapers.
pub const REAPER_ACTOR: &str = "system:reaper";

/// Actor recorded for rules inserted from `[[rules.seed]]`.
pub const SEED_ACTOR: &str = "system:seed";

/// Source of "now". Swappable so deadline behavior can be driven in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// The governance engine.
///
/// Synchronous and cheap to clone. Every mutating operation is one immediate
/// transaction that writes the state change together with its audit entry,
/// then publishes a [`GovernanceEvent`] once committed. Async callers should
/// go through `spawn_blocking`.
#[derive(Clone)]
pub struct GovernanceEngine {
    pub(crate) store: GovernanceStore,
    pub(crate) config: Arc<RwLock<OverseerConfig>>,
    pub(crate) events: EventBus,
    pub(crate) clock: Arc<dyn Clock>,
}

impl GovernanceEngine {
    pub fn new(store: GovernanceStore, config: Arc<RwLock<OverseerConfig>>) -> Self {
        Self {
            store,
            config,
            events: EventBus::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Open the store named in config and seed rules on first start.
    pub fn open(config: Arc<RwLock<OverseerConfig>>) -> Result<Self> {
        let (store_config, seeds) = {
            let cfg = config.read();
            (cfg.store.clone(), cfg.rules.seed.clone())
        };
        let store = GovernanceStore::open_with_config(&store_config)?;
        let engine = Self::new(store, config);
        let seeded = engine.seed_rules(&seeds)?;
        if seeded > 0 {
            info!(seeded, "seeded adaptive rules from config");
        }
        Ok(engine)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &GovernanceStore {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.events.subscribe()
    }

    /// Current config snapshot.
    pub fn config(&self) -> OverseerConfig {
        self.config.read().clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn publish(&self, events: Vec<GovernanceEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }

    /// Pass `result` through, writing an `outcome = failed` audit entry when it
    /// is an error. Runs in its own transaction after the rejected one rolled back.
    pub(crate) fn audit_rejection<T>(
        &self,
        owner: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(e) = &result {
            self.record_failure(owner, owner, action, target_type, target_id, e);
        }
        result
    }

    /// Write a failed-attempt entry. Never fails the caller; a failure to audit
    /// the failure is logged.
    pub fn record_failure(
        &self,
        owner: &str,
        actor: &str,
        action: &str,
        target_type: &str,
        target_id: &str,
        error: &GovernanceError,
    ) {
        warn!(owner, actor, action, target_id, code = error.code(), error = %error, "rejected attempt");
        let record = AuditRecord::failed(owner, actor, action, target_type, target_id, error);
        let now = self.now();
        if let Err(e) = self
            .store
            .with_tx("audit.failure", |tx| audit::append(tx, &record, now).map(|_| ()))
        {
            warn!(owner, action, error = %e, "could not audit rejected attempt");
        }
    }

    /// Insert config seed rules when the rule table is empty.
    pub fn seed_rules(&self, seeds: &[RuleSeed]) -> Result<usize> {
        if seeds.is_empty() {
            return Ok(0);
        }
        let added = self.insert_seed_rules(seeds)?;
        Ok(added)
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GovernanceError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

pub(crate) fn require_amount(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(GovernanceError::Validation(format!(
            "{field} must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}
