//! # overseer-engine
//!
//! The governance engine. Composes the store, the policy crate, and the
//! shared config into the operations callers use:
//!
//! - **Sessions**: open, get, list, close (idempotent), idle reaping
//! - **Tasks**: submit with classification, execute, complete, fail
//! - **Approvals**: decide, escalate, expire, deadline reaping
//! - **Ledger**: daily totals, reservations, posts, ceilings
//! - **Rules**: versioned add, update, enable, disable
//! - **Audit**: query and chain verification
//!
//! Every mutation is one SQLite transaction that includes its audit entry.

pub mod approvals;
pub mod audit;
pub mod engine;
pub mod executor;
pub mod ledger;
pub mod reaper;
pub mod rules;
pub mod sessions;
pub mod tasks;

pub use engine::{Clock, GovernanceEngine, ManualClock, REAPER_ACTOR, SEED_ACTOR, SystemClock};
pub use executor::Executor;
pub use ledger::CostSummary;
pub use reaper::{Reapers, spawn_reapers};
pub use rules::RuleUpdate;
pub use tasks::{Completed, SubmitTask, Submitted};
