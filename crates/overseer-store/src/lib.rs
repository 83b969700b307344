//! # overseer-store
//!
//! Durable state for the governance engine, in a single SQLite database:
//!
//! - **Current-state rows**: sessions, tasks, approval requests, rule versions,
//!   per-day cost records, and ceiling overrides.
//! - **Audit log**: an append-only, per-owner hash chain. Every audit row is
//!   written inside the same transaction as the transition it records, so a
//!   transition that cannot be audited never commits.
//!
//! Row modules expose plain functions over a `rusqlite::Connection` so the
//! engine can compose several of them inside one [`GovernanceStore::with_tx`].

pub mod approvals;
pub mod audit;
pub mod ledger;
pub mod rules;
pub mod sessions;
pub mod store;
pub mod tasks;

pub use audit::AuditRecord;
pub use rusqlite::{Connection, Transaction};
pub use store::{GovernanceStore, RetryPolicy};
