//! # overseer-policy
//!
//! Pure decision logic. Nothing in this crate touches the database: the
//! engine loads rule heads, ledger totals, and approval history inside its
//! transaction and hands them here.
//!
//! - [`rules`]: match adaptive rules against a task
//! - [`budget`]: resolve the owner's ceiling and make the soft reservation
//! - [`classifier`]: combine both into auto-clear, review, or deny

pub mod budget;
pub mod classifier;
pub mod rules;

pub use budget::{BudgetCheck, CeilingSource};
pub use classifier::{Classification, Verdict};
pub use rules::{EvaluationContext, MatchedRule};
