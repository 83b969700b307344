//! # overseer-core
//!
//! Shared vocabulary for the Overseer governance engine: sessions, tasks,
//! approval requests, adaptive rules, cost records, audit entries, the
//! error taxonomy, and the event bus that pushes committed transitions to
//! subscribers.

pub mod error;
pub mod event;
pub mod provider;
pub mod task;
pub mod types;

pub use error::{GovernanceError, Result};
pub use event::{EventBus, GovernanceEvent};
pub use provider::{ExecutionReport, ProviderAdapter};
pub use task::TaskKind;
pub use types::*;
