//! # overseer-config
//!
//! Configuration for the governance engine. Reads `overseer.toml`, then applies
//! environment variable overrides, then validates.
//!
//! Ceilings, approval timeouts, and the denial window are read from the shared
//! config on every call, so a hot-reload takes effect without a restart.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::OverseerConfig;
pub use schema::{ConfigWarning, RuleSeed, WarningSeverity};
