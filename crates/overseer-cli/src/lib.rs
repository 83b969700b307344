//! # overseer-cli
//!
//! Command-line interface for the Overseer governance engine.
//!
//! ## Commands
//!
//! - `overseer serve` — Run the action API, event stream, and reapers
//! - `overseer rules` — List, add, update, disable, enable rules; show history
//! - `overseer approvals` — Review the queue, decide, run the expiry reaper
//! - `overseer audit` — Show entries, verify hash chains
//! - `overseer cost` — Show today's spend, set ceilings
//! - `overseer config` — Show the effective configuration
//! - `overseer doctor` — Audit configuration and the store

pub mod commands;

pub use commands::Cli;
