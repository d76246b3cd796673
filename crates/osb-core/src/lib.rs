//! Core domain + application logic for the OSINT search bot.
//!
//! This crate is intentionally framework-agnostic. Telegram lives behind a
//! messaging port (trait) implemented in the adapter crate; the upstream
//! search API and the SQLite usage store are owned here.

pub mod config;
pub mod domain;
pub mod errors;
pub mod export;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod policy;
pub mod query;
pub mod ratelimit;
pub mod search;
pub mod usage;

pub use errors::{Error, Result};
