//! Transport-facing messaging port + shared types.

pub mod port;
pub mod types;
