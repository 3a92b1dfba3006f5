//! Cross-cutting runtime pieces: errors, retry, rate limiting, configuration,
//! and credential management.

pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod retry;
pub mod time;
