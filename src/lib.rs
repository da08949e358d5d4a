//! Turnstile - Per-Client Rate Limiting
//!
//! This crate decides, for each incoming request, whether the client that
//! sent it (identified by source address and user agent) has used up its
//! quota within a trailing time window. Decisions are safe to make from any
//! number of threads at once against one shared [`ratelimit::Limiter`].

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod simulate;
