//! Ayinel - Fixed-Window Rate Limiting
//!
//! This crate implements the request rate limiter of the Ayinel platform: an
//! in-memory, per-key fixed-window counter with a background sweep of expired
//! windows, plus an axum middleware that turns its verdicts into
//! `X-RateLimit-*` headers and `429 Too Many Requests` responses.

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod ratelimit;
