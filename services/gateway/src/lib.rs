//! Govor gateway service library.
//!
//! Everything the gateway binary needs: environment configuration, the
//! sqlite-backed token store and credential cache, the axum router, and the
//! WebSocket session orchestration. `bin/gateway.rs` is a thin wrapper
//! around this crate.

pub mod config;
pub mod db;
pub mod router;
pub mod state;
pub mod tokens;
pub mod ws;
