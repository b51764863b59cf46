//! Order sync daemon
//!
//! Exposes the sync core over HTTP: triggering runs, status and stats,
//! schedule control, cleanup, connection tests, health and metrics.

pub mod api;
pub mod config;

pub use api::{create_router, AppState};
pub use config::DaemonConfig;
