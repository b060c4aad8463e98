//! HTTP handler definitions for the tenantgate server.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for building the router.

pub mod admin;
pub mod health;
pub mod tenant;

pub use admin::{rate_limit_stats_handler, unblock_handler};
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use tenant::tenant_handler;

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::admission::AdmissionLimiter;
use crate::tenancy::SessionPool;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    /// Per-IP and per-tenant admission buckets.
    pub limiter: Arc<AdmissionLimiter>,
    /// Tenant-bound database sessions, when a database is configured.
    pub pool: Option<Arc<SessionPool>>,
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}
