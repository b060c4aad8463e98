//! Tenant isolation: ambient tenant propagation and session binding.
//!
//! - [`ambient`]: task-local tenant for the current request
//! - [`establisher`]: middleware that sets the ambient tenant from the principal
//! - [`binder`]: session decorator issuing bind/reset statements
//! - [`factory`]: factory producing decorated sessions
//! - [`pool`]: bounded pool of decorated sessions
//! - [`recording`]: in-memory session for tests and local runs
//! - `postgres`: `sqlx` sessions (feature `postgres`)

pub mod ambient;
pub mod binder;
pub mod establisher;
pub mod factory;
pub mod pool;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod recording;

pub use binder::{BindState, TenantBoundSession};
pub use establisher::{request_tenant, TenantContextLayer, TenantContextService};
pub use factory::TenantBindingFactory;
pub use pool::{PoolConfig, PooledSession, SessionPool};
#[cfg(feature = "postgres")]
pub use postgres::{PgSession, PgSessionFactory};
pub use recording::{RecordingFactory, RecordingLog, RecordingSession, SessionEvent};
