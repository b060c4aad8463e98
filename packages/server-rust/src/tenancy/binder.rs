//! Session decorator that keeps the database tenant variable in step with
//! the ambient tenant.
//!
//! Every non-control statement compares the ambient tenant (read at call
//! time) with the tenant last applied on this physical session and issues a
//! bind or reset first only when they differ. Release always clears a
//! pending bind before the session goes back to its pool.
//!
//! Bind failures propagate: the caller's statement is not executed. Reset
//! failures are logged and swallowed so they never fail the caller's query
//! or keep a session out of the pool.

use std::sync::Arc;

use async_trait::async_trait;
use tenantgate_core::{TenantId, TenantVariable};
use tracing::{debug, warn};

use super::ambient;
use crate::traits::{DatabaseSession, QueryResult, SessionError};

/// What this binder believes is applied on the physical session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindState {
    /// No tenant applied; nothing to reset.
    Unbound,
    /// The tenant variable holds this value.
    Bound(TenantId),
    /// A bind was attempted but did not complete (error or cancellation).
    /// The variable may or may not be set, so it must be reset or rebound.
    Indeterminate,
}

/// Correction to perform before forwarding a non-control statement.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Correction {
    Forward,
    Bind(TenantId),
    Reset,
}

fn correction(ambient: Option<TenantId>, state: &BindState) -> Correction {
    match (ambient, state) {
        (Some(tenant), BindState::Bound(applied)) if *applied == tenant => Correction::Forward,
        (Some(tenant), _) => Correction::Bind(tenant),
        (None, BindState::Unbound) => Correction::Forward,
        (None, BindState::Bound(_) | BindState::Indeterminate) => Correction::Reset,
    }
}

/// A [`DatabaseSession`] wrapped with tenant binding.
///
/// `query` and `release` take `&mut self`, so the compare-then-issue
/// sequence can never interleave with another task on the same session.
pub struct TenantBoundSession {
    inner: Box<dyn DatabaseSession>,
    variable: Arc<TenantVariable>,
    state: BindState,
}

impl TenantBoundSession {
    /// Decorates a raw session. The session is assumed to carry no tenant.
    #[must_use]
    pub fn new(inner: Box<dyn DatabaseSession>, variable: Arc<TenantVariable>) -> Self {
        Self {
            inner,
            variable,
            state: BindState::Unbound,
        }
    }

    #[must_use]
    pub fn state(&self) -> &BindState {
        &self.state
    }

    /// Tenant currently applied on the physical session, if known.
    #[must_use]
    pub fn applied_tenant(&self) -> Option<&TenantId> {
        match &self.state {
            BindState::Bound(tenant) => Some(tenant),
            BindState::Unbound | BindState::Indeterminate => None,
        }
    }

    /// Whether a reset must be issued before this session can be pooled.
    #[must_use]
    pub fn reset_pending(&self) -> bool {
        !matches!(self.state, BindState::Unbound)
    }

    async fn bind(&mut self, tenant: TenantId) -> Result<(), SessionError> {
        // Marked before awaiting so a cancelled bind is still reset on release.
        self.state = BindState::Indeterminate;

        let params = [tenant.as_str().to_string()];
        match self.inner.query(self.variable.set_statement(), &params).await {
            Ok(_) => {
                metrics::counter!("tenantgate_binder_statements_total", "kind" => "bind").increment(1);
                debug!(tenant = %tenant, "bound tenant on session");
                self.state = BindState::Bound(tenant);
                Ok(())
            }
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "failed to bind tenant on session");
                Err(SessionError::Bind {
                    tenant,
                    source: Box::new(err),
                })
            }
        }
    }

    async fn reset(&mut self) {
        match self.inner.query(self.variable.reset_statement(), &[]).await {
            Ok(_) => {
                metrics::counter!("tenantgate_binder_statements_total", "kind" => "reset").increment(1);
                debug!(previous = ?self.state, "reset tenant on session");
            }
            Err(err) => {
                warn!(previous = ?self.state, error = %err, "failed to reset tenant on session");
            }
        }
        self.state = BindState::Unbound;
    }
}

impl std::fmt::Debug for TenantBoundSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantBoundSession")
            .field("variable", &self.variable.key())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DatabaseSession for TenantBoundSession {
    async fn query(&mut self, statement: &str, params: &[String]) -> Result<QueryResult, SessionError> {
        if self.variable.is_control(statement) {
            return self.inner.query(statement, params).await;
        }

        match correction(ambient::current_tenant(), &self.state) {
            Correction::Forward => {}
            Correction::Bind(tenant) => self.bind(tenant).await?,
            Correction::Reset => self.reset().await,
        }

        self.inner.query(statement, params).await
    }

    async fn release(&mut self) -> Result<(), SessionError> {
        if self.reset_pending() {
            self.reset().await;
        }
        self.state = BindState::Unbound;
        self.inner.release().await
    }
}
