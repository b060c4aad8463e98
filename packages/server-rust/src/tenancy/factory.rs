//! Factory that decorates every new session with tenant binding.
//!
//! [`TenantBindingFactory`] is built once during bootstrap and handed to the
//! pool. Wrapping is a property of the factory type rather than a patch
//! applied at runtime, so repeated initialization cannot stack decorators.

use std::sync::Arc;

use async_trait::async_trait;
use tenantgate_core::TenantVariable;

use super::binder::TenantBoundSession;
use crate::traits::{DatabaseSession, SessionError, SessionFactory};

/// Wraps a raw [`SessionFactory`] so that every session it produces is a
/// [`TenantBoundSession`].
#[derive(Clone)]
pub struct TenantBindingFactory {
    inner: Arc<dyn SessionFactory>,
    variable: Arc<TenantVariable>,
}

impl TenantBindingFactory {
    #[must_use]
    pub fn new(inner: Arc<dyn SessionFactory>, variable: Arc<TenantVariable>) -> Self {
        Self { inner, variable }
    }

    #[must_use]
    pub fn variable(&self) -> &TenantVariable {
        &self.variable
    }

    /// Opens a raw session and decorates it.
    ///
    /// # Errors
    ///
    /// Propagates the inner factory's error.
    pub async fn create_bound(&self) -> Result<TenantBoundSession, SessionError> {
        let raw = self.inner.create().await?;
        Ok(TenantBoundSession::new(raw, Arc::clone(&self.variable)))
    }
}

#[async_trait]
impl SessionFactory for TenantBindingFactory {
    async fn create(&self) -> Result<Box<dyn DatabaseSession>, SessionError> {
        Ok(Box::new(self.create_bound().await?))
    }
}
