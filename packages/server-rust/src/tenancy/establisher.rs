//! Tower middleware that establishes the ambient tenant for a request.
//!
//! Reads the tenant off the [`Principal`] placed in the request extensions by
//! the authentication stage and runs the rest of the pipeline inside
//! [`ambient::scope`]. Requests without a principal, or whose principal has no
//! tenant, continue unscoped.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::Request;
use tenantgate_core::{Principal, TenantId};
use tower::{Layer, Service};
use tracing::debug;

use super::ambient;

// ---------------------------------------------------------------------------
// TenantContextLayer
// ---------------------------------------------------------------------------

/// Tower layer that scopes each request to its principal's tenant.
#[derive(Debug, Clone, Default)]
pub struct TenantContextLayer;

impl<S> Layer<S> for TenantContextLayer {
    type Service = TenantContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantContextService { inner }
    }
}

// ---------------------------------------------------------------------------
// TenantContextService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TenantContextService<S> {
    inner: S,
}

/// Tenant claimed by the request's principal, if any.
#[must_use]
pub fn request_tenant<B>(req: &Request<B>) -> Option<TenantId> {
    req.extensions()
        .get::<Principal>()
        .and_then(Principal::tenant)
        .cloned()
}

impl<S, B> Service<Request<B>> for TenantContextService<S>
where
    S: Service<Request<B>> + Send,
    S::Future: Send + 'static,
    S::Response: 'static,
    S::Error: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let tenant = request_tenant(&req);
        if let Some(tenant) = &tenant {
            debug!(tenant = %tenant, "establishing tenant context");
        }

        // Handlers may do work synchronously inside `call`, so scope that too.
        let inner = &mut self.inner;
        let fut = ambient::sync_scope(tenant.clone(), || inner.call(req));
        Box::pin(ambient::scope(tenant, fut))
    }
}
