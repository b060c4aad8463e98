//! HTTP admission middleware.
//!
//! Gates every request through [`AdmissionLimiter::admit`] before it reaches
//! the router. Denied requests are answered here with `429 Too Many Requests`.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::http::header::{HeaderValue, RETRY_AFTER};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tower::{Layer, Service};

use super::bucket::{ceil_secs, BucketKind};
use super::limiter::{Admission, AdmissionLimiter};
use crate::tenancy::request_tenant;

/// Body of a `429` response.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitedBody {
    pub error: &'static str,
    pub message: String,
    pub retry_after_secs: u64,
}

/// Builds the `429` response for a denial from `bucket`.
#[must_use]
pub fn too_many_requests(bucket: BucketKind, retry_after: Duration) -> Response {
    let retry_after_secs = ceil_secs(retry_after);
    let message = match bucket {
        BucketKind::Ip => "Too many requests from this address. Try again later.",
        BucketKind::Tenant => "Too many requests for this tenant. Try again later.",
    };
    let body = RateLimitedBody {
        error: "too_many_requests",
        message: message.to_string(),
        retry_after_secs,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    response
}

/// Caller address used as the IP bucket key.
///
/// First entry of `X-Forwarded-For`, else `X-Real-IP`, else the transport
/// peer, else `"unknown"`.
#[must_use]
pub fn client_ip<B>(req: &Request<B>) -> String {
    let headers = req.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.ip().to_string())
}

// ---------------------------------------------------------------------------
// AdmissionLayer
// ---------------------------------------------------------------------------

/// Tower layer applying the two-level rate limit.
///
/// Must sit inside the principal decoding layer so the tenant is known.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    limiter: Arc<AdmissionLimiter>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(limiter: Arc<AdmissionLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

// ---------------------------------------------------------------------------
// AdmissionService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    limiter: Arc<AdmissionLimiter>,
}

impl<S, B> Service<Request<B>> for AdmissionService<S>
where
    S: Service<Request<B>, Response = Response> + Send,
    S::Future: Send + 'static,
    S::Error: 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let ip = client_ip(&req);
        let tenant = request_tenant(&req);

        match self.limiter.admit(&ip, tenant.as_ref()) {
            Admission::Admitted => Box::pin(self.inner.call(req)),
            Admission::Denied { bucket, retry_after } => {
                metrics::counter!("tenantgate_admission_denied_total", "bucket" => bucket.as_str())
                    .increment(1);
                Box::pin(async move { Ok(too_many_requests(bucket, retry_after)) })
            }
        }
    }
}
