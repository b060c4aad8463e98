//! Tower middleware stacks for the tenantgate server.
//!
//! Two stacks are built here. The transport stack wraps every route,
//! probes included. The tenancy stack wraps only the API routes and decides
//! who is calling, whether they are admitted, and which tenant they run as.
//! In both, the first layer listed is the outermost.

use std::sync::Arc;

use axum::http::header::{HeaderName, RETRY_AFTER};
use axum::http::{Method, StatusCode};
use tower::layer::util::{Identity, Stack};
use tower::ServiceBuilder;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::auth::{PrincipalLayer, TokenDecoder};
use super::config::NetworkConfig;
use super::shutdown::{DrainLayer, ShutdownController};
use crate::admission::{AdmissionLayer, AdmissionLimiter};
use crate::tenancy::TenantContextLayer;

const REQUEST_ID: &str = "x-request-id";

type HttpLayers = Stack<
    PropagateRequestIdLayer,
    Stack<
        TimeoutLayer,
        Stack<
            CorsLayer,
            Stack<
                CompressionLayer,
                Stack<
                    TraceLayer<SharedClassifier<ServerErrorsAsFailures>>,
                    Stack<SetRequestIdLayer<MakeRequestUuid>, Identity>,
                >,
            >,
        >,
    >,
>;

/// Transport stack applied to every route.
///
/// 1. `SetRequestId` -- `X-Request-Id` on every request
/// 2. `Trace` -- one span per request
/// 3. `Compression` -- gzip
/// 4. `CORS` -- configured origins; `Retry-After` is exposed to browsers
/// 5. `Timeout` -- 408 after `request_timeout`
/// 6. `PropagateRequestId` -- echoes `X-Request-Id` on the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let request_id = HeaderName::from_static(REQUEST_ID);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(request_id))
        .into_inner()
}

type TenancyLayers = Stack<
    TenantContextLayer,
    Stack<AdmissionLayer, Stack<DrainLayer, Stack<PrincipalLayer, Identity>>>,
>;

/// Per-request admission pipeline for API routes.
///
/// 1. `Principal` -- decodes the bearer token into a `Principal` extension
/// 2. `Drain` -- rejects with 503 while shutting down, tracks in-flight requests
/// 3. `Admission` -- per-IP then per-tenant rate limit, 429 on denial
/// 4. `TenantContext` -- runs the handler inside the principal's ambient tenant
#[must_use]
pub fn build_tenancy_layers(
    decoder: Option<Arc<TokenDecoder>>,
    shutdown: Arc<ShutdownController>,
    limiter: Arc<AdmissionLimiter>,
) -> TenancyLayers {
    ServiceBuilder::new()
        .layer(PrincipalLayer::new(decoder))
        .layer(DrainLayer::new(shutdown))
        .layer(AdmissionLayer::new(limiter))
        .layer(TenantContextLayer)
        .into_inner()
}

/// `"*"` anywhere in `origins` allows any origin; unparsable entries are skipped.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .expose_headers([RETRY_AFTER, HeaderName::from_static(REQUEST_ID)])
}
