//! Bearer token decoding into a [`Principal`] request extension.
//!
//! Runs ahead of admission and tenant scoping. A missing, malformed, or
//! expired token leaves the request anonymous; routes that need a caller
//! reject anonymous requests themselves (see [`require_operator`]).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request as AxumRequest;
use axum::http::header::AUTHORIZATION;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tenantgate_core::Principal;
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Role a principal must carry to reach operator endpoints.
pub const OPERATOR_ROLE: &str = "admin";

/// Verifies bearer tokens and extracts their [`Principal`] claims.
#[derive(Clone)]
pub struct TokenDecoder {
    key: DecodingKey,
    validation: Validation,
}

impl TokenDecoder {
    /// HMAC-SHA256 tokens signed with `secret`. `exp` is required.
    #[must_use]
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decodes and verifies `token`.
    ///
    /// # Errors
    ///
    /// Returns the `jsonwebtoken` error for a bad signature, expired token,
    /// or claims that do not form a [`Principal`].
    pub fn decode(&self, token: &str) -> Result<Principal, jsonwebtoken::errors::Error> {
        decode::<Principal>(token, &self.key, &self.validation).map(|data| data.claims)
    }
}

impl std::fmt::Debug for TokenDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenDecoder")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

fn bearer_token<B>(req: &Request<B>) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// Route middleware for operator endpoints.
///
/// Answers 401 when the request has no principal and 403 when the principal
/// lacks [`OPERATOR_ROLE`]. Must run inside [`PrincipalLayer`].
pub async fn require_operator(req: AxumRequest, next: Next) -> Response {
    let rejection = match req.extensions().get::<Principal>() {
        None => Some((StatusCode::UNAUTHORIZED, "unauthorized", "operator credentials required")),
        Some(principal) if principal.has_role(OPERATOR_ROLE) => None,
        Some(principal) => {
            warn!(principal = %principal.id, path = %req.uri().path(), "operator endpoint denied");
            Some((StatusCode::FORBIDDEN, "forbidden", "operator role required"))
        }
    };

    match rejection {
        None => next.run(req).await,
        Some((status, error, message)) => {
            (status, Json(serde_json::json!({ "error": error, "message": message }))).into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// PrincipalLayer
// ---------------------------------------------------------------------------

/// Tower layer that attaches the decoded [`Principal`] to the request.
#[derive(Debug, Clone)]
pub struct PrincipalLayer {
    decoder: Option<Arc<TokenDecoder>>,
}

impl PrincipalLayer {
    /// `None` disables decoding; every request stays anonymous.
    #[must_use]
    pub fn new(decoder: Option<Arc<TokenDecoder>>) -> Self {
        Self { decoder }
    }
}

impl<S> Layer<S> for PrincipalLayer {
    type Service = PrincipalService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PrincipalService {
            inner,
            decoder: self.decoder.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// PrincipalService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PrincipalService<S> {
    inner: S,
    decoder: Option<Arc<TokenDecoder>>,
}

impl<S, B> Service<Request<B>> for PrincipalService<S>
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

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        // Never trust a principal that arrived from outside this layer.
        req.extensions_mut().remove::<Principal>();

        if let Some(decoder) = &self.decoder {
            if let Some(token) = bearer_token(&req) {
                match decoder.decode(token) {
                    Ok(principal) => {
                        req.extensions_mut().insert(principal);
                    }
                    Err(err) => debug!(error = %err, "bearer token rejected"),
                }
            }
        }

        Box::pin(self.inner.call(req))
    }
}
