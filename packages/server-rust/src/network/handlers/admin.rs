//! Rate limiter administration endpoints.
//!
//! Mounted behind [`require_operator`](crate::network::auth::require_operator);
//! the handlers themselves assume an authorized operator.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::admission::{BucketKind, LimiterStats};

/// `GET /admin/rate-limits`
pub async fn rate_limit_stats_handler(State(state): State<AppState>) -> Json<LimiterStats> {
    Json(state.limiter.stats())
}

/// `DELETE /admin/rate-limits/{kind}/{key}`
///
/// 204 when an entry was removed, 404 when the key was not tracked,
/// 400 for an unknown bucket kind.
pub async fn unblock_handler(
    State(state): State<AppState>,
    Path((kind, key)): Path<(String, String)>,
) -> Response {
    let kind: BucketKind = match kind.parse() {
        Ok(kind) => kind,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid_bucket", "message": err.to_string() })),
            )
                .into_response();
        }
    };

    if state.limiter.unblock(kind, &key) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::handlers::test_support::test_state;

    fn block(state: &AppState, ip: &str) {
        for _ in 0..=state.limiter.config().ip.limit {
            state.limiter.admit(ip, None);
        }
    }

    #[tokio::test]
    async fn stats_list_blocked_ip() {
        let state = test_state();
        block(&state, "10.0.0.1");

        let Json(stats) = rate_limit_stats_handler(State(state)).await;
        assert_eq!(stats.ip.blocked, 1);
        assert_eq!(stats.ip.blocked_keys[0].key, "10.0.0.1");
        assert_eq!(stats.ip.blocked_keys[0].seconds_remaining, 300);
    }

    #[tokio::test]
    async fn unblock_removes_entry() {
        let state = test_state();
        block(&state, "10.0.0.1");

        let response = unblock_handler(
            State(state.clone()),
            Path(("ip".to_string(), "10.0.0.1".to_string())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.limiter.admit("10.0.0.1", None).is_admitted());
    }

    #[tokio::test]
    async fn unblock_unknown_key_is_not_found() {
        let state = test_state();
        let response = unblock_handler(
            State(state),
            Path(("tenant".to_string(), "t-9".to_string())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unblock_rejects_unknown_kind() {
        let state = test_state();
        let response = unblock_handler(
            State(state),
            Path(("user".to_string(), "u-1".to_string())),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
