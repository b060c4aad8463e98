//! Health and orchestrator probes.
//!
//! Mounted outside the tenancy stack, so probes are never rate limited and
//! still answer while the server drains.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// `GET /health`: lifecycle state, in-flight count, uptime and limiter totals.
///
/// Always 200; callers read `state` to tell a draining server from a ready one.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let limiter = state.limiter.stats();

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "database": state.pool.is_some(),
        "rate_limits": {
            "ip_entries": limiter.ip.total,
            "ip_blocked": limiter.ip.blocked,
            "tenant_entries": limiter.tenant.total,
            "tenant_blocked": limiter.tenant.blocked,
        },
    }))
}

/// `GET /health/live`: the process is up.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// `GET /health/ready`: 200 only in `Ready`, so draining instances leave rotation.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    match state.shutdown.health_state() {
        HealthState::Ready => StatusCode::OK,
        HealthState::Starting | HealthState::Draining | HealthState::Stopped => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::handlers::test_support::test_state;

    #[tokio::test]
    async fn health_tracks_lifecycle() {
        let state = test_state();
        assert_eq!(health_handler(State(state.clone())).await.0["state"], "starting");

        state.shutdown.set_ready();
        let _guard = state.shutdown.in_flight_guard();
        let Json(body) = health_handler(State(state.clone())).await;
        assert_eq!(body["state"], "ready");
        assert_eq!(body["in_flight"], 1);
        assert!(body["uptime_secs"].is_u64());

        state.shutdown.trigger_shutdown();
        assert_eq!(health_handler(State(state)).await.0["state"], "draining");
    }

    #[tokio::test]
    async fn health_reports_blocked_keys() {
        let state = test_state();
        for _ in 0..=100 {
            state.limiter.admit("10.0.0.1", None);
        }

        let Json(body) = health_handler(State(state)).await;
        assert_eq!(body["rate_limits"]["ip_entries"], 1);
        assert_eq!(body["rate_limits"]["ip_blocked"], 1);
        assert_eq!(body["rate_limits"]["tenant_entries"], 0);
        assert_eq!(body["database"], false);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let state = test_state();
        assert_eq!(liveness_handler().await, StatusCode::OK);
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::SERVICE_UNAVAILABLE);

        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.shutdown.trigger_shutdown();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }
}
