//! `GET /tenant`: reports the tenant this request runs as.
//!
//! With a database configured, also reads the tenant session variable back
//! through a pooled session, showing what row-scoping policies will see.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use super::AppState;
use crate::tenancy::{ambient, SessionPool};
use crate::traits::{DatabaseSession, SessionError};

#[derive(Debug, Serialize)]
struct TenantReport {
    tenant: Option<String>,
    /// `None` when no database is configured.
    database: Option<DatabaseView>,
}

#[derive(Debug, Serialize)]
struct DatabaseView {
    variable: String,
    value: Option<String>,
}

pub async fn tenant_handler(State(state): State<AppState>) -> Response {
    let tenant = ambient::current_tenant().map(|t| t.to_string());

    let database = match &state.pool {
        Some(pool) => match read_setting(pool).await {
            Ok(view) => Some(view),
            Err(err) => {
                warn!(error = %err, "tenant setting lookup failed");
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({ "error": "database_unavailable", "message": err.to_string() })),
                )
                    .into_response();
            }
        },
        None => None,
    };

    Json(TenantReport { tenant, database }).into_response()
}

async fn read_setting(pool: &std::sync::Arc<SessionPool>) -> Result<DatabaseView, SessionError> {
    let variable = pool.factory().variable().key().to_string();
    // The key is validated as a dotted identifier, so it is safe to inline.
    let statement = format!("SELECT current_setting('{variable}', true)");

    let mut session = pool.acquire().await?;
    let result = session.query(&statement, &[]).await;
    if let Err(err) = session.release().await {
        warn!(error = %err, "session release failed after tenant lookup");
    }

    let value = result?
        .scalar()
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    Ok(DatabaseView { variable, value })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tenantgate_core::{TenantId, TenantVariable};

    use super::*;
    use crate::network::handlers::test_support::test_state;
    use crate::tenancy::{PoolConfig, RecordingFactory, RecordingLog, TenantBindingFactory};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn state_with_pool(log: &Arc<RecordingLog>) -> AppState {
        let factory = TenantBindingFactory::new(
            Arc::new(RecordingFactory::new(Arc::clone(log))),
            Arc::new(TenantVariable::default()),
        );
        AppState {
            pool: Some(SessionPool::new(factory, PoolConfig::default())),
            ..test_state()
        }
    }

    #[tokio::test]
    async fn reports_ambient_tenant_without_database() {
        let response = ambient::scope(Some(TenantId::from("t-1")), tenant_handler(State(test_state()))).await;
        let json = body_json(response).await;
        assert_eq!(json["tenant"], "t-1");
        assert!(json["database"].is_null());
    }

    #[tokio::test]
    async fn database_sees_bound_tenant() {
        let log = RecordingLog::new();
        let state = state_with_pool(&log);

        let response = ambient::scope(Some(TenantId::from("t-1")), tenant_handler(State(state.clone()))).await;
        let json = body_json(response).await;
        assert_eq!(json["database"]["variable"], "app.current_tenant_id");
        assert_eq!(json["database"]["value"], "t-1");

        let response = tenant_handler(State(state)).await;
        let json = body_json(response).await;
        assert!(json["tenant"].is_null());
        assert!(json["database"]["value"].is_null());
    }

    #[tokio::test]
    async fn database_failure_is_unavailable() {
        let log = RecordingLog::new();
        log.fail_statements_containing("<connect>");
        let response = tenant_handler(State(state_with_pool(&log))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
