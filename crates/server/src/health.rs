use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use closer_core::engine::{DecisionEngine, EngineStatus};
use closer_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    engine: Arc<DecisionEngine>,
    db_pool: Option<DbPool>,
}

impl HealthState {
    pub fn new(engine: Arc<DecisionEngine>, db_pool: Option<DbPool>) -> Self {
        Self { engine, db_pool }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub storage: HealthCheck,
    pub guardrails: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).route("/status", get(status)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// A frozen guardrail is reported but does not degrade readiness: selection
/// keeps serving while allocation is paused.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let storage = storage_check(state.db_pool.as_ref()).await;
    let ready = storage.status == "ready";

    let guardrail_state = state.engine.guardrail_status();
    let guardrails = if guardrail_state.frozen {
        HealthCheck {
            status: "frozen",
            detail: guardrail_state.reason.unwrap_or_else(|| "allocation paused".to_string()),
        }
    } else {
        HealthCheck { status: "active", detail: "allocation enabled".to_string() }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: format!("{} arms loaded", state.engine.bandit().arm_count()),
        },
        storage,
        guardrails,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

pub async fn status(State(state): State<HealthState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

async fn storage_check(pool: Option<&DbPool>) -> HealthCheck {
    let Some(pool) = pool else {
        return HealthCheck { status: "ready", detail: "file or memory state store".to_string() };
    };

    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}
