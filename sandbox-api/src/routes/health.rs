use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

impl HealthResponse {
    fn new(status: &str, cluster: Option<&str>) -> Self {
        Self {
            status: status.to_string(),
            service: "sandboxd".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cluster: cluster.map(str::to_string),
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process is up", body = HealthResponse)),
    tag = "health"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::new("ok", None))
}

/// Ready once the cluster API answers.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Cluster API reachable", body = HealthResponse),
        (status = 503, description = "Cluster API unreachable", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.service.check_cluster().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse::new("ready", Some("connected"))),
        ),
        Err(e) => {
            warn!(error = %e, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse::new("not_ready", Some("disconnected"))),
            )
        }
    }
}
