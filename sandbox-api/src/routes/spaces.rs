use crate::{
    error::ApiResult,
    routes::extract::{ApiJson, ApiPath},
    state::AppState,
};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use sandbox_orchestrator::{CreateSpaceRequest, RunningWorkspace, StartSpaceRequest};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Outcome carried by every lifecycle response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum SpaceStatus {
    Ok,
    AlreadyExist,
    NotFound,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SpaceResponse {
    pub status: SpaceStatus,
    pub message: String,
}

impl SpaceResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            status: SpaceStatus::Ok,
            message: String::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RunningWorkspacesResponse {
    pub workspaces: Vec<RunningWorkspace>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/users/{uid}/spaces/running",
            get(running_workspaces),
        )
        .route(
            "/api/v1/users/{uid}/spaces/{sid}",
            post(create_space).delete(delete_space),
        )
        .route("/api/v1/users/{uid}/spaces/{sid}/start", post(start_space))
        .route("/api/v1/users/{uid}/spaces/{sid}/stop", post(stop_space))
}

/// Create a workspace and wait until it is running.
#[utoipa::path(
    post,
    path = "/api/v1/users/{uid}/spaces/{sid}",
    params(
        ("uid" = String, Path, description = "User id"),
        ("sid" = String, Path, description = "Sandbox id")
    ),
    request_body = CreateSpaceRequest,
    responses(
        (status = 200, description = "Workspace is running", body = SpaceResponse),
        (status = 400, description = "Invalid request", body = SpaceResponse),
        (status = 409, description = "Workspace already exists", body = SpaceResponse),
        (status = 412, description = "User has another active workspace", body = SpaceResponse),
        (status = 429, description = "Workspace did not become ready and was stopped", body = SpaceResponse)
    ),
    tag = "spaces"
)]
pub async fn create_space(
    State(state): State<AppState>,
    ApiPath((uid, sid)): ApiPath<(String, String)>,
    ApiJson(req): ApiJson<CreateSpaceRequest>,
) -> ApiResult<Json<SpaceResponse>> {
    state.service.create_space(&uid, &sid, req).await?;
    Ok(SpaceResponse::ok())
}

/// Start a stopped workspace and wait until it is running.
#[utoipa::path(
    post,
    path = "/api/v1/users/{uid}/spaces/{sid}/start",
    params(
        ("uid" = String, Path, description = "User id"),
        ("sid" = String, Path, description = "Sandbox id")
    ),
    request_body = StartSpaceRequest,
    responses(
        (status = 200, description = "Workspace is running", body = SpaceResponse),
        (status = 404, description = "Workspace not found", body = SpaceResponse),
        (status = 412, description = "User has another active workspace", body = SpaceResponse),
        (status = 429, description = "Workspace did not become ready and was stopped", body = SpaceResponse)
    ),
    tag = "spaces"
)]
pub async fn start_space(
    State(state): State<AppState>,
    ApiPath((uid, sid)): ApiPath<(String, String)>,
    ApiJson(req): ApiJson<StartSpaceRequest>,
) -> ApiResult<Json<SpaceResponse>> {
    state
        .service
        .start_space(&uid, &sid, req.resource_limit)
        .await?;
    Ok(SpaceResponse::ok())
}

/// Ask a workspace to stop; returns before the pod is gone.
#[utoipa::path(
    post,
    path = "/api/v1/users/{uid}/spaces/{sid}/stop",
    params(
        ("uid" = String, Path, description = "User id"),
        ("sid" = String, Path, description = "Sandbox id")
    ),
    responses(
        (status = 200, description = "Stop accepted", body = SpaceResponse),
        (status = 404, description = "Workspace not found", body = SpaceResponse)
    ),
    tag = "spaces"
)]
pub async fn stop_space(
    State(state): State<AppState>,
    ApiPath((uid, sid)): ApiPath<(String, String)>,
) -> ApiResult<Json<SpaceResponse>> {
    state.service.stop_space(&uid, &sid).await?;
    Ok(SpaceResponse::ok())
}

#[utoipa::path(
    delete,
    path = "/api/v1/users/{uid}/spaces/{sid}",
    params(
        ("uid" = String, Path, description = "User id"),
        ("sid" = String, Path, description = "Sandbox id")
    ),
    responses(
        (status = 200, description = "Workspace deleted or already absent", body = SpaceResponse)
    ),
    tag = "spaces"
)]
pub async fn delete_space(
    State(state): State<AppState>,
    ApiPath((uid, sid)): ApiPath<(String, String)>,
) -> ApiResult<Json<SpaceResponse>> {
    state.service.delete_space(&uid, &sid).await?;
    Ok(SpaceResponse::ok())
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{uid}/spaces/running",
    params(("uid" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Starting or running workspaces", body = RunningWorkspacesResponse)
    ),
    tag = "spaces"
)]
pub async fn running_workspaces(
    State(state): State<AppState>,
    ApiPath(uid): ApiPath<String>,
) -> ApiResult<Json<RunningWorkspacesResponse>> {
    let workspaces = state.service.running_workspaces(&uid).await?;
    Ok(Json(RunningWorkspacesResponse { workspaces }))
}
