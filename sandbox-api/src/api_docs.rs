use sandbox_orchestrator::{CreateSpaceRequest, ResourceLimit, RunningWorkspace, StartSpaceRequest};
use utoipa::OpenApi;

use crate::routes::health::HealthResponse;
use crate::routes::spaces::{RunningWorkspacesResponse, SpaceResponse, SpaceStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::spaces::create_space,
        crate::routes::spaces::start_space,
        crate::routes::spaces::stop_space,
        crate::routes::spaces::delete_space,
        crate::routes::spaces::running_workspaces,
    ),
    components(
        schemas(
            CreateSpaceRequest,
            StartSpaceRequest,
            ResourceLimit,
            RunningWorkspace,
            RunningWorkspacesResponse,
            SpaceResponse,
            SpaceStatus,
            HealthResponse
        )
    ),
    tags(
        (name = "spaces", description = "Workspace lifecycle"),
        (name = "health", description = "Liveness and readiness")
    )
)]
pub struct ApiDoc;
