pub mod extract;
pub mod health;
pub mod spaces;

use std::any::Any;

use crate::{api_docs::ApiDoc, error::ApiError, state::AppState};
use axum::{
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;
use utoipa::OpenApi;

pub fn create_app(state: AppState) -> Router {
    let app = Router::new()
        .merge(health::routes())
        .merge(spaces::routes())
        .route("/api-docs/openapi.json", get(openapi_spec));

    with_error_boundary(app).with_state(state)
}

/// Wrap every handler so a panic becomes a logged internal-error response
/// instead of a dropped connection.
pub fn with_error_boundary<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    error!(panic = detail, "request handler panicked");

    ApiError::Internal("Internal server error".to_string()).into_response()
}

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
