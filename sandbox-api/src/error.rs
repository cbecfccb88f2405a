use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sandbox_orchestrator::ServiceError;
use tracing::error;

use crate::routes::spaces::{SpaceResponse, SpaceStatus};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    AlreadyExists(String),
    /// The user already has another active workspace.
    Busy(String),
    /// The workspace did not become ready in time.
    Exhausted(String),
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists(_) => StatusCode::CONFLICT,
            ApiError::Busy(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::Exhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let (status, message) = match self {
            ApiError::NotFound(msg) => (SpaceStatus::NotFound, msg),
            ApiError::AlreadyExists(msg) => (SpaceStatus::AlreadyExist, msg),
            ApiError::BadRequest(msg)
            | ApiError::Busy(msg)
            | ApiError::Exhausted(msg)
            | ApiError::Internal(msg) => (SpaceStatus::Error, msg),
        };

        (code, Json(SpaceResponse { status, message })).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidArgument(_) => ApiError::BadRequest(err.to_string()),
            ServiceError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ServiceError::AlreadyExists(_) => ApiError::AlreadyExists(err.to_string()),
            ServiceError::UserBusy { .. } => ApiError::Busy(err.to_string()),
            ServiceError::NotReady { .. } => ApiError::Exhausted(err.to_string()),
            ServiceError::Cluster(_) => {
                error!(error = %err, "cluster request failed");
                ApiError::Internal("Cluster request failed".to_string())
            }
        }
    }
}
