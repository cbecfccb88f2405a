use sandbox_controller::ClusterError;
use sandbox_core::ValidationError;
use sandbox_notifier::WaitError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("Workspace already exists: {0}")]
    AlreadyExists(String),

    #[error("User {uid} already has an active workspace: {active}")]
    UserBusy { uid: String, active: String },

    /// The workspace did not become ready in time and was stopped again.
    #[error("Workspace {name} did not become ready: {source}")]
    NotReady {
        name: String,
        #[source]
        source: WaitError,
    },

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
}
