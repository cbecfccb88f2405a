use thiserror::Error;

use crate::cluster::ClusterError;

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("workspace {name} has invalid {field} quantity '{value}': {reason}")]
    InvalidQuantity {
        name: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("pod {pod} has no '{annotation}' annotation")]
    MissingAnnotation {
        pod: String,
        annotation: &'static str,
    },

    #[error("pod {pod} declares no container port")]
    MissingPort { pod: String },

    #[error("pod {pod} is running but has no IP yet")]
    MissingAddress { pod: String },
}

impl ReconcileError {
    /// Errors that retrying cannot fix; the object itself is malformed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ReconcileError::InvalidQuantity { .. }
                | ReconcileError::MissingAnnotation { .. }
                | ReconcileError::MissingPort { .. }
        )
    }
}
