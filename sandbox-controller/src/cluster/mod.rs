//! Cluster API seam.
//!
//! Reconcilers and the orchestration service talk to the cluster only
//! through [`ClusterApi`], scoped to a single namespace. [`KubeCluster`] is
//! the real implementation; the in-memory one backs the tests.

mod kubernetes;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use self::kubernetes::KubeCluster;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use thiserror::Error;

use crate::crd::{Workspace, WorkspacePhase};

/// Label carried by every workspace pod; the pod observer watches only these.
pub const POD_APP_LABEL: (&str, &str) = ("app", "cloud-ide");

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: &'static str, name: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("cluster API error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }
}

/// Resource kinds a controller can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Workspace,
    /// Workspace pods only (see [`POD_APP_LABEL`]).
    Pod,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    fn namespace(&self) -> &str;

    async fn get_workspace(&self, name: &str) -> Result<Option<Workspace>, ClusterError>;

    /// Workspaces owned by `uid`, selected by label.
    async fn list_workspaces(&self, uid: &str) -> Result<Vec<Workspace>, ClusterError>;

    async fn create_workspace(&self, workspace: &Workspace) -> Result<Workspace, ClusterError>;

    /// Replace the spec; fails with `Conflict` when the resource version in
    /// `workspace.metadata` is stale.
    async fn replace_workspace(&self, workspace: &Workspace) -> Result<Workspace, ClusterError>;

    async fn set_workspace_phase(
        &self,
        name: &str,
        phase: WorkspacePhase,
    ) -> Result<(), ClusterError>;

    async fn delete_workspace(&self, name: &str) -> Result<(), ClusterError>;

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, ClusterError>;

    async fn create_pod(&self, pod: &Pod) -> Result<(), ClusterError>;

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError>;

    async fn get_claim(&self, name: &str) -> Result<Option<PersistentVolumeClaim>, ClusterError>;

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError>;

    async fn delete_claim(&self, name: &str) -> Result<(), ClusterError>;

    /// Names of objects of `kind` that changed, starting with every existing
    /// object. A name may be delivered more than once.
    fn watch(&self, kind: WatchKind) -> BoxStream<'static, String>;
}

/// Run a cluster call, failing with [`ClusterError::Timeout`] after `after`.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    after: Duration,
    call: F,
) -> Result<T, ClusterError>
where
    F: std::future::Future<Output = Result<T, ClusterError>>,
{
    tokio::time::timeout(after, call)
        .await
        .unwrap_or(Err(ClusterError::Timeout { operation, after }))
}
