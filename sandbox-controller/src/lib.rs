//! Workspace controllers.
//!
//! Two reconcilers share one cluster connection:
//! - [`WorkspaceReconciler`] turns a workspace's command into a storage claim
//!   and a pod;
//! - [`PodObserver`] turns pod lifecycle changes into workspace phases and
//!   gateway registrations.

pub mod cluster;
pub mod config;
pub mod crd;
pub mod error;
pub mod pod;
pub mod runtime;
pub mod workspace;

use std::sync::Arc;

use sandbox_core::Backoff;
use sandbox_notifier::Notifier;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use cluster::{ClusterApi, ClusterError, KubeCluster, WatchKind};
pub use config::{ControllerConfig, RuntimeMode};
pub use crd::{Workspace, WorkspaceCommand, WorkspacePhase, WorkspaceSpec, WorkspaceStatus};
pub use error::ReconcileError;
pub use pod::PodObserver;
pub use runtime::{run_controller, Reconciler};
pub use workspace::WorkspaceReconciler;

/// Start the workspace reconciler and the pod observer; both stop when
/// `shutdown` is cancelled.
pub fn spawn_controllers(
    cluster: Arc<dyn ClusterApi>,
    notifier: Arc<dyn Notifier>,
    config: ControllerConfig,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let workers = config.workers;
    let observer = PodObserver::new(cluster.clone(), notifier, config.op_timeout);
    let reconciler = WorkspaceReconciler::new(cluster.clone(), config);

    vec![
        tokio::spawn(run_controller(
            "workspace",
            Arc::new(reconciler),
            cluster.watch(WatchKind::Workspace),
            workers,
            Backoff::default(),
            shutdown.clone(),
        )),
        tokio::spawn(run_controller(
            "pod",
            Arc::new(observer),
            cluster.watch(WatchKind::Pod),
            workers,
            Backoff::default(),
            shutdown,
        )),
    ]
}
