//! Pod observer: projects a workspace pod's lifecycle onto the workspace's
//! status phase and the gateway's routing table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use sandbox_notifier::Notifier;
use tracing::{debug, info, instrument};

use crate::cluster::{with_timeout, ClusterApi};
use crate::crd::WorkspacePhase;
use crate::error::{ReconcileError, Result};
use crate::runtime::Reconciler;

pub const ANNOTATION_SID: &str = "sid";
pub const ANNOTATION_UID: &str = "uid";

pub struct PodObserver {
    cluster: Arc<dyn ClusterApi>,
    notifier: Arc<dyn Notifier>,
    op_timeout: Duration,
}

fn annotation<'a>(pod: &'a Pod, pod_name: &str, key: &'static str) -> Result<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
        .ok_or_else(|| ReconcileError::MissingAnnotation {
            pod: pod_name.to_string(),
            annotation: key,
        })
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Running")
}

/// `ip:port` from the pod IP and the first container's first port.
fn endpoint(pod: &Pod, pod_name: &str) -> Result<String> {
    let port = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|container| container.ports.as_ref())
        .and_then(|ports| ports.first())
        .map(|port| port.container_port)
        .ok_or_else(|| ReconcileError::MissingPort {
            pod: pod_name.to_string(),
        })?;

    let ip = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| ReconcileError::MissingAddress {
            pod: pod_name.to_string(),
        })?;

    Ok(format!("{ip}:{port}"))
}

impl PodObserver {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        notifier: Arc<dyn Notifier>,
        op_timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            notifier,
            op_timeout,
        }
    }

    /// Write `phase` to the workspace unless it is gone or already there.
    async fn update_phase(&self, name: &str, phase: WorkspacePhase) -> Result<()> {
        let current = with_timeout(
            "get workspace",
            self.op_timeout,
            self.cluster.get_workspace(name),
        )
        .await?;

        let Some(workspace) = current else {
            debug!(name, "workspace is gone, skipping status update");
            return Ok(());
        };
        if workspace.phase() == Some(phase) {
            return Ok(());
        }

        match with_timeout(
            "update workspace status",
            self.op_timeout,
            self.cluster.set_workspace_phase(name, phase),
        )
        .await
        {
            Ok(()) => {
                info!(name, %phase, "workspace phase changed");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Reconciler for PodObserver {
    #[instrument(skip(self), fields(controller = "pod"))]
    async fn reconcile(&self, key: &str) -> Result<()> {
        let pod = with_timeout("get pod", self.op_timeout, self.cluster.get_pod(key)).await?;

        let Some(pod) = pod else {
            return self.update_phase(key, WorkspacePhase::Stopped).await;
        };

        if pod.metadata.deletion_timestamp.is_some() {
            self.update_phase(key, WorkspacePhase::Stopping).await?;
            let sid = annotation(&pod, key, ANNOTATION_SID)?;
            self.notifier.logout(sid);
            return Ok(());
        }

        if is_running(&pod) {
            self.update_phase(key, WorkspacePhase::Running).await?;
            let sid = annotation(&pod, key, ANNOTATION_SID)?;
            let endpoint = endpoint(&pod, key)?;
            self.notifier.login(sid, &endpoint);
            self.notifier.notify(sid);
            return Ok(());
        }

        self.update_phase(key, WorkspacePhase::Starting).await
    }
}
