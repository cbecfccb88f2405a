use std::fmt::Debug;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use super::{ClusterApi, ClusterError, WatchKind, POD_APP_LABEL};
use crate::crd::{Workspace, WorkspacePhase, LABEL_UID};

const WORKSPACE: &str = "workspace";
const POD: &str = "pod";
const CLAIM: &str = "persistentvolumeclaim";

/// [`ClusterApi`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    namespace: String,
    workspaces: Api<Workspace>,
    pods: Api<Pod>,
    claims: Api<PersistentVolumeClaim>,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            workspaces: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client.clone(), namespace),
            claims: Api::namespaced(client, namespace),
        }
    }
}

fn map_error(kind: &'static str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            ClusterError::AlreadyExists {
                kind,
                name: name.to_string(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => ClusterError::Conflict {
            kind,
            name: name.to_string(),
        },
        other => ClusterError::Api(other.to_string()),
    }
}

fn object_name<K: Resource>(kind: &'static str, object: &K) -> Result<String, ClusterError> {
    object
        .meta()
        .name
        .clone()
        .ok_or_else(|| ClusterError::Api(format!("{kind} has no name")))
}

/// Turn a watch on `api` into a stream of changed object names.
fn changed_names<K>(api: Api<K>, config: watcher::Config) -> BoxStream<'static, String>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    watcher(api, config)
        .default_backoff()
        .filter_map(|event| async move {
            match event {
                Ok(Event::Apply(object) | Event::InitApply(object) | Event::Delete(object)) => {
                    Some(object.name_any())
                }
                Ok(Event::Init | Event::InitDone) => None,
                Err(e) => {
                    warn!(error = %e, "watch stream error");
                    None
                }
            }
        })
        .boxed()
}

#[async_trait]
impl ClusterApi for KubeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_workspace(&self, name: &str) -> Result<Option<Workspace>, ClusterError> {
        self.workspaces
            .get_opt(name)
            .await
            .map_err(|e| map_error(WORKSPACE, name, e))
    }

    async fn list_workspaces(&self, uid: &str) -> Result<Vec<Workspace>, ClusterError> {
        let params = ListParams::default().labels(&format!("{LABEL_UID}={uid}"));
        let list = self
            .workspaces
            .list(&params)
            .await
            .map_err(|e| map_error(WORKSPACE, uid, e))?;
        Ok(list.items)
    }

    async fn create_workspace(&self, workspace: &Workspace) -> Result<Workspace, ClusterError> {
        let name = object_name(WORKSPACE, workspace)?;
        self.workspaces
            .create(&PostParams::default(), workspace)
            .await
            .map_err(|e| map_error(WORKSPACE, &name, e))
    }

    async fn replace_workspace(&self, workspace: &Workspace) -> Result<Workspace, ClusterError> {
        let name = object_name(WORKSPACE, workspace)?;
        self.workspaces
            .replace(&name, &PostParams::default(), workspace)
            .await
            .map_err(|e| map_error(WORKSPACE, &name, e))
    }

    async fn set_workspace_phase(
        &self,
        name: &str,
        phase: WorkspacePhase,
    ) -> Result<(), ClusterError> {
        let patch = json!({ "status": { "phase": phase } });
        self.workspaces
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| map_error(WORKSPACE, name, e))
    }

    async fn delete_workspace(&self, name: &str) -> Result<(), ClusterError> {
        self.workspaces
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| debug!(name, "workspace deleted"))
            .map_err(|e| map_error(WORKSPACE, name, e))
    }

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, ClusterError> {
        self.pods
            .get_opt(name)
            .await
            .map_err(|e| map_error(POD, name, e))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), ClusterError> {
        let name = object_name(POD, pod)?;
        self.pods
            .create(&PostParams::default(), pod)
            .await
            .map(|_| ())
            .map_err(|e| map_error(POD, &name, e))
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        self.pods
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_error(POD, name, e))
    }

    async fn get_claim(&self, name: &str) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        self.claims
            .get_opt(name)
            .await
            .map_err(|e| map_error(CLAIM, name, e))
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError> {
        let name = object_name(CLAIM, claim)?;
        self.claims
            .create(&PostParams::default(), claim)
            .await
            .map(|_| ())
            .map_err(|e| map_error(CLAIM, &name, e))
    }

    async fn delete_claim(&self, name: &str) -> Result<(), ClusterError> {
        self.claims
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_error(CLAIM, name, e))
    }

    fn watch(&self, kind: WatchKind) -> BoxStream<'static, String> {
        match kind {
            WatchKind::Workspace => {
                changed_names(self.workspaces.clone(), watcher::Config::default())
            }
            WatchKind::Pod => {
                let (key, value) = POD_APP_LABEL;
                changed_names(
                    self.pods.clone(),
                    watcher::Config::default().labels(&format!("{key}={value}")),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_map_error_classifies_api_responses() {
        assert!(map_error(POD, "ws-a", api_error(404, "NotFound")).is_not_found());
        assert!(map_error(POD, "ws-a", api_error(409, "AlreadyExists")).is_already_exists());
        assert!(map_error(WORKSPACE, "ws-a", api_error(409, "Conflict")).is_conflict());
        assert!(matches!(
            map_error(WORKSPACE, "ws-a", api_error(500, "InternalError")),
            ClusterError::Api(_)
        ));
    }
}
