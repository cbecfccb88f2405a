//! Workspace reconciler: turns a workspace's declared command into its
//! storage claim and pod.
//!
//! - workspace gone: delete the pod and the claim if they still exist;
//! - `Start`: make sure the claim exists, then the pod;
//! - `Stop`: delete the pod and keep the claim so the data survives;
//! - no command: nothing to do.
//!
//! Owner references let the cluster garbage-collect children, but the
//! explicit cleanup above is what the reconciler relies on.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, ResourceRequirements, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use sandbox_core::naming::repository_dir;
use sandbox_core::quantity::parse_quantity;
use tracing::{debug, info, instrument};

use crate::cluster::{with_timeout, ClusterApi, ClusterError, POD_APP_LABEL};
use crate::config::{ControllerConfig, RuntimeMode};
use crate::crd::{Workspace, WorkspaceCommand};
use crate::error::{ReconcileError, Result};
use crate::pod::{ANNOTATION_SID, ANNOTATION_UID};
use crate::runtime::Reconciler;

pub const VOLUME_NAME: &str = "volume-user-workspace";
pub const GIT_CLONER: &str = "git-cloner";
/// Directory the IDE opens on start.
pub const OPEN_DIR_ENV: &str = "OPEN_DIR";

/// Minimum a release-mode workspace container is scheduled with.
const REQUEST_CPU: &str = "2";
const REQUEST_MEMORY: &str = "1Gi";
const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";

pub struct WorkspaceReconciler {
    cluster: Arc<dyn ClusterApi>,
    config: ControllerConfig,
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..EnvVar::default()
    }
}

/// `{mount}/workspace`, tolerating a trailing slash on the mount path.
fn workspace_dir(mount_path: &str) -> String {
    format!("{}/workspace", mount_path.trim_end_matches('/'))
}

impl WorkspaceReconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>, config: ControllerConfig) -> Self {
        Self { cluster, config }
    }

    fn quantity(&self, ws: &Workspace, field: &'static str, value: &str) -> Result<Quantity> {
        parse_quantity(value).map_err(|reason| ReconcileError::InvalidQuantity {
            name: ws.name_any(),
            field,
            value: value.to_string(),
            reason,
        })?;
        Ok(Quantity(value.trim().to_string()))
    }

    fn child_meta(&self, ws: &Workspace) -> ObjectMeta {
        ObjectMeta {
            name: Some(ws.name_any()),
            namespace: ws.namespace().or_else(|| Some(self.config.namespace.clone())),
            owner_references: ws.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..ObjectMeta::default()
        }
    }

    fn resources(&self, ws: &Workspace) -> Result<ResourceRequirements> {
        let limits = BTreeMap::from([
            ("cpu".to_string(), self.quantity(ws, "cpu", &ws.spec.cpu)?),
            ("memory".to_string(), self.quantity(ws, "memory", &ws.spec.memory)?),
        ]);
        let requests = BTreeMap::from([
            ("cpu".to_string(), Quantity(REQUEST_CPU.to_string())),
            ("memory".to_string(), Quantity(REQUEST_MEMORY.to_string())),
        ]);
        Ok(ResourceRequirements {
            limits: Some(limits),
            requests: Some(requests),
            ..ResourceRequirements::default()
        })
    }

    /// Build the pod for a workspace.
    ///
    /// One container mounting the workspace claim at the declared path. A
    /// declared git repository adds a `git-cloner` init container that clones
    /// into `{mount}/workspace/{repo}`, and the IDE opens that directory.
    pub fn construct_pod(&self, ws: &Workspace) -> Result<Pod> {
        let name = ws.name_any();
        let spec = &ws.spec;
        let dir = workspace_dir(&spec.mount_path);

        let mount = VolumeMount {
            name: VOLUME_NAME.to_string(),
            mount_path: spec.mount_path.clone(),
            read_only: Some(false),
            ..VolumeMount::default()
        };

        let repository = spec.git_repository.as_deref().filter(|r| !r.is_empty());
        let open_dir = match repository {
            Some(repo) => format!("{}/{}", dir, repository_dir(repo)),
            None => dir,
        };

        let init_containers = repository.map(|repo| {
            vec![Container {
                name: GIT_CLONER.to_string(),
                image: Some(self.config.git_cloner_image.clone()),
                image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
                working_dir: Some(spec.mount_path.clone()),
                volume_mounts: Some(vec![mount.clone()]),
                env: Some(vec![env("REPO_URL", repo), env("LOCAL_PATH", &open_dir)]),
                ..Container::default()
            }]
        });

        let resources = match self.config.mode {
            RuntimeMode::Release => Some(self.resources(ws)?),
            RuntimeMode::Dev => None,
        };

        let container = Container {
            name: name.clone(),
            image: Some(spec.image.clone()),
            image_pull_policy: Some(PULL_IF_NOT_PRESENT.to_string()),
            ports: Some(vec![ContainerPort {
                container_port: spec.port,
                ..ContainerPort::default()
            }]),
            volume_mounts: Some(vec![mount]),
            env: Some(vec![env(OPEN_DIR_ENV, &open_dir)]),
            resources,
            ..Container::default()
        };

        let (app_key, app_value) = POD_APP_LABEL;
        let mut metadata = self.child_meta(ws);
        metadata.labels = Some(BTreeMap::from([(
            app_key.to_string(),
            app_value.to_string(),
        )]));
        metadata.annotations = Some(BTreeMap::from([
            (ANNOTATION_SID.to_string(), spec.sid.clone()),
            (ANNOTATION_UID.to_string(), spec.uid.clone()),
        ]));

        Ok(Pod {
            metadata,
            spec: Some(PodSpec {
                volumes: Some(vec![Volume {
                    name: VOLUME_NAME.to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: name,
                        read_only: Some(false),
                    }),
                    ..Volume::default()
                }]),
                init_containers,
                containers: vec![container],
                ..PodSpec::default()
            }),
            status: None,
        })
    }

    /// Build the storage claim for a workspace, sized by its storage spec.
    pub fn construct_claim(&self, ws: &Workspace) -> Result<PersistentVolumeClaim> {
        let storage = self.quantity(ws, "storage", &ws.spec.storage)?;
        let size = BTreeMap::from([("storage".to_string(), storage)]);

        Ok(PersistentVolumeClaim {
            metadata: self.child_meta(ws),
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteMany".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    limits: Some(size.clone()),
                    requests: Some(size),
                }),
                storage_class_name: self.config.storage_class.clone(),
                ..PersistentVolumeClaimSpec::default()
            }),
            status: None,
        })
    }

    async fn ensure_claim(&self, ws: &Workspace) -> Result<()> {
        let name = ws.name_any();
        let after = self.config.op_timeout;
        if with_timeout("get claim", after, self.cluster.get_claim(&name))
            .await?
            .is_some()
        {
            return Ok(());
        }

        let claim = self.construct_claim(ws)?;
        info!(name = %name, storage = %ws.spec.storage, "creating storage claim");
        match with_timeout("create claim", after, self.cluster.create_claim(&claim)).await {
            Err(e) if !e.is_already_exists() => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn ensure_pod(&self, ws: &Workspace) -> Result<()> {
        let name = ws.name_any();
        let after = self.config.op_timeout;
        if with_timeout("get pod", after, self.cluster.get_pod(&name))
            .await?
            .is_some()
        {
            return Ok(());
        }

        let pod = self.construct_pod(ws)?;
        info!(name = %name, image = %ws.spec.image, "creating pod");
        match with_timeout("create pod", after, self.cluster.create_pod(&pod)).await {
            Err(e) if !e.is_already_exists() => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn remove_pod(&self, name: &str) -> Result<()> {
        let after = self.config.op_timeout;
        if with_timeout("get pod", after, self.cluster.get_pod(name))
            .await?
            .is_none()
        {
            return Ok(());
        }

        info!(name, "deleting pod");
        ignore_missing(with_timeout("delete pod", after, self.cluster.delete_pod(name)).await)
    }

    async fn remove_claim(&self, name: &str) -> Result<()> {
        let after = self.config.op_timeout;
        if with_timeout("get claim", after, self.cluster.get_claim(name))
            .await?
            .is_none()
        {
            return Ok(());
        }

        info!(name, "deleting storage claim");
        ignore_missing(with_timeout("delete claim", after, self.cluster.delete_claim(name)).await)
    }
}

fn ignore_missing(result: std::result::Result<(), ClusterError>) -> Result<()> {
    match result {
        Err(e) if !e.is_not_found() => Err(e.into()),
        _ => Ok(()),
    }
}

#[async_trait]
impl Reconciler for WorkspaceReconciler {
    #[instrument(skip(self), fields(controller = "workspace"))]
    async fn reconcile(&self, key: &str) -> Result<()> {
        let after = self.config.op_timeout;
        let Some(ws) = with_timeout("get workspace", after, self.cluster.get_workspace(key)).await?
        else {
            debug!("workspace is gone, cleaning up");
            self.remove_pod(key).await?;
            return self.remove_claim(key).await;
        };

        match ws.spec.command {
            WorkspaceCommand::Start => {
                self.ensure_claim(&ws).await?;
                self.ensure_pod(&ws).await
            }
            WorkspaceCommand::Stop => self.remove_pod(key).await,
            WorkspaceCommand::None => Ok(()),
        }
    }
}
