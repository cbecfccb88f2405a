//! Workspace lifecycle operations exposed to the RPC layer.
//!
//! The service never touches pods or claims. It only declares what a
//! workspace should be doing and, for start-like operations, waits until
//! the pod observer reports the workspace ready.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sandbox_controller::cluster::with_timeout;
use sandbox_controller::{
    ClusterApi, ClusterError, Workspace, WorkspaceCommand, WorkspacePhase, WorkspaceSpec,
};
use sandbox_core::validation::validate_id;
use sandbox_core::workspace_name;
use sandbox_notifier::{Subscription, Waiter};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, ServiceError};
use crate::request::{CreateSpaceRequest, ResourceLimit, RunningWorkspace};

/// Pause between attempts after a version conflict, multiplied by the attempt.
const CONFLICT_BACKOFF: Duration = Duration::from_millis(10);

/// Name probed by [`WorkspaceService::check_cluster`]; never a valid workspace.
const PROBE_NAME: &str = "ws-readiness-probe";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How long CreateSpace waits for the workspace to become ready.
    pub create_wait: Duration,
    /// How long StartSpace waits for the workspace to become ready.
    pub start_wait: Duration,
    /// Deadline for a single cluster API call.
    pub op_timeout: Duration,
    /// Extra attempts after a version conflict before giving up.
    pub conflict_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            create_wait: Duration::from_secs(60),
            start_wait: Duration::from_secs(90),
            op_timeout: Duration::from_secs(10),
            conflict_retries: 5,
        }
    }
}

#[derive(Clone)]
pub struct WorkspaceService {
    cluster: Arc<dyn ClusterApi>,
    waiter: Arc<dyn Waiter>,
    config: ServiceConfig,
}

fn validate_ids(uid: &str, sid: &str) -> Result<()> {
    validate_id("uid", uid)?;
    validate_id("sid", sid)?;
    Ok(())
}

impl WorkspaceService {
    pub fn new(cluster: Arc<dyn ClusterApi>, waiter: Arc<dyn Waiter>, config: ServiceConfig) -> Self {
        Self {
            cluster,
            waiter,
            config,
        }
    }

    /// Create a workspace commanded to Start and wait until it is ready.
    #[instrument(skip(self, req))]
    pub async fn create_space(&self, uid: &str, sid: &str, req: CreateSpaceRequest) -> Result<()> {
        validate_ids(uid, sid)?;
        req.validate()?;

        let name = workspace_name(uid, sid);
        if self.get(&name).await?.is_some() {
            return Err(ServiceError::AlreadyExists(name));
        }
        self.ensure_user_idle(uid, sid).await?;

        let workspace = Workspace::named(&name, self.cluster.namespace(), req.into_spec(uid, sid));
        // Subscribe first so a pod that comes up quickly cannot be missed.
        let ready = self.waiter.subscribe(sid);
        match self
            .call("create workspace", self.cluster.create_workspace(&workspace))
            .await
        {
            Ok(_) => {}
            Err(ServiceError::Cluster(e)) if e.is_already_exists() => {
                return Err(ServiceError::AlreadyExists(name));
            }
            Err(e) => return Err(e),
        }

        info!(name = %name, "workspace created, waiting for it to become ready");
        self.await_ready(&name, ready, self.config.create_wait).await
    }

    /// Start a stopped workspace with possibly new cpu and memory limits.
    ///
    /// Storage cannot change after creation; `limit.storage` is validated
    /// but otherwise ignored.
    #[instrument(skip(self, limit))]
    pub async fn start_space(&self, uid: &str, sid: &str, limit: ResourceLimit) -> Result<()> {
        validate_ids(uid, sid)?;
        limit.validate()?;

        let name = workspace_name(uid, sid);
        let current = self
            .get_owned(&name, uid, sid)
            .await?
            .ok_or_else(|| ServiceError::NotFound(name.clone()))?;
        if current.phase().is_some_and(WorkspacePhase::is_active) {
            debug!(name = %name, "workspace already starting or running");
            return Ok(());
        }
        self.ensure_user_idle(uid, sid).await?;

        let ready = self.waiter.subscribe(sid);
        self.update_spec(&name, |spec| {
            spec.cpu = limit.cpu.clone();
            spec.memory = limit.memory.clone();
            spec.hardware = ResourceLimit {
                cpu: spec.cpu.clone(),
                memory: spec.memory.clone(),
                storage: spec.storage.clone(),
            }
            .hardware();
            spec.command = WorkspaceCommand::Start;
        })
        .await?;

        info!(name = %name, "workspace start requested, waiting for it to become ready");
        self.await_ready(&name, ready, self.config.start_wait).await
    }

    /// Command a workspace to stop. Returns once the command is stored; the
    /// pod goes away asynchronously.
    #[instrument(skip(self))]
    pub async fn stop_space(&self, uid: &str, sid: &str) -> Result<()> {
        validate_ids(uid, sid)?;

        let name = workspace_name(uid, sid);
        let current = self
            .get_owned(&name, uid, sid)
            .await?
            .ok_or_else(|| ServiceError::NotFound(name.clone()))?;
        if matches!(
            current.phase(),
            Some(WorkspacePhase::Stopping | WorkspacePhase::Stopped)
        ) {
            debug!(name = %name, "workspace already stopping or stopped");
            return Ok(());
        }

        self.request_stop(&name).await?;
        info!(name = %name, "workspace stop requested");
        Ok(())
    }

    /// Delete a workspace; its pod and claim are cleaned up by the reconciler.
    /// Deleting a missing workspace succeeds.
    #[instrument(skip(self))]
    pub async fn delete_space(&self, uid: &str, sid: &str) -> Result<()> {
        validate_ids(uid, sid)?;

        let name = workspace_name(uid, sid);
        if self.get_owned(&name, uid, sid).await?.is_none() {
            return Ok(());
        }

        match self
            .call("delete workspace", self.cluster.delete_workspace(&name))
            .await
        {
            Ok(()) => {
                info!(name = %name, "workspace deleted");
                Ok(())
            }
            Err(ServiceError::Cluster(e)) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// The user's workspaces that are Starting or Running.
    pub async fn running_workspaces(&self, uid: &str) -> Result<Vec<RunningWorkspace>> {
        validate_id("uid", uid)?;

        let workspaces = self
            .call("list workspaces", self.cluster.list_workspaces(uid))
            .await?;
        Ok(workspaces
            .into_iter()
            .filter(|ws| ws.phase().is_some_and(WorkspacePhase::is_active))
            .map(|ws| RunningWorkspace {
                name: ws.metadata.name.unwrap_or_default(),
                sid: ws.spec.sid,
            })
            .collect())
    }

    /// Succeeds when the cluster API answers.
    pub async fn check_cluster(&self) -> Result<()> {
        self.call("probe cluster", self.cluster.get_workspace(PROBE_NAME))
            .await
            .map(|_| ())
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = std::result::Result<T, ClusterError>>,
    ) -> Result<T> {
        Ok(with_timeout(operation, self.config.op_timeout, call).await?)
    }

    async fn get(&self, name: &str) -> Result<Option<Workspace>> {
        self.call("get workspace", self.cluster.get_workspace(name))
            .await
    }

    /// Like [`Self::get`], but a workspace stored for another `(uid, sid)`
    /// counts as absent.
    async fn get_owned(&self, name: &str, uid: &str, sid: &str) -> Result<Option<Workspace>> {
        let workspace = self.get(name).await?;
        Ok(workspace.filter(|ws| {
            let owned = ws.spec.uid == uid && ws.spec.sid == sid;
            if !owned {
                warn!(name, uid, sid, owner = %ws.spec.uid, "workspace belongs to another user");
            }
            owned
        }))
    }

    /// Reject when another of the user's workspaces is Starting or Running.
    ///
    /// Two concurrent calls can both pass; the cluster's own create and
    /// update semantics pick the winner.
    async fn ensure_user_idle(&self, uid: &str, sid: &str) -> Result<()> {
        let workspaces = self
            .call("list workspaces", self.cluster.list_workspaces(uid))
            .await?;
        let busy = workspaces
            .into_iter()
            .find(|ws| ws.spec.sid != sid && ws.phase().is_some_and(WorkspacePhase::is_active));

        match busy {
            Some(ws) => Err(ServiceError::UserBusy {
                uid: uid.to_string(),
                active: ws.metadata.name.unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }

    async fn request_stop(&self, name: &str) -> Result<Workspace> {
        self.update_spec(name, |spec| spec.command = WorkspaceCommand::Stop)
            .await
    }

    /// Apply `mutate` to the latest spec and write it back, refetching and
    /// reapplying when the write loses a version conflict.
    async fn update_spec<F>(&self, name: &str, mutate: F) -> Result<Workspace>
    where
        F: Fn(&mut WorkspaceSpec),
    {
        let mut attempt = 0;
        loop {
            let mut workspace = self
                .get(name)
                .await?
                .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
            mutate(&mut workspace.spec);

            match self
                .call("replace workspace", self.cluster.replace_workspace(&workspace))
                .await
            {
                Ok(updated) => return Ok(updated),
                Err(ServiceError::Cluster(e)) if e.is_conflict() => {
                    if attempt >= self.config.conflict_retries {
                        return Err(e.into());
                    }
                    attempt += 1;
                    debug!(name, attempt, "workspace modified concurrently, retrying");
                    tokio::time::sleep(CONFLICT_BACKOFF * attempt).await;
                }
                Err(ServiceError::Cluster(e)) if e.is_not_found() => {
                    return Err(ServiceError::NotFound(name.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait on `ready`; when the budget runs out, command the workspace to
    /// stop so it does not come up unobserved later.
    async fn await_ready(&self, name: &str, ready: Subscription, budget: Duration) -> Result<()> {
        match ready.wait(budget).await {
            Ok(()) => {
                info!(name, "workspace is ready");
                Ok(())
            }
            Err(source) => {
                warn!(name, error = %source, "workspace did not become ready, stopping it");
                if let Err(e) = self.request_stop(name).await {
                    error!(name, error = %e, "failed to stop workspace after readiness failure");
                }
                Err(ServiceError::NotReady {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_controller::cluster::memory::MemoryCluster;
    use sandbox_notifier::Rendezvous;

    const UID: &str = "user000001";
    const SID: &str = "sand00001";
    const NAME: &str = "ws-user000001-sand00001";

    fn setup(config: ServiceConfig) -> (Arc<MemoryCluster>, Rendezvous, WorkspaceService) {
        let cluster = MemoryCluster::new("cloud-ide-ws");
        let rendezvous = Rendezvous::new();
        let service = WorkspaceService::new(
            cluster.clone(),
            Arc::new(rendezvous.clone()),
            config,
        );
        (cluster, rendezvous, service)
    }

    fn limit() -> ResourceLimit {
        ResourceLimit {
            cpu: "2".into(),
            memory: "4Gi".into(),
            storage: "10Gi".into(),
        }
    }

    fn request() -> CreateSpaceRequest {
        CreateSpaceRequest {
            image: "img:v1".into(),
            port: 9999,
            mount_path: "/data".into(),
            git_repository: None,
            resource_limit: limit(),
        }
    }

    fn stored(uid: &str, sid: &str, phase: Option<WorkspacePhase>) -> Workspace {
        let mut ws = Workspace::named(
            &workspace_name(uid, sid),
            "cloud-ide-ws",
            request().into_spec(uid, sid),
        );
        ws.status = phase.map(|phase| sandbox_controller::WorkspaceStatus { phase: Some(phase) });
        ws
    }

    #[tokio::test]
    async fn test_invalid_ids_are_rejected_before_any_call() {
        let (cluster, _, service) = setup(ServiceConfig::default());

        let err = service.create_space("usr", SID, request()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
        let err = service.stop_space(UID, "Sand00001").await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));

        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_existing_workspace() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(stored(UID, SID, Some(WorkspacePhase::Stopped)));

        let err = service.create_space(UID, SID, request()).await.unwrap_err();

        assert!(matches!(err, ServiceError::AlreadyExists(name) if name == NAME));
        assert_eq!(cluster.count("create_workspace"), 0);
    }

    #[tokio::test]
    async fn test_create_waits_for_notify() {
        let (cluster, rendezvous, service) = setup(ServiceConfig::default());

        let create = tokio::spawn({
            let service = service.clone();
            async move { service.create_space(UID, SID, request()).await }
        });
        while cluster.workspace(NAME).is_none() {
            tokio::task::yield_now().await;
        }
        rendezvous.notify(SID);

        create.await.unwrap().unwrap();
        let ws = cluster.workspace(NAME).unwrap();
        assert_eq!(ws.spec.command, WorkspaceCommand::Start);
        assert_eq!(ws.spec.hardware, "2C4G10G");
        assert_eq!(rendezvous.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_timeout_stops_workspace() {
        let (cluster, rendezvous, service) = setup(ServiceConfig::default());

        let err = service.create_space(UID, SID, request()).await.unwrap_err();

        assert!(matches!(err, ServiceError::NotReady { .. }));
        let ws = cluster.workspace(NAME).unwrap();
        assert_eq!(ws.spec.command, WorkspaceCommand::Stop);
        assert_eq!(rendezvous.waiting(), 0);
    }

    #[tokio::test]
    async fn test_user_with_active_workspace_is_busy() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(stored(UID, "sand00002", Some(WorkspacePhase::Running)));

        let err = service.create_space(UID, SID, request()).await.unwrap_err();

        assert!(matches!(err, ServiceError::UserBusy { active, .. } if active == "ws-user000001-sand00002"));
        assert!(cluster.workspace(NAME).is_none());
    }

    #[tokio::test]
    async fn test_start_missing_workspace() {
        let (_, _, service) = setup(ServiceConfig::default());
        let err = service.start_space(UID, SID, limit()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_start_running_workspace_is_noop() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(stored(UID, SID, Some(WorkspacePhase::Running)));

        service.start_space(UID, SID, limit()).await.unwrap();

        assert_eq!(cluster.count("replace_workspace"), 0);
    }

    #[tokio::test]
    async fn test_start_updates_cpu_and_memory_only() {
        let (cluster, rendezvous, service) = setup(ServiceConfig::default());
        let mut ws = stored(UID, SID, Some(WorkspacePhase::Stopped));
        ws.spec.command = WorkspaceCommand::Stop;
        cluster.insert_workspace(ws);

        let start = tokio::spawn({
            let service = service.clone();
            async move {
                service
                    .start_space(
                        UID,
                        SID,
                        ResourceLimit {
                            cpu: "4".into(),
                            memory: "8Gi".into(),
                            storage: "50Gi".into(),
                        },
                    )
                    .await
            }
        });
        while cluster.count("replace_workspace") == 0 {
            tokio::task::yield_now().await;
        }
        rendezvous.notify(SID);
        start.await.unwrap().unwrap();

        let spec = cluster.workspace(NAME).unwrap().spec;
        assert_eq!(spec.command, WorkspaceCommand::Start);
        assert_eq!((spec.cpu.as_str(), spec.memory.as_str()), ("4", "8Gi"));
        assert_eq!(spec.storage, "10Gi");
        assert_eq!(spec.hardware, "4C8G10G");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_timeout_stops_workspace() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(stored(UID, SID, Some(WorkspacePhase::Stopped)));

        let err = service.start_space(UID, SID, limit()).await.unwrap_err();

        assert!(matches!(err, ServiceError::NotReady { .. }));
        assert_eq!(
            cluster.workspace(NAME).unwrap().spec.command,
            WorkspaceCommand::Stop
        );
    }

    #[tokio::test]
    async fn test_stop_stopped_workspace_is_noop() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(stored(UID, SID, Some(WorkspacePhase::Stopped)));

        service.stop_space(UID, SID).await.unwrap();

        assert_eq!(cluster.count("replace_workspace"), 0);
        assert_eq!(cluster.count("delete_pod"), 0);
    }

    #[tokio::test]
    async fn test_stop_sets_command() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(stored(UID, SID, Some(WorkspacePhase::Running)));

        service.stop_space(UID, SID).await.unwrap();

        assert_eq!(
            cluster.workspace(NAME).unwrap().spec.command,
            WorkspaceCommand::Stop
        );
    }

    #[tokio::test]
    async fn test_stop_missing_workspace() {
        let (_, _, service) = setup(ServiceConfig::default());
        let err = service.stop_space(UID, SID).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(stored(UID, SID, Some(WorkspacePhase::Running)));
        for _ in 0..2 {
            cluster.fail_next(
                "replace_workspace",
                ClusterError::Conflict {
                    kind: "workspace",
                    name: NAME.into(),
                },
            );
        }

        service.stop_space(UID, SID).await.unwrap();

        assert_eq!(cluster.count("replace_workspace"), 3);
        assert_eq!(
            cluster.workspace(NAME).unwrap().spec.command,
            WorkspaceCommand::Stop
        );
    }

    #[tokio::test]
    async fn test_conflict_retries_are_bounded() {
        let (cluster, _, service) = setup(ServiceConfig {
            conflict_retries: 1,
            ..ServiceConfig::default()
        });
        cluster.insert_workspace(stored(UID, SID, Some(WorkspacePhase::Running)));
        for _ in 0..3 {
            cluster.fail_next(
                "replace_workspace",
                ClusterError::Conflict {
                    kind: "workspace",
                    name: NAME.into(),
                },
            );
        }

        let err = service.stop_space(UID, SID).await.unwrap_err();

        assert!(matches!(err, ServiceError::Cluster(ClusterError::Conflict { .. })));
        assert_eq!(cluster.count("replace_workspace"), 2);
    }

    fn foreign(name: &str, owner_uid: &str, owner_sid: &str) -> Workspace {
        let mut ws = stored(owner_uid, owner_sid, Some(WorkspacePhase::Running));
        ws.metadata.name = Some(name.to_string());
        ws
    }

    #[tokio::test]
    async fn test_workspace_of_another_user_is_not_touched() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        // Stored under the name the caller's pair maps to, but owned by
        // someone else (written around the service).
        cluster.insert_workspace(foreign(NAME, "user000009", "sand00009"));

        let err = service.stop_space(UID, SID).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        let err = service.start_space(UID, SID, limit()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        service.delete_space(UID, SID).await.unwrap();

        let ws = cluster.workspace(NAME).unwrap();
        assert_eq!(ws.spec.uid, "user000009");
        assert_eq!(ws.spec.command, WorkspaceCommand::Start);
        assert_eq!(cluster.count("replace_workspace"), 0);
        assert_eq!(cluster.count("delete_workspace"), 0);
    }

    #[tokio::test]
    async fn test_hyphenated_ids_cannot_reach_another_workspace() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(foreign("ws-aaaaaa-b-cccccc", "aaaaaa-b", "cccccc"));

        let err = service.delete_space("aaaaaa", "b-cccccc").await.unwrap_err();

        assert!(matches!(err, ServiceError::InvalidArgument(_)));
        assert!(cluster.workspace("ws-aaaaaa-b-cccccc").is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(stored(UID, SID, Some(WorkspacePhase::Running)));

        service.delete_space(UID, SID).await.unwrap();
        assert!(cluster.workspace(NAME).is_none());

        // Already gone.
        service.delete_space(UID, SID).await.unwrap();
        assert_eq!(cluster.count("delete_workspace"), 1);
    }

    #[tokio::test]
    async fn test_running_workspaces() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.insert_workspace(stored(UID, "sand00001", Some(WorkspacePhase::Running)));
        cluster.insert_workspace(stored(UID, "sand00002", Some(WorkspacePhase::Stopped)));
        cluster.insert_workspace(stored(UID, "sand00003", Some(WorkspacePhase::Starting)));
        cluster.insert_workspace(stored("user000002", "sand00004", Some(WorkspacePhase::Running)));

        let mut running = service.running_workspaces(UID).await.unwrap();
        running.sort_by(|a, b| a.sid.cmp(&b.sid));

        assert_eq!(
            running,
            vec![
                RunningWorkspace {
                    sid: "sand00001".into(),
                    name: "ws-user000001-sand00001".into(),
                },
                RunningWorkspace {
                    sid: "sand00003".into(),
                    name: "ws-user000001-sand00003".into(),
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cluster_times_out() {
        let (cluster, _, service) = setup(ServiceConfig::default());
        cluster.set_latency("get_workspace", Duration::from_secs(60));

        let err = service.stop_space(UID, SID).await.unwrap_err();

        assert!(matches!(err, ServiceError::Cluster(ClusterError::Timeout { .. })));
    }
}
