//! In-memory [`ClusterApi`] for tests.
//!
//! Behaves like a single-namespace API server: resource versions with
//! optimistic-concurrency conflicts, change events for watches, and an
//! optional simulated kubelet that moves new pods to Running. Every call is
//! recorded so tests can assert on what a component did, and faults or
//! latency can be injected per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;
use tokio::sync::broadcast;

use super::{ClusterApi, ClusterError, WatchKind};
use crate::crd::{Workspace, WorkspacePhase, WorkspaceStatus, LABEL_UID};

/// Simulated node agent.
#[derive(Debug, Clone)]
pub struct Kubelet {
    pub pod_ip: String,
    /// Time from pod creation to Running.
    pub start_delay: Duration,
    /// When set, deleted pods stay Terminating this long before they vanish.
    pub grace_period: Option<Duration>,
}

impl Default for Kubelet {
    fn default() -> Self {
        Self {
            pod_ip: "10.0.0.7".to_string(),
            start_delay: Duration::from_millis(20),
            grace_period: None,
        }
    }
}

#[derive(Default)]
struct State {
    workspaces: BTreeMap<String, Workspace>,
    pods: BTreeMap<String, Pod>,
    claims: BTreeMap<String, PersistentVolumeClaim>,
    version: u64,
    calls: Vec<String>,
    phases: Vec<(String, WorkspacePhase)>,
    faults: HashMap<&'static str, VecDeque<ClusterError>>,
    latency: HashMap<&'static str, Duration>,
    kubelet: Option<Kubelet>,
    cascade: bool,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Record a call and pop any fault queued for it.
    fn enter(&mut self, op: &'static str, name: &str) -> (Option<ClusterError>, Option<Duration>) {
        self.calls.push(format!("{op} {name}"));
        let fault = self.faults.get_mut(op).and_then(VecDeque::pop_front);
        (fault, self.latency.get(op).copied())
    }
}

pub struct MemoryCluster {
    namespace: String,
    state: Mutex<State>,
    events: broadcast::Sender<(WatchKind, String)>,
    this: Weak<MemoryCluster>,
}

fn not_found(kind: &'static str, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn already_exists(kind: &'static str, name: &str) -> ClusterError {
    ClusterError::AlreadyExists {
        kind,
        name: name.to_string(),
    }
}

fn name_of(meta: &ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

impl MemoryCluster {
    pub fn new(namespace: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new_cyclic(|this| Self {
            namespace: namespace.to_string(),
            state: Mutex::new(State::default()),
            events,
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: WatchKind, name: &str) {
        // No receivers just means nobody watches yet.
        let _ = self.events.send((kind, name.to_string()));
    }

    async fn enter(&self, op: &'static str, name: &str) -> Result<(), ClusterError> {
        let (fault, latency) = self.lock().enter(op, name);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run a simulated kubelet for pods created from now on.
    pub fn set_kubelet(&self, kubelet: Kubelet) {
        self.lock().kubelet = Some(kubelet);
    }

    /// Delete owned pods and claims together with their workspace.
    pub fn set_cascade(&self, cascade: bool) {
        self.lock().cascade = cascade;
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: &'static str, err: ClusterError) {
        self.lock().faults.entry(op).or_default().push_back(err);
    }

    /// Delay every call of `op` by `latency`.
    pub fn set_latency(&self, op: &'static str, latency: Duration) {
        self.lock().latency.insert(op, latency);
    }

    /// Every call so far, as `"<op> <name>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls of `op`.
    pub fn count(&self, op: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(op))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Phases written to the status of workspace `name`, oldest first.
    pub fn phase_history(&self, name: &str) -> Vec<WorkspacePhase> {
        self.lock()
            .phases
            .iter()
            .filter(|(ws, _)| ws == name)
            .map(|(_, phase)| *phase)
            .collect()
    }

    pub fn workspace(&self, name: &str) -> Option<Workspace> {
        self.lock().workspaces.get(name).cloned()
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.lock().pods.get(name).cloned()
    }

    pub fn claim(&self, name: &str) -> Option<PersistentVolumeClaim> {
        self.lock().claims.get(name).cloned()
    }

    pub fn pod_count(&self) -> usize {
        self.lock().pods.len()
    }

    pub fn claim_count(&self) -> usize {
        self.lock().claims.len()
    }

    /// Store a workspace directly, bypassing call recording.
    pub fn insert_workspace(&self, mut workspace: Workspace) {
        let name = name_of(&workspace.metadata);
        {
            let mut state = self.lock();
            let version = state.next_version();
            workspace.metadata.uid.get_or_insert_with(|| format!("uid-{name}"));
            workspace.metadata.resource_version = Some(version);
            state.workspaces.insert(name.clone(), workspace);
        }
        self.emit(WatchKind::Workspace, &name);
    }

    /// Store a pod directly, bypassing call recording and the kubelet.
    pub fn insert_pod(&self, mut pod: Pod) {
        let name = name_of(&pod.metadata);
        {
            let mut state = self.lock();
            pod.metadata.resource_version = Some(state.next_version());
            state.pods.insert(name.clone(), pod);
        }
        self.emit(WatchKind::Pod, &name);
    }

    /// Set a pod's phase; Running also assigns `ip`.
    pub fn set_pod_phase(&self, name: &str, phase: &str, ip: Option<&str>) {
        let changed = {
            let mut state = self.lock();
            let version = state.next_version();
            match state.pods.get_mut(name) {
                Some(pod) => {
                    let status = pod.status.get_or_insert_with(PodStatus::default);
                    status.phase = Some(phase.to_string());
                    if let Some(ip) = ip {
                        status.pod_ip = Some(ip.to_string());
                    }
                    pod.metadata.resource_version = Some(version);
                    true
                }
                None => false,
            }
        };
        if changed {
            self.emit(WatchKind::Pod, name);
        }
    }

    pub fn set_pod_running(&self, name: &str, ip: &str) {
        self.set_pod_phase(name, "Running", Some(ip));
    }

    /// Give a pod a deletion timestamp without removing it.
    pub fn mark_pod_terminating(&self, name: &str) {
        let changed = {
            let mut state = self.lock();
            match state.pods.get_mut(name) {
                Some(pod) => {
                    pod.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                    true
                }
                None => false,
            }
        };
        if changed {
            self.emit(WatchKind::Pod, name);
        }
    }

    /// Remove a pod outright, as when its grace period ends.
    pub fn remove_pod(&self, name: &str) {
        if self.lock().pods.remove(name).is_some() {
            self.emit(WatchKind::Pod, name);
        }
    }

    fn start_kubelet(&self, name: &str, kubelet: Kubelet) {
        let Some(cluster) = self.this.upgrade() else {
            return;
        };
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(kubelet.start_delay).await;
            let terminating = match cluster.pod(&name) {
                Some(pod) => pod.metadata.deletion_timestamp.is_some(),
                None => return,
            };
            if !terminating {
                cluster.set_pod_running(&name, &kubelet.pod_ip);
            }
        });
    }

    fn finish_termination(&self, name: &str, grace: Duration) {
        let Some(cluster) = self.this.upgrade() else {
            return;
        };
        let name = name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            cluster.remove_pod(&name);
        });
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_workspace(&self, name: &str) -> Result<Option<Workspace>, ClusterError> {
        self.enter("get_workspace", name).await?;
        Ok(self.workspace(name))
    }

    async fn list_workspaces(&self, uid: &str) -> Result<Vec<Workspace>, ClusterError> {
        self.enter("list_workspaces", uid).await?;
        Ok(self
            .lock()
            .workspaces
            .values()
            .filter(|ws| ws.labels().get(LABEL_UID).map(String::as_str) == Some(uid))
            .cloned()
            .collect())
    }

    async fn create_workspace(&self, workspace: &Workspace) -> Result<Workspace, ClusterError> {
        let name = name_of(&workspace.metadata);
        self.enter("create_workspace", &name).await?;

        let created = {
            let mut state = self.lock();
            if state.workspaces.contains_key(&name) {
                return Err(already_exists("workspace", &name));
            }
            let version = state.next_version();
            let mut created = workspace.clone();
            created.metadata.namespace = Some(self.namespace.clone());
            created.metadata.uid = Some(format!("uid-{name}-{version}"));
            created.metadata.resource_version = Some(version);
            created.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
            state.workspaces.insert(name.clone(), created.clone());
            created
        };
        self.emit(WatchKind::Workspace, &name);
        Ok(created)
    }

    async fn replace_workspace(&self, workspace: &Workspace) -> Result<Workspace, ClusterError> {
        let name = name_of(&workspace.metadata);
        self.enter("replace_workspace", &name).await?;

        let replaced = {
            let mut state = self.lock();
            let version = state.next_version();
            let stored = state
                .workspaces
                .get_mut(&name)
                .ok_or_else(|| not_found("workspace", &name))?;

            let expected = workspace.metadata.resource_version.as_deref();
            if expected.is_some() && expected != stored.metadata.resource_version.as_deref() {
                return Err(ClusterError::Conflict {
                    kind: "workspace",
                    name,
                });
            }

            stored.spec = workspace.spec.clone();
            stored.metadata.labels = workspace.metadata.labels.clone();
            stored.metadata.resource_version = Some(version);
            stored.clone()
        };
        self.emit(WatchKind::Workspace, &name);
        Ok(replaced)
    }

    async fn set_workspace_phase(
        &self,
        name: &str,
        phase: WorkspacePhase,
    ) -> Result<(), ClusterError> {
        self.enter("set_workspace_phase", name).await?;
        {
            let mut state = self.lock();
            let version = state.next_version();
            let stored = state
                .workspaces
                .get_mut(name)
                .ok_or_else(|| not_found("workspace", name))?;
            stored.status = Some(WorkspaceStatus { phase: Some(phase) });
            stored.metadata.resource_version = Some(version);
            state.phases.push((name.to_string(), phase));
        }
        self.emit(WatchKind::Workspace, name);
        Ok(())
    }

    async fn delete_workspace(&self, name: &str) -> Result<(), ClusterError> {
        self.enter("delete_workspace", name).await?;

        let owned_pods = {
            let mut state = self.lock();
            let removed = state
                .workspaces
                .remove(name)
                .ok_or_else(|| not_found("workspace", name))?;

            if state.cascade {
                let uid = removed.metadata.uid;
                let owned = |meta: &ObjectMeta| {
                    meta.owner_references
                        .iter()
                        .flatten()
                        .any(|owner| Some(&owner.uid) == uid.as_ref())
                };
                let pods: Vec<String> = state
                    .pods
                    .iter()
                    .filter(|(_, pod)| owned(&pod.metadata))
                    .map(|(name, _)| name.clone())
                    .collect();
                for pod in &pods {
                    state.pods.remove(pod);
                }
                state.claims.retain(|_, claim| !owned(&claim.metadata));
                pods
            } else {
                Vec::new()
            }
        };

        self.emit(WatchKind::Workspace, name);
        for pod in owned_pods {
            self.emit(WatchKind::Pod, &pod);
        }
        Ok(())
    }

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, ClusterError> {
        self.enter("get_pod", name).await?;
        Ok(self.pod(name))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<(), ClusterError> {
        let name = name_of(&pod.metadata);
        self.enter("create_pod", &name).await?;

        let kubelet = {
            let mut state = self.lock();
            if state.pods.contains_key(&name) {
                return Err(already_exists("pod", &name));
            }
            let mut created = pod.clone();
            created.metadata.namespace = Some(self.namespace.clone());
            created.metadata.resource_version = Some(state.next_version());
            created.status = Some(PodStatus {
                phase: Some("Pending".to_string()),
                ..PodStatus::default()
            });
            state.pods.insert(name.clone(), created);
            state.kubelet.clone()
        };

        self.emit(WatchKind::Pod, &name);
        if let Some(kubelet) = kubelet {
            self.start_kubelet(&name, kubelet);
        }
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> Result<(), ClusterError> {
        self.enter("delete_pod", name).await?;

        let grace = {
            let mut state = self.lock();
            let grace = state.kubelet.as_ref().and_then(|k| k.grace_period);
            match grace {
                Some(_) => {
                    let pod = state
                        .pods
                        .get_mut(name)
                        .ok_or_else(|| not_found("pod", name))?;
                    pod.metadata
                        .deletion_timestamp
                        .get_or_insert_with(|| Time(chrono::Utc::now()));
                }
                None => {
                    state
                        .pods
                        .remove(name)
                        .ok_or_else(|| not_found("pod", name))?;
                }
            }
            grace
        };

        self.emit(WatchKind::Pod, name);
        if let Some(grace) = grace {
            self.finish_termination(name, grace);
        }
        Ok(())
    }

    async fn get_claim(&self, name: &str) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        self.enter("get_claim", name).await?;
        Ok(self.claim(name))
    }

    async fn create_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), ClusterError> {
        let name = name_of(&claim.metadata);
        self.enter("create_claim", &name).await?;

        let mut state = self.lock();
        if state.claims.contains_key(&name) {
            return Err(already_exists("persistentvolumeclaim", &name));
        }
        let mut created = claim.clone();
        created.metadata.namespace = Some(self.namespace.clone());
        created.metadata.resource_version = Some(state.next_version());
        state.claims.insert(name, created);
        Ok(())
    }

    async fn delete_claim(&self, name: &str) -> Result<(), ClusterError> {
        self.enter("delete_claim", name).await?;
        self.lock()
            .claims
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("persistentvolumeclaim", name))
    }

    fn watch(&self, kind: WatchKind) -> BoxStream<'static, String> {
        let receiver = self.events.subscribe();
        let existing: Vec<String> = {
            let state = self.lock();
            match kind {
                WatchKind::Workspace => state.workspaces.keys().cloned().collect(),
                WatchKind::Pod => state.pods.keys().cloned().collect(),
            }
        };

        let changes = stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok((changed, name)) if changed == kind => return Some((name, receiver)),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        stream::iter(existing).chain(changes).boxed()
    }
}
