use std::sync::{Arc, Mutex};
use std::time::Duration;

use sandbox_controller::cluster::memory::{Kubelet, MemoryCluster};
use sandbox_controller::{spawn_controllers, ControllerConfig};
use sandbox_notifier::{Registrar, Rendezvous, WorkspaceNotifier};
use tokio_util::sync::CancellationToken;

use crate::{ServiceConfig, WorkspaceService};

pub const NAMESPACE: &str = "cloud-ide-ws";

/// Gateway stand-in that records registrations as `login <sid> <endpoint>`
/// and `logout <sid>`.
#[derive(Default)]
pub struct RecordingRegistrar(Mutex<Vec<String>>);

impl RecordingRegistrar {
    pub fn events(&self) -> Vec<String> {
        self.0.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl Registrar for RecordingRegistrar {
    fn login(&self, sid: &str, endpoint: &str) {
        if let Ok(mut events) = self.0.lock() {
            events.push(format!("login {sid} {endpoint}"));
        }
    }

    fn logout(&self, sid: &str) {
        if let Ok(mut events) = self.0.lock() {
            events.push(format!("logout {sid}"));
        }
    }
}

/// A whole control plane on an in-memory cluster: both controllers, the
/// notifier and the service. Controllers stop when the plane is dropped.
pub struct TestPlane {
    pub cluster: Arc<MemoryCluster>,
    pub gateway: Arc<RecordingRegistrar>,
    pub notifier: Arc<WorkspaceNotifier>,
    pub service: WorkspaceService,
    shutdown: CancellationToken,
}

impl TestPlane {
    /// Start a plane. Without a kubelet, pods never leave Pending.
    /// Must be called inside a tokio runtime.
    pub fn start(kubelet: Option<Kubelet>, config: ServiceConfig) -> Self {
        let cluster = MemoryCluster::new(NAMESPACE);
        if let Some(kubelet) = kubelet {
            cluster.set_kubelet(kubelet);
        }
        let gateway = Arc::new(RecordingRegistrar::default());
        let notifier = Arc::new(WorkspaceNotifier::new(gateway.clone(), Rendezvous::new()));
        let shutdown = CancellationToken::new();

        spawn_controllers(
            cluster.clone(),
            notifier.clone(),
            ControllerConfig {
                namespace: NAMESPACE.to_string(),
                op_timeout: Duration::from_secs(1),
                workers: 2,
                ..ControllerConfig::default()
            },
            shutdown.clone(),
        );
        let service = WorkspaceService::new(cluster.clone(), notifier.clone(), config);

        Self {
            cluster,
            gateway,
            notifier,
            service,
            shutdown,
        }
    }
}

impl Drop for TestPlane {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.notifier.rendezvous().close();
    }
}
