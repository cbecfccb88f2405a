//! Integration tests for sandbox-orchestrator
//!
//! Drives the service against a full in-memory control plane: both
//! controllers, the rendezvous and a simulated kubelet.

use std::time::Duration;

use sandbox_controller::cluster::memory::Kubelet;
use sandbox_controller::{WorkspaceCommand, WorkspacePhase};
use sandbox_orchestrator::test_utils::TestPlane;
use sandbox_orchestrator::{
    CreateSpaceRequest, ResourceLimit, RunningWorkspace, ServiceConfig, ServiceError,
};

const UID: &str = "user000001";
const SID: &str = "sand00001";
const NAME: &str = "ws-user000001-sand00001";

fn limit() -> ResourceLimit {
    ResourceLimit {
        cpu: "2".to_string(),
        memory: "4Gi".to_string(),
        storage: "10Gi".to_string(),
    }
}

fn create_request() -> CreateSpaceRequest {
    CreateSpaceRequest {
        image: "img:v1".to_string(),
        port: 9999,
        mount_path: "/data".to_string(),
        git_repository: None,
        resource_limit: limit(),
    }
}

fn short_waits() -> ServiceConfig {
    ServiceConfig {
        create_wait: Duration::from_millis(300),
        start_wait: Duration::from_millis(300),
        ..ServiceConfig::default()
    }
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn phase(plane: &TestPlane, name: &str) -> Option<WorkspacePhase> {
    plane.cluster.workspace(name).and_then(|ws| ws.phase())
}

#[tokio::test]
async fn test_create_reaches_running() {
    let plane = TestPlane::start(Some(Kubelet::default()), ServiceConfig::default());

    plane
        .service
        .create_space(UID, SID, create_request())
        .await
        .expect("create should succeed");

    assert_eq!(phase(&plane, NAME), Some(WorkspacePhase::Running));
    assert_eq!(
        plane.cluster.phase_history(NAME),
        vec![WorkspacePhase::Starting, WorkspacePhase::Running]
    );

    // One container, one mount at /data, no git init container.
    let pod = plane.cluster.pod(NAME).expect("pod should exist");
    let spec = pod.spec.expect("pod spec");
    assert_eq!(spec.containers.len(), 1);
    let mounts = spec.containers[0].volume_mounts.clone().unwrap_or_default();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].mount_path, "/data");
    assert!(spec.init_containers.unwrap_or_default().is_empty());

    assert!(plane
        .gateway
        .events()
        .contains(&"login sand00001 10.0.0.7:9999".to_string()));
    assert_eq!(
        plane.service.running_workspaces(UID).await.unwrap(),
        vec![RunningWorkspace {
            sid: SID.to_string(),
            name: NAME.to_string(),
        }]
    );
}

#[tokio::test]
async fn test_concurrent_create_has_one_winner() {
    let plane = TestPlane::start(Some(Kubelet::default()), ServiceConfig::default());
    // Both calls get past the existence check before either creates.
    plane
        .cluster
        .set_latency("create_workspace", Duration::from_millis(50));

    let (first, second) = tokio::join!(
        plane.service.create_space(UID, SID, create_request()),
        plane.service.create_space(UID, SID, create_request()),
    );

    let results = [first, second];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let exists = results
        .iter()
        .filter(|r| matches!(r, Err(ServiceError::AlreadyExists(_))))
        .count();
    assert_eq!((ok, exists), (1, 1));
    assert_eq!(plane.cluster.pod_count(), 1);
}

#[tokio::test]
async fn test_create_timeout_stops_workspace() {
    let plane = TestPlane::start(None, short_waits());

    let err = plane
        .service
        .create_space(UID, SID, create_request())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::NotReady { .. }));
    assert_eq!(
        plane.cluster.workspace(NAME).unwrap().spec.command,
        WorkspaceCommand::Stop
    );
    eventually("stopped phase", || {
        phase(&plane, NAME) == Some(WorkspacePhase::Stopped)
    })
    .await;
    assert_eq!(plane.cluster.pod_count(), 0);
    assert_eq!(plane.notifier.rendezvous().waiting(), 0);
}

#[tokio::test]
async fn test_start_timeout_stops_workspace() {
    let plane = TestPlane::start(Some(Kubelet::default()), short_waits());
    plane
        .service
        .create_space(UID, SID, create_request())
        .await
        .unwrap();
    plane.service.stop_space(UID, SID).await.unwrap();
    eventually("stopped phase", || {
        phase(&plane, NAME) == Some(WorkspacePhase::Stopped)
    })
    .await;

    // From now on pods never become Running.
    plane.cluster.set_kubelet(Kubelet {
        start_delay: Duration::from_secs(3600),
        ..Kubelet::default()
    });

    let err = plane
        .service
        .start_space(UID, SID, limit())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::NotReady { .. }));
    assert_eq!(
        plane.cluster.workspace(NAME).unwrap().spec.command,
        WorkspaceCommand::Stop
    );
    eventually("pod removed", || plane.cluster.pod_count() == 0).await;
}

#[tokio::test]
async fn test_stop_then_start_again() {
    let plane = TestPlane::start(Some(Kubelet::default()), ServiceConfig::default());
    plane
        .service
        .create_space(UID, SID, create_request())
        .await
        .unwrap();

    plane.service.stop_space(UID, SID).await.unwrap();
    eventually("stopped phase", || {
        phase(&plane, NAME) == Some(WorkspacePhase::Stopped)
    })
    .await;
    assert!(plane.service.running_workspaces(UID).await.unwrap().is_empty());
    assert_eq!(plane.cluster.claim_count(), 1);

    // Stopping again is a no-op.
    let replaces = plane.cluster.count("replace_workspace");
    plane.service.stop_space(UID, SID).await.unwrap();
    assert_eq!(plane.cluster.count("replace_workspace"), replaces);

    plane.service.start_space(UID, SID, limit()).await.unwrap();
    assert_eq!(phase(&plane, NAME), Some(WorkspacePhase::Running));
    assert_eq!(plane.cluster.count("create_claim"), 1);
}

#[tokio::test]
async fn test_one_active_workspace_per_user() {
    let plane = TestPlane::start(Some(Kubelet::default()), ServiceConfig::default());
    plane
        .service
        .create_space(UID, SID, create_request())
        .await
        .unwrap();

    let err = plane
        .service
        .create_space(UID, "sand00002", create_request())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UserBusy { .. }));

    plane.service.stop_space(UID, SID).await.unwrap();
    eventually("stopped phase", || {
        phase(&plane, NAME) == Some(WorkspacePhase::Stopped)
    })
    .await;

    plane
        .service
        .create_space(UID, "sand00002", create_request())
        .await
        .expect("second workspace should start once the first stopped");
}

#[tokio::test]
async fn test_delete_cleans_up() {
    let plane = TestPlane::start(Some(Kubelet::default()), ServiceConfig::default());
    plane
        .service
        .create_space(UID, SID, create_request())
        .await
        .unwrap();

    plane.service.delete_space(UID, SID).await.unwrap();

    assert!(plane.cluster.workspace(NAME).is_none());
    eventually("children removed", || {
        plane.cluster.pod_count() == 0 && plane.cluster.claim_count() == 0
    })
    .await;
    // Deleting again succeeds.
    plane.service.delete_space(UID, SID).await.unwrap();
}
