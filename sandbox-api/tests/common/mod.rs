//! Common test utilities and helpers for sandbox-api tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use sandbox_api::{create_app, AppState};
use sandbox_controller::cluster::memory::Kubelet;
use sandbox_orchestrator::test_utils::TestPlane;
use sandbox_orchestrator::{CreateSpaceRequest, ResourceLimit, ServiceConfig};
use tower::ServiceExt; // for `oneshot`

pub const UID: &str = "user000001";
pub const SID: &str = "sand00001";
pub const NAME: &str = "ws-user000001-sand00001";

pub fn space_uri(uid: &str, sid: &str) -> String {
    format!("/api/v1/users/{uid}/spaces/{sid}")
}

pub fn resource_limit() -> ResourceLimit {
    ResourceLimit {
        cpu: "2".to_string(),
        memory: "4Gi".to_string(),
        storage: "10Gi".to_string(),
    }
}

pub fn create_request() -> CreateSpaceRequest {
    CreateSpaceRequest {
        image: "img:v1".to_string(),
        port: 9999,
        mount_path: "/data".to_string(),
        git_repository: None,
        resource_limit: resource_limit(),
    }
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub plane: TestPlane,
}

impl TestClient {
    pub fn new(kubelet: Option<Kubelet>, config: ServiceConfig) -> Self {
        let plane = TestPlane::start(kubelet, config);
        let app = create_app(AppState::new(plane.service.clone()));
        Self { app, plane }
    }

    /// Pods come up Running shortly after creation.
    pub fn healthy() -> Self {
        Self::new(Some(Kubelet::default()), ServiceConfig::default())
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Post JSON to an endpoint
    pub async fn post<T: serde::Serialize>(&self, uri: &str, body: &T) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap();
        self.send_request(request).await
    }

    /// Post without a body
    pub async fn post_empty(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }
}
