//! Workspace orchestration business logic
//!
//! Create, start, stop, delete and list user workspaces by declaring their
//! desired state on the cluster. Consumed by the sandbox-api HTTP service.

pub mod error;
pub mod request;
pub mod service;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use error::{Result, ServiceError};
pub use request::{CreateSpaceRequest, ResourceLimit, RunningWorkspace, StartSpaceRequest};
pub use service::{ServiceConfig, WorkspaceService};
