use sandbox_controller::{WorkspaceCommand, WorkspaceSpec};
use sandbox_core::naming::hardware_label;
use sandbox_core::validation::{
    validate_git_repository, validate_mount_path, validate_port, validate_resource_limit,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::Result;

/// Resources a workspace may use. Quantities use cluster notation
/// (`2`, `500m`, `4Gi`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResourceLimit {
    pub cpu: String,
    pub memory: String,
    pub storage: String,
}

impl ResourceLimit {
    pub fn validate(&self) -> Result<()> {
        validate_resource_limit(&self.cpu, &self.memory, &self.storage)?;
        Ok(())
    }

    /// e.g. `2C4G10G`
    pub fn hardware(&self) -> String {
        hardware_label(&self.cpu, &self.memory, &self.storage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSpaceRequest {
    pub image: String,
    pub port: i32,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repository: Option<String>,
    pub resource_limit: ResourceLimit,
}

impl CreateSpaceRequest {
    pub fn validate(&self) -> Result<()> {
        validate_port(i64::from(self.port))?;
        validate_git_repository(self.git_repository.as_deref())?;
        validate_mount_path(&self.mount_path)?;
        self.resource_limit.validate()
    }

    /// Declared state of a new workspace; it starts out commanded to Start.
    pub(crate) fn into_spec(self, uid: &str, sid: &str) -> WorkspaceSpec {
        WorkspaceSpec {
            uid: uid.to_string(),
            sid: sid.to_string(),
            hardware: self.resource_limit.hardware(),
            cpu: self.resource_limit.cpu,
            memory: self.resource_limit.memory,
            storage: self.resource_limit.storage,
            image: self.image,
            port: self.port,
            mount_path: self.mount_path,
            git_repository: self.git_repository.filter(|repo| !repo.is_empty()),
            command: WorkspaceCommand::Start,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartSpaceRequest {
    pub resource_limit: ResourceLimit,
}

/// A workspace of the user that is Starting or Running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RunningWorkspace {
    pub sid: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;

    fn request() -> CreateSpaceRequest {
        CreateSpaceRequest {
            image: "img:v1".into(),
            port: 9999,
            mount_path: "/data".into(),
            git_repository: None,
            resource_limit: ResourceLimit {
                cpu: "2".into(),
                memory: "4Gi".into(),
                storage: "10Gi".into(),
            },
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_invalid_fields_are_rejected() {
        let mut req = request();
        req.port = 80;
        assert!(matches!(
            req.validate(),
            Err(ServiceError::InvalidArgument(_))
        ));

        let mut req = request();
        req.mount_path = "data".into();
        assert!(req.validate().is_err());

        let mut req = request();
        req.git_repository = Some("git@github.com:acme/widgets.git".into());
        assert!(req.validate().is_err());

        let mut req = request();
        req.resource_limit.memory = "lots".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_into_spec() {
        let mut req = request();
        req.git_repository = Some(String::new());
        let spec = req.into_spec("user000001", "sand00001");

        assert_eq!(spec.hardware, "2C4G10G");
        assert_eq!(spec.command, WorkspaceCommand::Start);
        assert_eq!(spec.git_repository, None);
        assert_eq!(spec.mount_path, "/data");
    }

    #[test]
    fn test_wire_format() {
        let req: CreateSpaceRequest = serde_json::from_str(
            r#"{"image":"img:v1","port":9999,"mountPath":"/data",
                "resourceLimit":{"cpu":"2","memory":"4Gi","storage":"10Gi"}}"#,
        )
        .unwrap();
        assert_eq!(req, request());
    }
}
