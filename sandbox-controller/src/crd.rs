//! Workspace custom resource.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const LABEL_UID: &str = "uid";
pub const LABEL_SID: &str = "sid";

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cloud-ide.dev",
    version = "v1",
    kind = "Workspace",
    namespaced,
    status = "WorkspaceStatus",
    shortname = "ws",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Hardware","type":"string","jsonPath":".spec.hardware"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Owning user id.
    #[schemars(length(min = 6, max = 24), regex(pattern = r"^[a-z0-9]+$"))]
    pub uid: String,

    /// Sandbox id.
    #[schemars(length(min = 6, max = 24), regex(pattern = r"^[a-z0-9]+$"))]
    pub sid: String,

    pub cpu: String,
    pub memory: String,
    pub storage: String,

    /// Human-readable summary of the limits, e.g. `2C4G10G`.
    #[serde(default)]
    pub hardware: String,

    pub image: String,
    #[schemars(range(min = 1024, max = 65535))]
    pub port: i32,
    pub mount_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_repository: Option<String>,

    #[serde(default, rename = "operation")]
    pub command: WorkspaceCommand,
}

/// Desired lifecycle action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum WorkspaceCommand {
    Start,
    Stop,
    #[default]
    #[serde(rename = "")]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkspaceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<WorkspacePhase>,
}

/// Observed lifecycle stage, derived from the workspace's pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum WorkspacePhase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl WorkspacePhase {
    /// Starting or Running; the workspace occupies its user's slot.
    pub fn is_active(self) -> bool {
        matches!(self, WorkspacePhase::Starting | WorkspacePhase::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkspacePhase::Starting => "Starting",
            WorkspacePhase::Running => "Running",
            WorkspacePhase::Stopping => "Stopping",
            WorkspacePhase::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for WorkspacePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Workspace {
    /// Build a named workspace labelled with its owner and sandbox ids.
    pub fn named(name: &str, namespace: &str, spec: WorkspaceSpec) -> Self {
        let labels = BTreeMap::from([
            (LABEL_UID.to_string(), spec.uid.clone()),
            (LABEL_SID.to_string(), spec.sid.clone()),
        ]);
        Workspace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..ObjectMeta::default()
            },
            spec,
            status: None,
        }
    }

    pub fn phase(&self) -> Option<WorkspacePhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::CustomResourceExt;

    fn spec() -> WorkspaceSpec {
        WorkspaceSpec {
            uid: "user000001".into(),
            sid: "sand00001".into(),
            cpu: "2".into(),
            memory: "4Gi".into(),
            storage: "10Gi".into(),
            hardware: "2C4G10G".into(),
            image: "img:v1".into(),
            port: 9999,
            mount_path: "/data".into(),
            git_repository: None,
            command: WorkspaceCommand::Start,
        }
    }

    #[test]
    fn test_spec_wire_format() {
        let value = serde_json::to_value(spec()).unwrap();
        assert_eq!(value["mountPath"], "/data");
        assert_eq!(value["operation"], "Start");
        assert!(value.get("gitRepository").is_none());

        let mut stopped = spec();
        stopped.command = WorkspaceCommand::None;
        assert_eq!(serde_json::to_value(stopped).unwrap()["operation"], "");
    }

    #[test]
    fn test_missing_command_defaults_to_none() {
        let value = serde_json::json!({
            "uid": "user000001", "sid": "sand00001", "cpu": "2", "memory": "4Gi",
            "storage": "10Gi", "image": "img:v1", "port": 9999, "mountPath": "/data"
        });
        let spec: WorkspaceSpec = serde_json::from_value(value).unwrap();
        assert_eq!(spec.command, WorkspaceCommand::None);
        assert_eq!(spec.hardware, "");
    }

    #[test]
    fn test_named_sets_labels() {
        let ws = Workspace::named("ws-user000001-sand00001", "cloud-ide-ws", spec());
        let labels = ws.metadata.labels.unwrap();
        assert_eq!(labels["uid"], "user000001");
        assert_eq!(labels["sid"], "sand00001");
        assert_eq!(ws.status, None);
    }

    #[test]
    fn test_phase_activity() {
        assert!(WorkspacePhase::Starting.is_active());
        assert!(WorkspacePhase::Running.is_active());
        assert!(!WorkspacePhase::Stopping.is_active());
        assert!(!WorkspacePhase::Stopped.is_active());
    }

    #[test]
    fn test_crd_definition() {
        let crd = Workspace::crd();
        assert_eq!(crd.spec.group, "cloud-ide.dev");
        assert_eq!(crd.spec.names.kind, "Workspace");
        assert_eq!(crd.spec.scope, "Namespaced");
    }

    #[test]
    fn test_crd_schema_bounds() {
        let crd = serde_json::to_value(Workspace::crd()).unwrap();
        let props = &crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"]
            ["properties"];

        for field in ["uid", "sid"] {
            assert_eq!(props[field]["minLength"].as_u64(), Some(6), "{field}");
            assert_eq!(props[field]["maxLength"].as_u64(), Some(24), "{field}");
            assert_eq!(props[field]["pattern"], "^[a-z0-9]+$", "{field}");
        }
        assert_eq!(props["port"]["minimum"].as_f64(), Some(1024.0));
        assert_eq!(props["port"]["maximum"].as_f64(), Some(65535.0));
    }
}
