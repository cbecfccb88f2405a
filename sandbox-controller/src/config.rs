use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How workspace pods are sized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuntimeMode {
    /// Apply the declared cpu/memory as limits.
    #[default]
    Release,
    /// Run pods unconstrained, for local clusters.
    Dev,
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "release" => Ok(RuntimeMode::Release),
            "dev" => Ok(RuntimeMode::Dev),
            other => Err(format!("unknown runtime mode '{other}' (expected release or dev)")),
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeMode::Release => f.write_str("release"),
            RuntimeMode::Dev => f.write_str("dev"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub namespace: String,
    pub mode: RuntimeMode,
    /// Storage class for new claims; `None` binds to pre-provisioned volumes.
    pub storage_class: Option<String>,
    pub git_cloner_image: String,
    /// Bound on each create/delete call against the cluster.
    pub op_timeout: Duration,
    /// Concurrent reconciles per controller.
    pub workers: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "cloud-ide-ws".to_string(),
            mode: RuntimeMode::Release,
            storage_class: None,
            git_cloner_image: "cloud-ide/git-cloner:v1.0".to_string(),
            op_timeout: Duration::from_secs(30),
            workers: 8,
        }
    }
}
