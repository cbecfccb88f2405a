use std::time::Duration;

use sandbox_controller::{ControllerConfig, RuntimeMode};
use sandbox_notifier::GatewayConfig;
use sandbox_orchestrator::ServiceConfig;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key} '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Process configuration, read once at startup and split into the
/// per-component configs.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub namespace: String,
    pub mode: RuntimeMode,
    pub storage_class: String,
    /// Only with dynamic provisioning do claims name `storage_class`.
    pub dynamic_provisioning: bool,
    pub git_cloner_image: String,
    pub reconcile_workers: usize,
    /// Bound on the reconciler's create/delete calls.
    pub reconcile_timeout: Duration,
    /// Bound on each cluster call made while serving a request.
    pub op_timeout: Duration,
    pub gateway_url: String,
    pub gateway_token: String,
    pub gateway_workers: usize,
    /// Skip TLS verification of the gateway's certificate.
    pub gateway_insecure: bool,
    pub create_wait: Duration,
    pub start_wait: Duration,
}

fn parse<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_secs(key: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    parse(key, raw, default).map(Duration::from_secs)
}

impl Config {
    /// Read `SANDBOX_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let gateway_token = var("SANDBOX_GATEWAY_TOKEN").ok_or(ConfigError::Missing("SANDBOX_GATEWAY_TOKEN"))?;
        let gateway_url = var("SANDBOX_GATEWAY_URL").unwrap_or_else(|| {
            let service = var("SANDBOX_GATEWAY_SERVICE")
                .unwrap_or_else(|| "cloud-ide-gateway-svc".to_string());
            let path = var("SANDBOX_GATEWAY_PATH")
                .unwrap_or_else(|| "/internal/endpoint".to_string());
            format!("https://{service}{path}")
        });

        let config = Self {
            bind_addr: var("SANDBOX_BIND").unwrap_or_else(|| "0.0.0.0:6387".to_string()),
            namespace: var("SANDBOX_NAMESPACE").unwrap_or_else(|| "cloud-ide-ws".to_string()),
            mode: parse("SANDBOX_MODE", var("SANDBOX_MODE"), RuntimeMode::Release)?,
            storage_class: var("SANDBOX_STORAGE_CLASS").unwrap_or_else(|| "nfs-csi".to_string()),
            dynamic_provisioning: parse(
                "SANDBOX_DYNAMIC_PROVISIONING",
                var("SANDBOX_DYNAMIC_PROVISIONING"),
                false,
            )?,
            git_cloner_image: var("SANDBOX_GIT_CLONER_IMAGE")
                .unwrap_or_else(|| ControllerConfig::default().git_cloner_image),
            reconcile_workers: parse("SANDBOX_RECONCILE_WORKERS", var("SANDBOX_RECONCILE_WORKERS"), 8)?,
            reconcile_timeout: parse_secs(
                "SANDBOX_RECONCILE_TIMEOUT_SECS",
                var("SANDBOX_RECONCILE_TIMEOUT_SECS"),
                30,
            )?,
            op_timeout: parse_secs("SANDBOX_OP_TIMEOUT_SECS", var("SANDBOX_OP_TIMEOUT_SECS"), 10)?,
            gateway_url,
            gateway_token,
            gateway_workers: parse("SANDBOX_GATEWAY_WORKERS", var("SANDBOX_GATEWAY_WORKERS"), 8)?,
            gateway_insecure: parse("SANDBOX_GATEWAY_INSECURE", var("SANDBOX_GATEWAY_INSECURE"), false)?,
            create_wait: parse_secs("SANDBOX_CREATE_WAIT_SECS", var("SANDBOX_CREATE_WAIT_SECS"), 60)?,
            start_wait: parse_secs("SANDBOX_START_WAIT_SECS", var("SANDBOX_START_WAIT_SECS"), 90)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("SANDBOX_RECONCILE_WORKERS", self.reconcile_workers),
            ("SANDBOX_GATEWAY_WORKERS", self.gateway_workers),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if !self.gateway_url.starts_with("http://") && !self.gateway_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                key: "SANDBOX_GATEWAY_URL",
                value: self.gateway_url.clone(),
                reason: "must be an http(s) URL".to_string(),
            });
        }
        Ok(())
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            namespace: self.namespace.clone(),
            mode: self.mode,
            storage_class: self
                .dynamic_provisioning
                .then(|| self.storage_class.clone()),
            git_cloner_image: self.git_cloner_image.clone(),
            op_timeout: self.reconcile_timeout,
            workers: self.reconcile_workers,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            workers: self.gateway_workers,
            accept_invalid_certs: self.gateway_insecure,
            ..GatewayConfig::new(self.gateway_url.clone(), self.gateway_token.clone())
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            create_wait: self.create_wait,
            start_wait: self.start_wait,
            op_timeout: self.op_timeout,
            ..ServiceConfig::default()
        }
    }
}
