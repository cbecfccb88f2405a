//! Asynchronous endpoint registration with the edge gateway.
//!
//! `login`/`logout` only record the latest wanted state for a sid and queue
//! the sid; a pool of workers turns queued sids into HTTP calls. Because the
//! pending table holds one action per sid, a newer call supersedes an older
//! one that has not been sent yet, and the queue never hands the same sid to
//! two workers at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::Client;
use sandbox_core::{Backoff, WorkQueue};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Registrar;

/// Header carrying the shared gateway secret.
pub const TOKEN_HEADER: &str = "token";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("failed to build gateway HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("gateway request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("gateway answered with status {0}")]
    Status(u16),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Registration endpoint, e.g. `https://cloud-ide-gateway-svc/internal/endpoint`.
    pub url: String,
    pub token: String,
    pub workers: usize,
    pub request_timeout: Duration,
    /// Attempts per action before it is dropped.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Skip certificate verification; the in-cluster gateway uses a self-signed cert.
    pub accept_invalid_certs: bool,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            workers: 8,
            request_timeout: Duration::from_secs(10),
            max_attempts: 5,
            backoff: Backoff {
                base: Duration::from_millis(200),
                max: Duration::from_secs(30),
            },
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayAction {
    Register { endpoint: String },
    Deregister,
}

impl GatewayAction {
    fn verb(&self) -> &'static str {
        match self {
            GatewayAction::Register { .. } => "register",
            GatewayAction::Deregister => "deregister",
        }
    }
}

#[derive(Serialize)]
struct Registration<'a> {
    sid: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<&'a str>,
}

struct Inner {
    http: Client,
    config: GatewayConfig,
    queue: Arc<WorkQueue<String>>,
    pending: Mutex<HashMap<String, GatewayAction>>,
}

/// Client for the gateway's registration API.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<Inner>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        // HTTP/2 is negotiated over TLS when the gateway offers it, so all
        // workers multiplex over one pooled connection.
        let http = Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .user_agent(concat!("sandboxd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(GatewayError::Client)?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                queue: WorkQueue::new(config.backoff),
                config,
                pending: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Start the worker pool. Workers exit once `shutdown` is cancelled;
    /// actions still queued at that point are dropped.
    pub fn spawn_workers(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let workers = self.inner.config.workers.max(1);
        info!(workers, url = %self.inner.config.url, "starting gateway workers");

        let mut handles = Vec::with_capacity(workers + 1);
        for id in 0..workers {
            let client = self.clone();
            handles.push(tokio::spawn(async move { client.worker(id).await }));
        }

        let queue = Arc::clone(&self.inner.queue);
        handles.push(tokio::spawn(async move {
            shutdown.cancelled().await;
            queue.shut_down();
        }));

        handles
    }

    /// Record `action` as the wanted state for `sid` and queue it.
    pub fn enqueue(&self, sid: &str, action: GatewayAction) {
        debug!(sid, action = action.verb(), "queueing gateway call");
        let key = sid.to_string();
        let previous = self.pending().insert(key.clone(), action.clone());
        if previous.as_ref() != Some(&action) {
            // A new action starts with a full retry budget.
            self.inner.queue.forget(&key);
        }
        self.inner.queue.add(key);
    }

    /// Number of sids with an action not yet delivered.
    pub fn backlog(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, GatewayAction>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop `sid` from the pending table if its action is still `sent`.
    fn settle(&self, sid: &str, sent: &GatewayAction) {
        let mut pending = self.pending();
        if pending.get(sid) == Some(sent) {
            pending.remove(sid);
        }
    }

    async fn worker(&self, id: usize) {
        let queue = &self.inner.queue;
        while let Some(sid) = queue.get().await {
            let action = self.pending().get(&sid).cloned();
            if let Some(action) = action {
                self.process(&sid, action).await;
            }
            queue.done(&sid);
        }
        debug!(worker = id, "gateway worker stopped");
    }

    async fn process(&self, sid: &str, action: GatewayAction) {
        let queue = &self.inner.queue;
        let key = sid.to_string();

        match self.send(sid, &action).await {
            Ok(()) => {
                debug!(sid, action = action.verb(), "gateway updated");
                queue.forget(&key);
                self.settle(sid, &action);
            }
            Err(e) if self.pending().get(sid) != Some(&action) => {
                // Superseded while in flight; the newer action is already queued.
                debug!(sid, action = action.verb(), error = %e, "superseded gateway call failed");
                queue.forget(&key);
            }
            Err(e) => {
                let attempts = queue.num_requeues(&key) + 1;
                if attempts < self.inner.config.max_attempts {
                    warn!(sid, action = action.verb(), attempts, error = %e, "gateway call failed, retrying");
                    queue.add_rate_limited(key);
                } else {
                    error!(sid, action = action.verb(), attempts, error = %e, "gateway call failed, giving up");
                    queue.forget(&key);
                    self.settle(sid, &action);
                }
            }
        }
    }

    async fn send(&self, sid: &str, action: &GatewayAction) -> Result<(), GatewayError> {
        let url = &self.inner.config.url;
        let request = match action {
            GatewayAction::Register { endpoint } => self.inner.http.post(url).json(&Registration {
                sid,
                endpoint: Some(endpoint),
            }),
            GatewayAction::Deregister => self
                .inner
                .http
                .delete(url)
                .json(&Registration { sid, endpoint: None }),
        };

        let response = request
            .header(TOKEN_HEADER, &self.inner.config.token)
            .send()
            .await
            .map_err(GatewayError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }
        Ok(())
    }
}

impl Registrar for GatewayClient {
    fn login(&self, sid: &str, endpoint: &str) {
        self.enqueue(
            sid,
            GatewayAction::Register {
                endpoint: endpoint.to_string(),
            },
        );
    }

    fn logout(&self, sid: &str) {
        self.enqueue(sid, GatewayAction::Deregister);
    }
}
