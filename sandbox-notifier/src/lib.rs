//! Gateway notifier.
//!
//! Two jobs behind one handle:
//! - keep the edge gateway's sid -> endpoint table current by queueing
//!   register/deregister calls that a worker pool sends asynchronously;
//! - let a synchronous caller block until a workspace reports ready
//!   (the rendezvous registry).

pub mod gateway;
pub mod rendezvous;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use gateway::{GatewayAction, GatewayClient, GatewayConfig, GatewayError};
pub use rendezvous::{Rendezvous, Subscription, WaitError};

/// Destination for endpoint registration changes.
pub trait Registrar: Send + Sync {
    /// Make `sid` reachable at `endpoint` (`ip:port`).
    fn login(&self, sid: &str, endpoint: &str);

    /// Remove `sid` from the gateway.
    fn logout(&self, sid: &str);
}

/// What the pod observer drives when a pod changes state.
pub trait Notifier: Registrar {
    /// Signal anyone waiting for `sid` to become ready; a no-op when nobody waits.
    fn notify(&self, sid: &str);
}

/// Blocks a caller until a workspace becomes ready.
#[async_trait]
pub trait Waiter: Send + Sync {
    /// Register interest in `sid` now; waiting happens on the returned handle.
    fn subscribe(&self, sid: &str) -> Subscription;

    /// Wait at most `budget` for `sid` to be notified.
    async fn wait_for(&self, sid: &str, budget: Duration) -> Result<(), WaitError> {
        self.subscribe(sid).wait(budget).await
    }
}

/// The production notifier: a registrar (normally [`GatewayClient`]) paired
/// with a rendezvous registry.
#[derive(Clone)]
pub struct WorkspaceNotifier {
    registrar: Arc<dyn Registrar>,
    rendezvous: Rendezvous,
}

impl WorkspaceNotifier {
    pub fn new(registrar: Arc<dyn Registrar>, rendezvous: Rendezvous) -> Self {
        Self {
            registrar,
            rendezvous,
        }
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }
}

impl Registrar for WorkspaceNotifier {
    fn login(&self, sid: &str, endpoint: &str) {
        self.registrar.login(sid, endpoint);
    }

    fn logout(&self, sid: &str) {
        self.registrar.logout(sid);
    }
}

impl Notifier for WorkspaceNotifier {
    fn notify(&self, sid: &str) {
        self.rendezvous.notify(sid);
    }
}

#[async_trait]
impl Waiter for WorkspaceNotifier {
    fn subscribe(&self, sid: &str) -> Subscription {
        self.rendezvous.subscribe(sid)
    }
}

#[async_trait]
impl Waiter for Rendezvous {
    fn subscribe(&self, sid: &str) -> Subscription {
        Rendezvous::subscribe(self, sid)
    }
}
