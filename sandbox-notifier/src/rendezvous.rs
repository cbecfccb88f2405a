//! Wait-for-ready registry keyed by sandbox id.
//!
//! Each sid maps to a ready flag shared by every current waiter. Entries are
//! reference counted: the first [`Rendezvous::subscribe`] creates one, the
//! last [`Subscription`] to drop removes it, whichever way its wait ended.
//! Notifying a sid nobody waits for does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("workspace {sid} not ready within {budget:?}")]
    Timeout { sid: String, budget: Duration },

    #[error("wait for workspace {sid} cancelled")]
    Cancelled { sid: String },
}

struct Entry {
    ready: watch::Sender<bool>,
    waiters: usize,
}

struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
    closed: CancellationToken,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct Rendezvous {
    registry: Arc<Registry>,
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendezvous {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                entries: Mutex::new(HashMap::new()),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Start waiting for `sid`. A notify that lands between this call and
    /// [`Subscription::wait`] is not lost.
    pub fn subscribe(&self, sid: &str) -> Subscription {
        let mut entries = self.registry.lock();
        let entry = entries.entry(sid.to_string()).or_insert_with(|| {
            debug!(sid, "creating ready signal");
            Entry {
                ready: watch::Sender::new(false),
                waiters: 0,
            }
        });
        entry.waiters += 1;

        Subscription {
            sid: sid.to_string(),
            ready: entry.ready.subscribe(),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Mark `sid` ready, releasing all of its waiters.
    pub fn notify(&self, sid: &str) {
        match self.registry.lock().get(sid) {
            Some(entry) => {
                debug!(sid, waiters = entry.waiters, "signalling ready");
                entry.ready.send_replace(true);
            }
            None => debug!(sid, "no waiter registered"),
        }
    }

    /// Number of sids with at least one live waiter.
    pub fn waiting(&self) -> usize {
        self.registry.lock().len()
    }

    /// Cancel every current and future wait.
    pub fn close(&self) {
        self.registry.closed.cancel();
    }
}

/// A registered interest in one sid; dropping it releases the registration.
pub struct Subscription {
    sid: String,
    ready: watch::Receiver<bool>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Block until the sid is notified, `budget` elapses, or the registry is
    /// closed.
    pub async fn wait(mut self, budget: Duration) -> Result<(), WaitError> {
        let closed = self.registry.closed.clone();
        debug!(sid = %self.sid, ?budget, "waiting for ready");

        let ready = tokio::select! {
            changed = self.ready.wait_for(|ready| *ready) => changed.is_ok(),
            _ = tokio::time::sleep(budget) => {
                return Err(WaitError::Timeout {
                    sid: self.sid.clone(),
                    budget,
                });
            }
            _ = closed.cancelled() => false,
        };

        if ready {
            Ok(())
        } else {
            Err(WaitError::Cancelled {
                sid: self.sid.clone(),
            })
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut entries = self.registry.lock();
        if let Some(entry) = entries.get_mut(&self.sid) {
            entry.waiters = entry.waiters.saturating_sub(1);
            if entry.waiters == 0 {
                debug!(sid = %self.sid, "removing ready signal");
                entries.remove(&self.sid);
            }
        }
    }
}
