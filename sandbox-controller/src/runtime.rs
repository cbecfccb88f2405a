//! Reconcile loop.
//!
//! Changed keys from a watch stream go into a [`WorkQueue`], which never
//! hands a key to two workers at once; a fixed pool of workers drains it.
//! Keys whose reconcile fails transiently are requeued with backoff.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use sandbox_core::{Backoff, WorkQueue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ReconcileError;

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Converge the object named `key`. Must be idempotent.
    async fn reconcile(&self, key: &str) -> Result<(), ReconcileError>;
}

/// Run `reconciler` over every key from `keys` until `shutdown` fires or the
/// stream ends.
pub async fn run_controller(
    name: &'static str,
    reconciler: Arc<dyn Reconciler>,
    mut keys: BoxStream<'static, String>,
    workers: usize,
    backoff: Backoff,
    shutdown: CancellationToken,
) {
    let queue = WorkQueue::new(backoff);
    let workers = workers.max(1);
    info!(controller = name, workers, "starting controller");

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let reconciler = Arc::clone(&reconciler);
            tokio::spawn(worker(name, queue, reconciler))
        })
        .collect();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            key = keys.next() => match key {
                Some(key) => queue.add(key),
                None => {
                    warn!(controller = name, "watch stream ended");
                    break;
                }
            },
        }
    }

    queue.shut_down();
    for handle in handles {
        if let Err(e) = handle.await {
            error!(controller = name, error = %e, "worker panicked");
        }
    }
    info!(controller = name, "controller stopped");
}

async fn worker(name: &'static str, queue: Arc<WorkQueue<String>>, reconciler: Arc<dyn Reconciler>) {
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(()) => queue.forget(&key),
            Err(e) if e.is_permanent() => {
                error!(controller = name, key = %key, error = %e, "reconcile failed permanently");
                queue.forget(&key);
            }
            Err(e) => {
                let retries = queue.num_requeues(&key);
                warn!(controller = name, key = %key, retries, error = %e, "reconcile failed, requeueing");
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }
    debug!(controller = name, "worker stopped");
}
