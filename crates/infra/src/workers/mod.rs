//! Background worker plumbing shared by the relay and the DLQ worker.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn `run` on the runtime. The closure receives the shutdown signal
    /// and is expected to return once it fires.
    pub fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(Arc<Notify>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let join = tokio::spawn(run(shutdown.clone()));
        debug!(worker = name, "worker started");
        Self {
            name,
            shutdown,
            join,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request shutdown without waiting. A signal sent before the worker
    /// starts waiting is kept.
    pub fn cancel(&self) {
        self.shutdown.notify_one();
    }

    /// Wait for the worker to stop on its own (or after [`cancel`](Self::cancel)).
    pub async fn join(self) {
        if let Err(err) = self.join.await {
            if err.is_panic() {
                error!(worker = self.name, "worker panicked");
            }
        }
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(self) {
        self.cancel();
        self.join().await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
