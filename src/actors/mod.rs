//! Supervised background tasks.
//!
//! Every long-running loop (heartbeat, listeners, step driver, health
//! sweeps) is an independent tokio task owned through an [`ActorHandle`].
//! Owners cancel and join their handles on shutdown; dropping a handle
//! cancels the task so nothing outlives its owner.

pub mod heartbeat;

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use heartbeat::HeartbeatActor;

/// Handle to a running actor, used for graceful shutdown.
pub struct ActorHandle {
    name: &'static str,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl ActorHandle {
    /// Spawn `f` with a fresh cancellation token.
    pub fn spawn<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(f(cancel.clone()));
        debug!(actor = name, "spawned");
        Self {
            name,
            cancel,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the actor to shut down without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(|j| j.is_finished()).unwrap_or(true)
    }

    /// Cancel the actor and wait for its task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(actor = self.name, error = %e, "actor ended abnormally");
            }
        }
        debug!(actor = self.name, "stopped");
    }
}

impl Drop for ActorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cancel every handle first, then join them in order.
pub async fn shutdown_all(handles: Vec<ActorHandle>) {
    for handle in &handles {
        handle.cancel();
    }
    for handle in handles {
        handle.shutdown().await;
    }
}
