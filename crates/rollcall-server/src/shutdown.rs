//! Cooperative shutdown of the server's background tasks.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long [`ShutdownCoordinator::drain`] waits before aborting.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the cancellation token every long-lived task watches, plus the
/// handles of those tasks.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl ShutdownCoordinator {
    /// Coordinator with no tracked tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the shared cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a named task that [`drain`](Self::drain) will wait for.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.track(name, tokio::spawn(task));
    }

    /// Track a task spawned elsewhere.
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().push((name, handle));
    }

    /// Cancel the token without waiting.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    #[cfg(test)]
    pub(crate) fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token and wait for tracked tasks until `timeout` elapses.
    /// Returns the names of tasks that had to be aborted.
    pub async fn drain(&self, timeout: Duration) -> Vec<&'static str> {
        self.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(tasks = tasks.len(), timeout_secs = timeout.as_secs(), "draining background tasks");

        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = Vec::new();
        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(task = name, "task stopped"),
                Ok(Err(e)) => warn!(task = name, error = %e, "task ended abnormally"),
                Err(_) => {
                    handle.abort();
                    aborted.push(name);
                }
            }
        }
        if !aborted.is_empty() {
            warn!(?aborted, "shutdown deadline passed, tasks aborted");
        }
        aborted
    }
}
