//! Supervision for drain tasks.

use std::sync::{Mutex, PoisonError};

use {
    parley_common::ThreadId,
    tokio::task::{JoinError, JoinSet},
    tracing::{debug, error},
};

/// Owns every spawned drain so panics are logged and shutdown can wait for
/// in-flight work.
#[derive(Default)]
pub(crate) struct DrainTasks {
    set: Mutex<JoinSet<ThreadId>>,
}

fn log_exit(result: Result<ThreadId, JoinError>) {
    match result {
        Ok(thread_id) => debug!(thread_id = %thread_id, "drain task finished"),
        Err(e) if e.is_panic() => error!(error = %e, "drain task panicked"),
        Err(e) => debug!(error = %e, "drain task cancelled"),
    }
}

impl DrainTasks {
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ThreadId> + Send + 'static,
    {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(result) = set.try_join_next() {
            log_exit(result);
        }
        set.spawn(task);
    }

    pub(crate) fn len(&self) -> usize {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait for every spawned task, including ones spawned while waiting.
    pub(crate) async fn join_all(&self) {
        loop {
            let mut set = {
                let mut guard = self.set.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *guard)
            };
            if set.is_empty() {
                return;
            }
            while let Some(result) = set.join_next().await {
                log_exit(result);
            }
        }
    }
}
