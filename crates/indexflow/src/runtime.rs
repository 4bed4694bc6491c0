//! Shared tokio runtime bridging the async lifecycle core to blocking
//! callers.
//!
//! Every `blocking_*` adapter drives its async twin with [`block_on`]. This
//! is only sound from threads that are not executing an async task: call
//! the async variants from inside a runtime.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Runtime;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// The process-wide runtime. Tasks spawned from blocking adapters (such as
/// a live update started with [`LiveUpdater::start`](crate::LiveUpdater::start))
/// keep running on its workers after the adapter returns.
pub fn get_runtime() -> &'static Runtime {
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("indexflow-bridge")
            .enable_all()
            .build()
            .expect("failed to create tokio runtime for indexflow blocking adapters")
    })
}

pub fn block_on<F: Future>(fut: F) -> F::Output {
    get_runtime().block_on(fut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_on_runs_future_to_completion() {
        let out = block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            41 + 1
        });
        assert_eq!(out, 42);
    }

    #[test]
    fn spawned_tasks_outlive_block_on() {
        let (tx, rx) = std::sync::mpsc::channel();
        block_on(async move {
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                let _ = tx.send(7);
            });
        });
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 7);
    }
}
