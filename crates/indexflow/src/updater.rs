//! Live update lifecycle.
//!
//! A [`LiveUpdater`] wraps one engine update process. The process state is
//! owned by the engine; this wrapper forwards start, wait, abort and stats
//! requests. Dropping the last handle aborts a process that is still
//! running.

use std::future::Future;
use std::sync::Arc;

use crate::errors::FlowError;
use crate::flow::Flow;
use crate::runtime;
use crate::traits::{UpdateProcess, UpdateStatus};
use crate::types::{IndexUpdateInfo, LiveUpdateOptions};

struct UpdaterInner {
    flow_name: String,
    process: Arc<dyn UpdateProcess>,
}

impl Drop for UpdaterInner {
    fn drop(&mut self) {
        if !self.process.status().is_terminal() {
            tracing::warn!(flow = %self.flow_name, "live updater dropped while running, aborting");
            self.process.abort();
        }
    }
}

/// Handle onto a running update of one flow.
#[derive(Clone)]
pub struct LiveUpdater {
    inner: Arc<UpdaterInner>,
}

impl LiveUpdater {
    /// Build `flow` if needed and start an update. Returns once the engine
    /// reports the process as started.
    pub async fn create(flow: &Flow, options: LiveUpdateOptions) -> Result<Self, FlowError> {
        let compiled = flow.compiled().await?;
        let process = compiled.start_update(&options).await?;
        tracing::info!(
            flow = compiled.name(),
            live_mode = options.live_mode,
            "live update started"
        );
        Ok(Self {
            inner: Arc::new(UpdaterInner {
                flow_name: compiled.name().to_string(),
                process,
            }),
        })
    }

    /// Blocking form of [`create`](Self::create).
    pub fn start(flow: &Flow, options: LiveUpdateOptions) -> Result<Self, FlowError> {
        runtime::block_on(Self::create(flow, options))
    }

    pub fn flow_name(&self) -> &str {
        &self.inner.flow_name
    }

    /// Wait until the update process has finished, including draining an
    /// abort request.
    pub async fn wait(&self) -> Result<(), FlowError> {
        self.inner.process.wait().await?;
        tracing::debug!(flow = %self.inner.flow_name, status = ?self.status(), "live update settled");
        Ok(())
    }

    pub fn blocking_wait(&self) -> Result<(), FlowError> {
        runtime::block_on(self.wait())
    }

    /// Request cooperative cancellation. Idempotent; does not block.
    pub fn abort(&self) {
        tracing::debug!(flow = %self.inner.flow_name, "aborting live update");
        self.inner.process.abort();
    }

    pub fn status(&self) -> UpdateStatus {
        self.inner.process.status()
    }

    /// A snapshot of the update counters so far.
    pub fn update_stats(&self) -> IndexUpdateInfo {
        self.inner.process.index_update_info()
    }

    /// Run `f` with this updater, then abort and wait on every exit path,
    /// including a panic in `f`.
    pub fn scoped<T>(self, f: impl FnOnce(&LiveUpdater) -> T) -> Result<T, FlowError> {
        let mut guard = AbortOnExit {
            updater: &self,
            armed: true,
        };
        let out = f(guard.updater);
        guard.armed = false;
        drop(guard);
        self.abort();
        self.blocking_wait()?;
        Ok(out)
    }

    /// Async form of [`scoped`](Self::scoped). If the returned future is
    /// dropped before completion the update is aborted but not awaited,
    /// even while other handles are alive.
    pub async fn scoped_async<T, F, Fut>(self, f: F) -> Result<T, FlowError>
    where
        F: FnOnce(LiveUpdater) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = AbortOnCancel {
            updater: &self,
            armed: true,
        };
        let out = f(self.clone()).await;
        guard.armed = false;
        drop(guard);
        self.abort();
        self.wait().await?;
        Ok(out)
    }
}

impl std::fmt::Debug for LiveUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveUpdater")
            .field("flow", &self.inner.flow_name)
            .field("status", &self.status())
            .finish()
    }
}

/// Aborts and waits if dropped while armed, i.e. during unwinding.
struct AbortOnExit<'a> {
    updater: &'a LiveUpdater,
    armed: bool,
}

impl Drop for AbortOnExit<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.updater.abort();
        if let Err(e) = self.updater.blocking_wait() {
            tracing::warn!(flow = %self.updater.flow_name(), error = %e, "live update failed during unwind");
        }
    }
}

/// Aborts without waiting if dropped while armed, i.e. when an async scope is
/// cancelled.
struct AbortOnCancel<'a> {
    updater: &'a LiveUpdater,
    armed: bool,
}

impl Drop for AbortOnCancel<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(flow = %self.updater.flow_name(), "scoped update cancelled");
            self.updater.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::defaults::InMemoryEngine;
    use crate::registry::FlowRegistry;
    use crate::types::{LocalFile, SourceOptions};

    fn live_flow() -> Flow {
        let engine = InMemoryEngine::builder()
            .source_rows("LocalFile", vec![json!({"filename": "a.md"})])
            .poll_interval(Duration::from_millis(5))
            .build();
        FlowRegistry::new(engine).define(Some("live"), |builder, root| {
            root.set_field(
                "documents",
                &builder.add_source(LocalFile::new("docs"), SourceOptions::default())?,
            )
        })
    }

    #[tokio::test]
    async fn abort_then_wait_terminates() {
        let updater = LiveUpdater::create(&live_flow(), LiveUpdateOptions::default())
            .await
            .unwrap();
        updater.abort();
        tokio::time::timeout(Duration::from_secs(5), updater.wait())
            .await
            .expect("wait should not hang")
            .unwrap();
        assert_eq!(updater.status(), UpdateStatus::Aborted);
        assert!(updater.update_stats().finished_at.is_some());
    }

    #[tokio::test]
    async fn abort_after_completion_is_harmless() {
        let updater = LiveUpdater::create(&live_flow(), LiveUpdateOptions::one_shot())
            .await
            .unwrap();
        updater.wait().await.unwrap();
        updater.abort();
        updater.wait().await.unwrap();
        assert_eq!(updater.status(), UpdateStatus::Finished);
        assert_eq!(
            updater.update_stats().source("documents").unwrap().num_insertions,
            1
        );
    }

    #[tokio::test]
    async fn scoped_async_aborts_on_exit() {
        let updater = LiveUpdater::create(&live_flow(), LiveUpdateOptions::default())
            .await
            .unwrap();
        let handle = updater.clone();
        let seen = updater
            .scoped_async(|u| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                u.status()
            })
            .await
            .unwrap();
        assert_eq!(seen, UpdateStatus::Running);
        assert_eq!(handle.status(), UpdateStatus::Aborted);
    }

    #[tokio::test]
    async fn cancelled_scope_aborts_with_other_handles_alive() {
        let updater = LiveUpdater::create(&live_flow(), LiveUpdateOptions::default())
            .await
            .unwrap();
        let handle = updater.clone();
        let scope = updater.scoped_async(|_| std::future::pending::<()>());
        let timed_out = tokio::time::timeout(Duration::from_millis(20), scope).await;
        assert!(timed_out.is_err());

        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("wait should not hang")
            .unwrap();
        assert_eq!(handle.status(), UpdateStatus::Aborted);
    }

    #[test]
    fn blocking_start_and_scoped() {
        let flow = live_flow();
        let updater = LiveUpdater::start(&flow, LiveUpdateOptions::default()).unwrap();
        let handle = updater.clone();
        let name = updater.scoped(|u| u.flow_name().to_string()).unwrap();
        assert_eq!(name, "live");
        assert_eq!(handle.status(), UpdateStatus::Aborted);
    }

    #[test]
    fn scoped_aborts_when_block_panics() {
        let flow = live_flow();
        let updater = LiveUpdater::start(&flow, LiveUpdateOptions::default()).unwrap();
        let handle = updater.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            updater.scoped(|_| panic!("boom"))
        }));
        assert!(result.is_err());
        assert!(handle.status().is_terminal());
    }

    #[tokio::test]
    async fn dropping_last_handle_aborts() {
        let updater = LiveUpdater::create(&live_flow(), LiveUpdateOptions::default())
            .await
            .unwrap();
        let process = Arc::clone(&updater.inner.process);
        drop(updater);
        tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("wait should not hang")
            .unwrap();
        assert_eq!(process.status(), UpdateStatus::Aborted);
    }
}
