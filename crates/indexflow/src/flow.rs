//! Lazily compiled flows.
//!
//! A [`Flow`] holds the user's defining closure until something needs the
//! compiled graph. The closure then runs exactly once; its outcome, success
//! or failure, is final.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::builder::{DataScope, FlowBuilder, FlowBuilderState};
use crate::errors::FlowError;
use crate::naming::NameRegistry;
use crate::runtime;
use crate::traits::{FlowEngine, FlowRuntime};
use crate::types::{EvaluateAndDumpOptions, IndexUpdateInfo, LiveUpdateOptions};
use crate::updater::LiveUpdater;

/// Prefix of auto-generated flow names.
pub const FLOW_NAME_PREFIX: &str = "_flow_";

/// The closure that describes a flow's graph.
pub type FlowDefiner = Box<dyn FnOnce(&FlowBuilder, &DataScope) -> Result<(), FlowError> + Send>;

/// What a flow needs from its registry to build itself.
#[derive(Clone)]
pub(crate) struct FlowContext {
    pub(crate) engine: Arc<dyn FlowEngine>,
    pub(crate) flow_names: Arc<Mutex<NameRegistry>>,
}

enum BuildState {
    Unbuilt(FlowDefiner),
    /// A build is in progress under the lock. Observing this state after
    /// acquiring the lock means the building caller was cancelled.
    Building,
    Built,
    Failed(String),
}

struct FlowInner {
    declared_name: Option<String>,
    context: FlowContext,
    name: OnceLock<String>,
    compiled: OnceLock<Arc<dyn FlowRuntime>>,
    state: AsyncMutex<BuildState>,
}

/// A flow definition that compiles on first use.
///
/// Cloning is cheap; clones share the same compiled graph.
#[derive(Clone)]
pub struct Flow {
    inner: Arc<FlowInner>,
}

impl Flow {
    pub(crate) fn new(context: FlowContext, declared_name: Option<String>, definer: FlowDefiner) -> Self {
        Self {
            inner: Arc::new(FlowInner {
                declared_name,
                context,
                name: OnceLock::new(),
                compiled: OnceLock::new(),
                state: AsyncMutex::new(BuildState::Unbuilt(definer)),
            }),
        }
    }

    /// The name given at definition time, if any.
    pub fn declared_name(&self) -> Option<&str> {
        self.inner.declared_name.as_deref()
    }

    pub fn is_built(&self) -> bool {
        self.inner.compiled.get().is_some()
    }

    /// Whether both handles refer to the same flow definition.
    pub fn ptr_eq(this: &Flow, other: &Flow) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// The compiled flow, building it on first call.
    ///
    /// Concurrent first callers wait for a single build. If the build fails
    /// the first caller gets the error and every later caller gets
    /// [`FlowError::BuildFailed`].
    pub async fn compiled(&self) -> Result<Arc<dyn FlowRuntime>, FlowError> {
        if let Some(compiled) = self.inner.compiled.get() {
            return Ok(Arc::clone(compiled));
        }
        let mut state = self.inner.state.lock().await;
        if let Some(compiled) = self.inner.compiled.get() {
            return Ok(Arc::clone(compiled));
        }

        match std::mem::replace(&mut *state, BuildState::Building) {
            BuildState::Unbuilt(definer) => match self.build(definer).await {
                Ok(compiled) => {
                    let _ = self.inner.compiled.set(Arc::clone(&compiled));
                    *state = BuildState::Built;
                    Ok(compiled)
                }
                Err(e) => {
                    tracing::warn!(flow = %self.display_name(), error = %e, "flow build failed");
                    *state = BuildState::Failed(e.to_string());
                    Err(e)
                }
            },
            BuildState::Building => {
                let message = "an earlier build was interrupted".to_string();
                *state = BuildState::Failed(message.clone());
                Err(self.build_failed(message))
            }
            BuildState::Failed(message) => {
                *state = BuildState::Failed(message.clone());
                Err(self.build_failed(message))
            }
            BuildState::Built => {
                *state = BuildState::Built;
                self.inner
                    .compiled
                    .get()
                    .cloned()
                    .ok_or(FlowError::Uninitialized { what: "compiled flow" })
            }
        }
    }

    /// Blocking form of [`compiled`](Self::compiled).
    pub fn blocking_compiled(&self) -> Result<Arc<dyn FlowRuntime>, FlowError> {
        runtime::block_on(self.compiled())
    }

    /// The flow's engine-side name. Builds the flow if needed.
    pub async fn name(&self) -> Result<String, FlowError> {
        Ok(self.compiled().await?.name().to_string())
    }

    pub fn blocking_name(&self) -> Result<String, FlowError> {
        runtime::block_on(self.name())
    }

    /// Evaluate the flow and dump its outputs under `options.output_dir`.
    pub async fn evaluate_and_dump(&self, options: &EvaluateAndDumpOptions) -> Result<(), FlowError> {
        self.compiled().await?.evaluate_and_dump(options).await?;
        Ok(())
    }

    pub fn blocking_evaluate_and_dump(&self, options: &EvaluateAndDumpOptions) -> Result<(), FlowError> {
        runtime::block_on(self.evaluate_and_dump(options))
    }

    /// Run a single catch-up update and return its statistics.
    pub async fn update(&self) -> Result<IndexUpdateInfo, FlowError> {
        let updater = LiveUpdater::create(self, LiveUpdateOptions::one_shot()).await?;
        updater.wait().await?;
        Ok(updater.update_stats())
    }

    pub fn blocking_update(&self) -> Result<IndexUpdateInfo, FlowError> {
        runtime::block_on(self.update())
    }

    async fn build(&self, definer: FlowDefiner) -> Result<Arc<dyn FlowRuntime>, FlowError> {
        let flow_name = self
            .inner
            .context
            .flow_names
            .lock()
            .build_name(self.inner.declared_name.as_deref(), FLOW_NAME_PREFIX);
        let _ = self.inner.name.set(flow_name.clone());

        let graph = self.inner.context.engine.new_graph_builder(&flow_name)?;
        {
            let state = FlowBuilderState::new(Arc::clone(&graph));
            let builder = FlowBuilder::new(Arc::clone(&state));
            let root = state.root_scope();
            definer(&builder, &root)?;
        }
        let compiled = graph.build_flow().await?;
        tracing::info!(
            flow = %flow_name,
            nodes = compiled.graph().nodes.len(),
            "flow compiled"
        );
        Ok(compiled)
    }

    fn display_name(&self) -> &str {
        self.inner
            .name
            .get()
            .map(String::as_str)
            .or(self.inner.declared_name.as_deref())
            .unwrap_or("<unnamed>")
    }

    fn build_failed(&self, message: String) -> FlowError {
        FlowError::BuildFailed {
            flow: self.display_name().to_string(),
            message,
        }
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.display_name())
            .field("built", &self.is_built())
            .finish()
    }
}
