//! Registry of named flows.
//!
//! A [`FlowRegistry`] owns the engine handle, the flow map, and the name
//! registries for regular and transient flows. It is cheap to clone; all
//! clones share the same state. Nothing is global: create one per process,
//! or one per test.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;

use crate::builder::{DataScope, FlowBuilder};
use crate::errors::FlowError;
use crate::flow::{Flow, FlowContext};
use crate::naming::NameRegistry;
use crate::runtime;
use crate::traits::FlowEngine;
use crate::types::{IndexUpdateInfo, LiveUpdateOptions};
use crate::updater::LiveUpdater;

/// Prefix of auto-generated transient flow names.
pub const TRANSIENT_FLOW_NAME_PREFIX: &str = "_transient_flow_";

struct RegistryInner {
    context: FlowContext,
    transient_names: Mutex<NameRegistry>,
    flows: Mutex<BTreeMap<String, Flow>>,
}

/// Thread-safe registry of named flows.
#[derive(Clone)]
pub struct FlowRegistry {
    inner: Arc<RegistryInner>,
}

impl FlowRegistry {
    /// An empty registry backed by `engine`.
    pub fn new(engine: impl FlowEngine + 'static) -> Self {
        Self::with_engine(Arc::new(engine))
    }

    pub fn with_engine(engine: Arc<dyn FlowEngine>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                context: FlowContext {
                    engine,
                    flow_names: Arc::new(Mutex::new(NameRegistry::new())),
                },
                transient_names: Mutex::new(NameRegistry::new()),
                flows: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<dyn FlowEngine> {
        &self.inner.context.engine
    }

    /// Define a flow without registering it. Unnamed flows get
    /// `_flow_N` when built.
    pub fn define<F>(&self, name: Option<&str>, definer: F) -> Flow
    where
        F: FnOnce(&FlowBuilder, &DataScope) -> Result<(), FlowError> + Send + 'static,
    {
        Flow::new(
            self.inner.context.clone(),
            name.map(str::to_string),
            Box::new(definer),
        )
    }

    /// Define and register a flow under `name`.
    ///
    /// Fails with [`FlowError::DuplicateFlow`] if the name is taken; the
    /// existing flow is left untouched.
    pub fn register<F>(&self, name: &str, definer: F) -> Result<Flow, FlowError>
    where
        F: FnOnce(&FlowBuilder, &DataScope) -> Result<(), FlowError> + Send + 'static,
    {
        let mut flows = self.inner.flows.lock();
        if flows.contains_key(name) {
            return Err(FlowError::DuplicateFlow {
                name: name.to_string(),
            });
        }
        let flow = self.define(Some(name), definer);
        flows.insert(name.to_string(), flow.clone());
        tracing::debug!(flow = name, "registered flow");
        Ok(flow)
    }

    /// Look up a registered flow.
    pub fn get(&self, name: &str) -> Result<Flow, FlowError> {
        self.inner
            .flows
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::FlowNotFound {
                name: name.to_string(),
            })
    }

    /// Names of all registered flows, sorted.
    pub fn list_names(&self) -> Vec<String> {
        self.inner.flows.lock().keys().cloned().collect()
    }

    /// All registered flows, sorted by name.
    pub fn list_flows(&self) -> Vec<Flow> {
        self.inner.flows.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.flows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.flows.lock().is_empty()
    }

    /// Build every registered flow, stopping at the first failure.
    pub async fn ensure_all_built(&self) -> Result<(), FlowError> {
        for flow in self.list_flows() {
            flow.compiled().await?;
        }
        Ok(())
    }

    pub fn blocking_ensure_all_built(&self) -> Result<(), FlowError> {
        runtime::block_on(self.ensure_all_built())
    }

    /// Update every registered flow concurrently and collect each flow's
    /// statistics.
    ///
    /// All updates are awaited before any failure is returned; the first
    /// failure in name order wins.
    pub async fn update_all(
        &self,
        options: LiveUpdateOptions,
    ) -> Result<BTreeMap<String, IndexUpdateInfo>, FlowError> {
        self.ensure_all_built().await?;
        let flows = self.list_flows();
        let results = join_all(flows.iter().map(|flow| {
            let options = options.clone();
            async move {
                let name = flow.name().await?;
                let outcome = async {
                    let updater = LiveUpdater::create(flow, options).await?;
                    updater.wait().await?;
                    Ok::<_, FlowError>(updater.update_stats())
                }
                .await;
                Ok::<_, FlowError>((name, outcome))
            }
        }))
        .await;

        let mut stats = BTreeMap::new();
        let mut first_error = None;
        for result in results {
            match result {
                Ok((name, Ok(info))) => {
                    stats.insert(name, info);
                }
                Ok((name, Err(e))) => {
                    tracing::error!(flow = %name, error = %e, "flow update failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "flow update failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }

    pub fn blocking_update_all(
        &self,
        options: LiveUpdateOptions,
    ) -> Result<BTreeMap<String, IndexUpdateInfo>, FlowError> {
        runtime::block_on(self.update_all(options))
    }

    pub(crate) fn transient_flow_name(&self, explicit: Option<&str>) -> String {
        self.inner
            .transient_names
            .lock()
            .build_name(explicit, TRANSIENT_FLOW_NAME_PREFIX)
    }
}

impl std::fmt::Debug for FlowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRegistry")
            .field("flows", &self.list_names())
            .finish()
    }
}
