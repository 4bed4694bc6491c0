//! In-memory flow engine.
//!
//! Records the graph each flow builds, evaluates transient flows with
//! registered function handlers, and simulates index updates over
//! configured source rows. It performs no real I/O besides
//! `evaluate_and_dump`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use super::in_memory_graph::InMemoryGraphBuilder;
use crate::errors::EngineError;
use crate::traits::{FlowEngine, GraphBuilder};
use crate::types::{EnrichedValueType, LiveUpdateOptions, ValueType};

/// Evaluates one function kind for the in-memory engine.
pub trait FunctionHandler: Send + Sync {
    /// Output type given the argument types, when known.
    fn output_type(&self, _arg_types: &[Option<EnrichedValueType>]) -> Option<EnrichedValueType> {
        None
    }

    /// Evaluate on positional argument values, in declaration order.
    fn evaluate(&self, args: &[Value]) -> Result<Value, EngineError>;
}

impl<F> FunctionHandler for F
where
    F: Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync,
{
    fn evaluate(&self, args: &[Value]) -> Result<Value, EngineError> {
        self(args)
    }
}

/// A function handler with a fixed output type.
pub struct TypedFunction<F> {
    output_type: EnrichedValueType,
    f: F,
}

impl<F> TypedFunction<F>
where
    F: Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync,
{
    pub fn new(output_type: EnrichedValueType, f: F) -> Self {
        Self { output_type, f }
    }
}

impl<F> FunctionHandler for TypedFunction<F>
where
    F: Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync,
{
    fn output_type(&self, _arg_types: &[Option<EnrichedValueType>]) -> Option<EnrichedValueType> {
        Some(self.output_type.clone())
    }

    fn evaluate(&self, args: &[Value]) -> Result<Value, EngineError> {
        (self.f)(args)
    }
}

/// Shared engine configuration, fixed at build time, plus the log of
/// started updates.
pub(crate) struct EngineConfig {
    pub(crate) poll_interval: Duration,
    pub(crate) source_rows: BTreeMap<String, Vec<Value>>,
    pub(crate) failing_sources: BTreeMap<String, String>,
    pub(crate) functions: BTreeMap<String, Arc<dyn FunctionHandler>>,
    pub(crate) started_updates: Mutex<Vec<(String, LiveUpdateOptions)>>,
}

impl EngineConfig {
    /// Declared type of sources of `kind`: a table typed by the first
    /// configured row, or unknown when no object rows are configured.
    pub(crate) fn source_type(&self, kind: &str) -> Option<EnrichedValueType> {
        let rows = self.source_rows.get(kind)?;
        if rows.is_empty() || !rows.iter().all(Value::is_object) {
            return None;
        }
        let typ = EnrichedValueType::of_literal(&Value::Array(rows.clone()));
        matches!(typ.typ, ValueType::Table { .. }).then_some(typ)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            source_rows: BTreeMap::new(),
            failing_sources: BTreeMap::new(),
            functions: BTreeMap::new(),
            started_updates: Mutex::new(Vec::new()),
        }
    }
}

/// Builder for [`InMemoryEngine`].
///
/// ```ignore
/// let engine = InMemoryEngine::builder()
///     .source_rows("LocalFile", vec![json!({"filename": "a.md", "content": "..."})])
///     .function("SplitRecursively", |args: &[Value]| Ok(args[0].clone()))
///     .poll_interval(Duration::from_millis(50))
///     .build();
/// ```
#[derive(Default)]
pub struct InMemoryEngineBuilder {
    config: EngineConfig,
}

impl InMemoryEngineBuilder {
    /// Interval between live-mode update cycles for sources with no
    /// refresh interval of their own.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Rows produced by every source of `kind`.
    pub fn source_rows(mut self, kind: impl Into<String>, rows: Vec<Value>) -> Self {
        self.config.source_rows.insert(kind.into(), rows);
        self
    }

    /// Make every update of a source of `kind` fail with `message`.
    pub fn failing_source(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.config
            .failing_sources
            .insert(kind.into(), message.into());
        self
    }

    /// Register a closure evaluating function `kind`. Its output type is
    /// unknown to the graph.
    pub fn function<F>(self, kind: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, EngineError> + Send + Sync + 'static,
    {
        self.handler(kind, f)
    }

    /// Register the handler for function `kind`.
    pub fn handler(mut self, kind: impl Into<String>, handler: impl FunctionHandler + 'static) -> Self {
        self.config.functions.insert(kind.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> InMemoryEngine {
        InMemoryEngine {
            config: Arc::new(self.config),
            builders: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// The default in-process [`FlowEngine`].
///
/// Cloning shares the configuration and the record of graph builders.
#[derive(Clone)]
pub struct InMemoryEngine {
    config: Arc<EngineConfig>,
    builders: Arc<Mutex<Vec<Arc<InMemoryGraphBuilder>>>>,
}

impl InMemoryEngine {
    /// An engine with nothing configured.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> InMemoryEngineBuilder {
        InMemoryEngineBuilder::default()
    }

    /// Every graph builder handed out so far, in creation order.
    pub fn graph_builders(&self) -> Vec<Arc<InMemoryGraphBuilder>> {
        self.builders.lock().clone()
    }

    /// The graph builder most recently handed out for `flow_name`.
    pub fn graph_builder(&self, flow_name: &str) -> Option<Arc<InMemoryGraphBuilder>> {
        self.builders
            .lock()
            .iter()
            .rev()
            .find(|b| b.flow_name() == flow_name)
            .cloned()
    }
}

impl InMemoryEngine {
    /// Flow name and options of every update started so far, in order.
    pub fn started_updates(&self) -> Vec<(String, LiveUpdateOptions)> {
        self.config.started_updates.lock().clone()
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowEngine for InMemoryEngine {
    fn new_graph_builder(&self, flow_name: &str) -> Result<Arc<dyn GraphBuilder>, EngineError> {
        let builder = Arc::new(InMemoryGraphBuilder::new(flow_name, Arc::clone(&self.config)));
        self.builders.lock().push(Arc::clone(&builder));
        tracing::debug!(flow = flow_name, "new graph builder");
        Ok(builder)
    }
}
