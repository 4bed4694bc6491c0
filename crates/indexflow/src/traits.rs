//! Engine collaborator interfaces.
//!
//! The builder and lifecycle layers never execute transforms or touch
//! storage themselves. Everything below is implemented by an execution
//! engine; [`InMemoryEngine`](crate::defaults::InMemoryEngine) is the
//! reference implementation. Adding a method to any trait requires a
//! default implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::EngineError;
use crate::types::*;

// ---------------------------------------------------------------------------
// FlowEngine
// ---------------------------------------------------------------------------

/// Entry point into an engine: hands out one graph builder per flow.
pub trait FlowEngine: Send + Sync {
    /// Start a new graph for the flow named `flow_name`.
    fn new_graph_builder(&self, flow_name: &str) -> Result<Arc<dyn GraphBuilder>, EngineError>;
}

// ---------------------------------------------------------------------------
// GraphBuilder
// ---------------------------------------------------------------------------

/// The engine-side handle that accumulates one flow's graph.
///
/// Every registration takes a kind tag plus a serialized payload. Methods
/// take `&self`: deferred slices may be realized from any thread, so
/// implementations keep their state behind a lock.
///
/// `target: None` asks the engine to materialize the node as a free-standing
/// value, not bound to any named field.
#[async_trait]
pub trait GraphBuilder: Send + Sync {
    fn flow_name(&self) -> &str;

    fn root_scope(&self) -> ScopeRef;

    fn add_source(
        &self,
        kind: &str,
        spec: Value,
        target: Option<ScopeRef>,
        name: &str,
        refresh_options: Value,
    ) -> Result<NodeRef, EngineError>;

    fn transform(
        &self,
        kind: &str,
        spec: Value,
        args: Vec<NodeArg>,
        target: Option<ScopeRef>,
        name: &str,
    ) -> Result<NodeRef, EngineError>;

    /// Look up a field of a scope. `None` if the scope has no such field.
    fn scope_field(&self, scope: ScopeRef, field_name: &str) -> Result<Option<NodeRef>, EngineError>;

    /// Project a struct field out of a node. `None` if there is no such field.
    fn field(&self, node: NodeRef, field_name: &str) -> Result<Option<NodeRef>, EngineError>;

    /// The row scope of a collection-valued node. Repeated calls for the
    /// same node return the same scope; each call opens one handle.
    fn collection_entry_scope(&self, node: NodeRef) -> Result<ScopeRef, EngineError>;

    /// Close one handle opened by
    /// [`collection_entry_scope`](Self::collection_entry_scope). The scope
    /// stays usable until its last handle is closed.
    fn release_scope(&self, _scope: ScopeRef) {}

    fn constant(&self, value_type: EnrichedValueType, value: Value) -> Result<NodeRef, EngineError>;

    fn add_collector(&self, scope: ScopeRef, name: &str) -> Result<CollectorRef, EngineError>;

    fn collect(
        &self,
        collector: CollectorRef,
        fields: Vec<(String, NodeRef)>,
        auto_uuid_field: Option<String>,
    ) -> Result<(), EngineError>;

    fn export(
        &self,
        name: &str,
        kind: &str,
        spec: Value,
        index_options: Value,
        collector: CollectorRef,
        setup_by_user: bool,
    ) -> Result<(), EngineError>;

    fn declare(&self, kind: &str, spec: Value) -> Result<(), EngineError>;

    fn add_direct_input(&self, name: &str, value_type: EnrichedValueType) -> Result<NodeRef, EngineError>;

    fn set_direct_output(&self, node: NodeRef) -> Result<(), EngineError>;

    /// Compile the accumulated graph into a runnable flow.
    async fn build_flow(&self) -> Result<Arc<dyn FlowRuntime>, EngineError>;

    /// Compile the accumulated graph into a storage-less transient flow.
    async fn build_transient_flow(&self) -> Result<Arc<dyn TransientFlowRuntime>, EngineError>;
}

// ---------------------------------------------------------------------------
// FlowRuntime
// ---------------------------------------------------------------------------

/// A compiled, immutable flow owned by the engine.
#[async_trait]
pub trait FlowRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Description of the compiled graph.
    fn graph(&self) -> &GraphDef;

    async fn evaluate_and_dump(&self, options: &EvaluateAndDumpOptions) -> Result<(), EngineError>;

    /// Start an update process. Returns once the process is running.
    async fn start_update(
        &self,
        options: &LiveUpdateOptions,
    ) -> Result<Arc<dyn UpdateProcess>, EngineError>;
}

/// Lifecycle state of an update process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Running,
    Aborted,
    Finished,
}

impl UpdateStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UpdateStatus::Running)
    }
}

/// A running update process. The engine owns its state.
#[async_trait]
pub trait UpdateProcess: Send + Sync {
    /// Request cooperative cancellation. Idempotent and non-blocking.
    fn abort(&self);

    /// Resolve once the process reaches a terminal state.
    async fn wait(&self) -> Result<(), EngineError>;

    fn status(&self) -> UpdateStatus;

    fn index_update_info(&self) -> IndexUpdateInfo;
}

// ---------------------------------------------------------------------------
// TransientFlowRuntime
// ---------------------------------------------------------------------------

/// A compiled flow with direct inputs and one output, no storage.
#[async_trait]
pub trait TransientFlowRuntime: Send + Sync {
    fn name(&self) -> &str;

    fn graph(&self) -> &GraphDef;

    /// Evaluate the output for `inputs`, given in input declaration order.
    async fn evaluate(&self, inputs: Vec<Value>) -> Result<Value, EngineError>;
}
