//! Per-flow builder state and the user-facing [`FlowBuilder`].

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::scope::DataScope;
use super::slice::{DataSlice, DeferredSlice, Operand};
use crate::errors::FlowError;
use crate::naming::{op_prefix, NameRegistry};
use crate::traits::GraphBuilder;
use crate::types::{
    DeclarationSpec, EnrichedValueType, NodeRef, OpSpec, ScopeRef, SourceOptions,
    SourceRefreshOptions, SourceSpec,
};

/// The mutable context threaded through the construction of one flow: the
/// engine's graph builder plus the flow's field-name registry.
///
/// Construction is single-owner by convention, but deferred slices keep an
/// `Arc` to this state and may be realized later from any thread.
pub struct FlowBuilderState {
    graph: Arc<dyn GraphBuilder>,
    field_names: Mutex<NameRegistry>,
}

impl FlowBuilderState {
    pub(crate) fn new(graph: Arc<dyn GraphBuilder>) -> Arc<Self> {
        Arc::new(Self {
            graph,
            field_names: Mutex::new(NameRegistry::new()),
        })
    }

    pub(crate) fn graph(&self) -> &dyn GraphBuilder {
        self.graph.as_ref()
    }

    pub fn flow_name(&self) -> &str {
        self.graph.flow_name()
    }

    pub(crate) fn build_name(&self, explicit: Option<&str>, prefix: &str) -> String {
        self.field_names.lock().build_name(explicit, prefix)
    }

    /// The root scope of this flow. The root is never released.
    pub(crate) fn root_scope(self: &Arc<Self>) -> DataScope {
        DataScope::root(Arc::clone(self), self.graph.root_scope())
    }

    /// Resolve an operand to a node, lifting literals into constants.
    pub(crate) fn operand_node(&self, operand: &Operand) -> Result<NodeRef, FlowError> {
        match operand {
            Operand::Slice(slice) => slice.node(),
            Operand::Literal(value) => {
                let node = self
                    .graph
                    .constant(EnrichedValueType::of_literal(value), value.clone())?;
                Ok(node)
            }
        }
    }

    /// Wrap a node creator in a slice.
    ///
    /// With an explicit `name` the node is created right away as a
    /// standalone named value. Otherwise creation is deferred: attaching the
    /// slice to a scope field passes that target through; realizing it
    /// standalone passes `(None, None)`.
    pub(crate) fn create_slice<F>(
        self: &Arc<Self>,
        name: Option<&str>,
        creator: F,
    ) -> Result<DataSlice, FlowError>
    where
        F: FnOnce(Option<ScopeRef>, Option<&str>) -> Result<NodeRef, FlowError> + Send + 'static,
    {
        let cell = match name {
            Some(name) => DeferredSlice::ready(creator(None, Some(name))?),
            None => DeferredSlice::deferred(move |target| match target {
                Some((scope, field_name)) => creator(Some(scope), Some(field_name)),
                None => creator(None, None),
            }),
        };
        Ok(DataSlice::new(Arc::clone(self), cell))
    }
}

impl std::fmt::Debug for FlowBuilderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowBuilderState")
            .field("flow_name", &self.flow_name())
            .field("field_names", &self.field_names.lock().len())
            .finish()
    }
}

/// Registers flow-level nodes: sources, constants and declarations.
#[derive(Debug, Clone)]
pub struct FlowBuilder {
    state: Arc<FlowBuilderState>,
}

impl FlowBuilder {
    pub(crate) fn new(state: Arc<FlowBuilderState>) -> Self {
        Self { state }
    }

    pub fn flow_name(&self) -> &str {
        self.state.flow_name()
    }

    /// Add a source. Unnamed sources are deferred until attached to a field
    /// (or demanded standalone), and then named `<snake_kind>_N`.
    pub fn add_source(
        &self,
        spec: impl Into<SourceSpec>,
        options: SourceOptions,
    ) -> Result<DataSlice, FlowError> {
        let spec = spec.into();
        let kind = spec.kind().to_string();
        let payload = spec.payload()?;
        let refresh_options = serde_json::to_value(SourceRefreshOptions {
            refresh_interval: options.refresh_interval,
        })?;

        let state = Arc::clone(&self.state);
        self.state
            .create_slice(options.name.as_deref(), move |target, name| {
                let field_name = state.build_name(name, &op_prefix(&kind));
                tracing::debug!(kind = %kind, field = %field_name, "adding source");
                let node =
                    state
                        .graph()
                        .add_source(&kind, payload, target, &field_name, refresh_options)?;
                Ok(node)
            })
    }

    /// Lift a literal into the graph as a constant node.
    pub fn constant(&self, value: impl Into<Value>) -> Result<DataSlice, FlowError> {
        let node = self.state.operand_node(&Operand::Literal(value.into()))?;
        Ok(DataSlice::new(
            Arc::clone(&self.state),
            DeferredSlice::ready(node),
        ))
    }

    /// Register a free-standing declaration.
    pub fn declare(&self, spec: impl Into<DeclarationSpec>) -> Result<(), FlowError> {
        declare(&self.state, spec.into())
    }
}

pub(crate) fn declare(state: &FlowBuilderState, spec: DeclarationSpec) -> Result<(), FlowError> {
    state.graph().declare(spec.kind(), spec.payload()?)?;
    Ok(())
}
