//! Transient flows: direct inputs, one output, no storage.

use std::sync::Arc;

use serde_json::Value;

use crate::builder::{DataSlice, DeferredSlice, FlowBuilderState};
use crate::errors::FlowError;
use crate::registry::FlowRegistry;
use crate::runtime;
use crate::traits::TransientFlowRuntime;
use crate::types::{EnrichedValueType, GraphDef};

/// How a flow function parameter may be supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    PositionalOrKeyword,
    KeywordOnly,
    PositionalOnly,
    VarPositional,
    VarKeyword,
}

impl ParamKind {
    /// Whether a parameter of this kind can be bound by name.
    pub fn is_nameable(self) -> bool {
        matches!(self, ParamKind::PositionalOrKeyword | ParamKind::KeywordOnly)
    }
}

/// A declared parameter of a transient flow function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowParam {
    pub name: String,
    pub kind: ParamKind,
}

impl FlowParam {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// A regular named parameter.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::PositionalOrKeyword)
    }
}

/// The input slices handed to a transient flow function, in declaration
/// order.
#[derive(Debug)]
pub struct FlowArgs {
    args: Vec<(String, DataSlice)>,
}

impl FlowArgs {
    pub fn get(&self, name: &str) -> Result<&DataSlice, FlowError> {
        self.args
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, slice)| slice)
            .ok_or_else(|| FlowError::MissingField {
                field: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DataSlice)> {
        self.args.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// A compiled transient flow.
#[derive(Clone)]
pub struct TransientFlow {
    runtime: Arc<dyn TransientFlowRuntime>,
    input_names: Vec<String>,
}

impl TransientFlow {
    /// Build a transient flow from `flow_fn`, binding each of `params` to an
    /// input typed by the matching entry of `arg_types`.
    ///
    /// Parameter checks happen before any engine call: a count mismatch fails
    /// with [`FlowError::ArityMismatch`], a variadic or positional-only
    /// parameter with [`FlowError::NotNameable`].
    pub async fn build<F>(
        registry: &FlowRegistry,
        name: Option<&str>,
        params: Vec<FlowParam>,
        arg_types: Vec<EnrichedValueType>,
        flow_fn: F,
    ) -> Result<Self, FlowError>
    where
        F: FnOnce(&FlowArgs) -> Result<DataSlice, FlowError>,
    {
        if params.len() != arg_types.len() {
            return Err(FlowError::ArityMismatch {
                params: params.len(),
                types: arg_types.len(),
            });
        }
        if let Some(param) = params.iter().find(|p| !p.kind.is_nameable()) {
            return Err(FlowError::NotNameable {
                param: param.name.clone(),
            });
        }

        let flow_name = registry.transient_flow_name(name);
        let graph = registry.engine().new_graph_builder(&flow_name)?;
        {
            let state = FlowBuilderState::new(Arc::clone(&graph));
            let mut args = Vec::with_capacity(params.len());
            for (param, value_type) in params.iter().zip(arg_types) {
                let node = graph.add_direct_input(&param.name, value_type)?;
                args.push((
                    param.name.clone(),
                    DataSlice::new(Arc::clone(&state), DeferredSlice::ready(node)),
                ));
            }
            let output = flow_fn(&FlowArgs { args })?;
            graph.set_direct_output(output.node()?)?;
        }

        let runtime = graph.build_transient_flow().await?;
        tracing::info!(flow = %flow_name, inputs = params.len(), "transient flow built");
        Ok(Self {
            runtime,
            input_names: params.into_iter().map(|p| p.name).collect(),
        })
    }

    /// Blocking form of [`build`](Self::build).
    pub fn new<F>(
        registry: &FlowRegistry,
        name: Option<&str>,
        params: Vec<FlowParam>,
        arg_types: Vec<EnrichedValueType>,
        flow_fn: F,
    ) -> Result<Self, FlowError>
    where
        F: FnOnce(&FlowArgs) -> Result<DataSlice, FlowError>,
    {
        runtime::block_on(Self::build(registry, name, params, arg_types, flow_fn))
    }

    pub fn name(&self) -> &str {
        self.runtime.name()
    }

    pub fn graph(&self) -> &GraphDef {
        self.runtime.graph()
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Evaluate the output for `inputs`, given in parameter order.
    pub async fn evaluate(&self, inputs: Vec<Value>) -> Result<Value, FlowError> {
        Ok(self.runtime.evaluate(inputs).await?)
    }

    pub fn blocking_evaluate(&self, inputs: Vec<Value>) -> Result<Value, FlowError> {
        runtime::block_on(self.evaluate(inputs))
    }
}

impl std::fmt::Debug for TransientFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientFlow")
            .field("name", &self.name())
            .field("inputs", &self.input_names)
            .finish()
    }
}
