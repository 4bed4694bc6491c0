//! Graph recording for the in-memory engine.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::in_memory_engine::EngineConfig;
use super::in_memory_runtime::{InMemoryFlowRuntime, InMemoryTransientFlow};
use crate::errors::EngineError;
use crate::traits::{FlowRuntime, GraphBuilder, TransientFlowRuntime};
use crate::types::*;

const ROOT_SCOPE: ScopeRef = ScopeRef::new(0);

/// Records one flow's graph as a [`GraphDef`].
///
/// Nodes created without a target field are still bound in their natural
/// scope (the root for sources, the first argument's scope for transforms)
/// under the name the builder allocated.
///
/// Row scopes of collections whose row schema is unknown accept any field;
/// projections out of untyped values are likewise permissive.
pub struct InMemoryGraphBuilder {
    flow_name: String,
    config: Arc<EngineConfig>,
    state: Mutex<GraphState>,
}

struct GraphState {
    graph: GraphDef,
    released: HashSet<ScopeRef>,
    /// Live handles per row scope; a scope is released when its count drops
    /// to zero.
    open_handles: HashMap<ScopeRef, usize>,
    built: bool,
}

impl InMemoryGraphBuilder {
    pub(crate) fn new(flow_name: &str, config: Arc<EngineConfig>) -> Self {
        let mut graph = GraphDef::new(flow_name);
        graph.scopes.push(ScopeDef {
            id: ROOT_SCOPE,
            collection: None,
            fields: Vec::new(),
        });
        Self {
            flow_name: flow_name.to_string(),
            config,
            state: Mutex::new(GraphState {
                graph,
                released: HashSet::new(),
                open_handles: HashMap::new(),
                built: false,
            }),
        }
    }

    /// A copy of the graph recorded so far.
    pub fn snapshot(&self) -> GraphDef {
        self.state.lock().graph.clone()
    }

    pub fn is_released(&self, scope: ScopeRef) -> bool {
        self.state.lock().released.contains(&scope)
    }

    /// Row scopes that have not been released.
    pub fn open_row_scopes(&self) -> Vec<ScopeRef> {
        let state = self.state.lock();
        state
            .graph
            .scopes
            .iter()
            .filter(|s| s.collection.is_some() && !state.released.contains(&s.id))
            .map(|s| s.id)
            .collect()
    }

    pub fn is_built(&self) -> bool {
        self.state.lock().built
    }

    fn compile(&self, transient: bool) -> Result<GraphDef, EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        if transient {
            if state.graph.direct_output.is_none() {
                return Err(invalid("transient flow has no output"));
            }
            if !state.graph.exports.is_empty() {
                return Err(invalid("transient flows cannot export"));
            }
        } else {
            for export in &state.graph.exports {
                state.check_export(export)?;
            }
        }
        state.built = true;
        Ok(state.graph.clone())
    }
}

impl GraphState {
    fn check_mutable(&self) -> Result<(), EngineError> {
        if self.built {
            return Err(invalid(format!(
                "graph of flow `{}` is already built",
                self.graph.name
            )));
        }
        Ok(())
    }

    fn check_open(&self, scope: ScopeRef) -> Result<(), EngineError> {
        if self.graph.scope(scope).is_none() {
            return Err(EngineError::UnknownHandle {
                what: "scope",
                id: scope.raw(),
            });
        }
        if self.released.contains(&scope) {
            return Err(EngineError::ScopeReleased { id: scope.raw() });
        }
        Ok(())
    }

    fn check_bindable(&self, scope: ScopeRef, name: &str) -> Result<(), EngineError> {
        self.check_open(scope)?;
        if self
            .graph
            .scope(scope)
            .and_then(|s| s.field(name))
            .is_some()
        {
            return Err(EngineError::DuplicateField {
                scope: scope.raw(),
                field: name.to_string(),
            });
        }
        Ok(())
    }

    fn node(&self, node: NodeRef) -> Result<&NodeDef, EngineError> {
        self.graph.node(node).ok_or(EngineError::UnknownHandle {
            what: "node",
            id: node.raw(),
        })
    }

    fn collector(&self, collector: CollectorRef) -> Result<&CollectorDef, EngineError> {
        self.graph
            .collectors
            .iter()
            .find(|c| c.id == collector)
            .ok_or(EngineError::UnknownHandle {
                what: "collector",
                id: collector.raw(),
            })
    }

    fn push_node(
        &mut self,
        scope: ScopeRef,
        value_type: Option<EnrichedValueType>,
        op: NodeOp,
    ) -> NodeRef {
        let id = NodeRef::new(self.graph.nodes.len() as u64);
        self.graph.nodes.push(NodeDef {
            id,
            scope,
            value_type,
            op,
        });
        id
    }

    /// Bind `node` as field `name` of `scope`. Callers check
    /// [`check_bindable`](Self::check_bindable) first.
    fn bind(&mut self, scope: ScopeRef, name: &str, node: NodeRef) {
        if let Some(scope) = self.graph.scopes.iter_mut().find(|s| s.id == scope) {
            scope.fields.push(FieldDef {
                name: name.to_string(),
                node,
            });
        }
    }

    fn collected_fields(&self, collector: CollectorRef) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for node in &self.graph.nodes {
            if let NodeOp::Collect {
                collector: c,
                fields,
                auto_uuid_field,
            } = &node.op
            {
                if *c != collector {
                    continue;
                }
                names.extend(fields.iter().map(|f| f.name.as_str()));
                names.extend(auto_uuid_field.as_deref());
            }
        }
        names
    }

    fn check_export(&self, export: &ExportDef) -> Result<(), EngineError> {
        let index: IndexOptions = serde_json::from_value(export.index_options.clone())
            .map_err(|e| invalid(format!("export `{}` has malformed index options: {e}", export.name)))?;
        let collected = self.collected_fields(export.collector);
        if collected.is_empty() {
            return Err(invalid(format!(
                "collector of export `{}` never collects a row",
                export.name
            )));
        }
        for key in &index.primary_key_fields {
            if !collected.contains(key.as_str()) {
                return Err(invalid(format!(
                    "primary key field `{key}` of export `{}` is not collected",
                    export.name
                )));
            }
        }
        for vector in &index.vector_indexes {
            if !collected.contains(vector.field_name.as_str()) {
                return Err(invalid(format!(
                    "vector index field `{}` of export `{}` is not collected",
                    vector.field_name, export.name
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidGraph {
        message: message.into(),
    }
}

#[async_trait]
impl GraphBuilder for InMemoryGraphBuilder {
    fn flow_name(&self) -> &str {
        &self.flow_name
    }

    fn root_scope(&self) -> ScopeRef {
        ROOT_SCOPE
    }

    fn add_source(
        &self,
        kind: &str,
        spec: Value,
        target: Option<ScopeRef>,
        name: &str,
        refresh_options: Value,
    ) -> Result<NodeRef, EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        let scope = target.unwrap_or(ROOT_SCOPE);
        state.check_bindable(scope, name)?;
        let node = state.push_node(
            scope,
            self.config.source_type(kind),
            NodeOp::Source {
                kind: kind.to_string(),
                spec,
                refresh_options,
            },
        );
        state.bind(scope, name, node);
        Ok(node)
    }

    fn transform(
        &self,
        kind: &str,
        spec: Value,
        args: Vec<NodeArg>,
        target: Option<ScopeRef>,
        name: &str,
    ) -> Result<NodeRef, EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in &args {
            arg_types.push(state.node(arg.node)?.value_type.clone());
        }
        let natural = match args.first() {
            Some(arg) => state.node(arg.node)?.scope,
            None => ROOT_SCOPE,
        };
        let scope = target.unwrap_or(natural);
        state.check_bindable(scope, name)?;
        let value_type = self
            .config
            .functions
            .get(kind)
            .and_then(|handler| handler.output_type(&arg_types));
        let node = state.push_node(
            scope,
            value_type,
            NodeOp::Transform {
                kind: kind.to_string(),
                spec,
                args,
            },
        );
        state.bind(scope, name, node);
        Ok(node)
    }

    fn scope_field(&self, scope: ScopeRef, field_name: &str) -> Result<Option<NodeRef>, EngineError> {
        let mut state = self.state.lock();
        state.check_open(scope)?;
        let Some(def) = state.graph.scope(scope) else {
            return Ok(None);
        };
        if let Some(node) = def.field(field_name) {
            return Ok(Some(node));
        }
        let Some(collection) = def.collection else {
            return Ok(None);
        };
        state.check_mutable()?;

        let collection_type = state.node(collection)?.value_type.clone();
        let field_type = match collection_type.as_ref().and_then(|t| t.row()) {
            Some(row) => match row.iter().find(|f| f.name == field_name) {
                Some(field) => Some(field.value_type.clone()),
                None => return Ok(None),
            },
            None => None,
        };
        let node = state.push_node(
            scope,
            field_type,
            NodeOp::Field {
                parent: None,
                field: field_name.to_string(),
            },
        );
        state.bind(scope, field_name, node);
        Ok(Some(node))
    }

    fn field(&self, node: NodeRef, field_name: &str) -> Result<Option<NodeRef>, EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        let parent = state.node(node)?;
        let scope = parent.scope;
        let field_type = match &parent.value_type {
            Some(typ) => match (typ.field(field_name), &typ.typ) {
                (Some(field), _) => Some(field.clone()),
                (None, ValueType::Json) => None,
                (None, _) => return Ok(None),
            },
            None => None,
        };
        state.check_open(scope)?;
        Ok(Some(state.push_node(
            scope,
            field_type,
            NodeOp::Field {
                parent: Some(node),
                field: field_name.to_string(),
            },
        )))
    }

    fn collection_entry_scope(&self, node: NodeRef) -> Result<ScopeRef, EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        let def = state.node(node)?;
        if let Some(typ) = &def.value_type {
            if typ.row().is_none() && typ.typ != ValueType::Json {
                return Err(invalid(format!("{node} is not a collection")));
            }
        }
        let parent_scope = def.scope;
        state.check_open(parent_scope)?;

        if let Some(existing) = state
            .graph
            .scopes
            .iter()
            .find(|s| s.collection == Some(node))
            .map(|s| s.id)
        {
            state.released.remove(&existing);
            *state.open_handles.entry(existing).or_insert(0) += 1;
            return Ok(existing);
        }
        let id = ScopeRef::new(state.graph.scopes.len() as u64);
        state.graph.scopes.push(ScopeDef {
            id,
            collection: Some(node),
            fields: Vec::new(),
        });
        state.open_handles.insert(id, 1);
        tracing::debug!(flow = %self.flow_name, %node, scope = %id, "opened row scope");
        Ok(id)
    }

    fn release_scope(&self, scope: ScopeRef) {
        if scope == ROOT_SCOPE {
            return;
        }
        let mut state = self.state.lock();
        let remaining = match state.open_handles.get_mut(&scope) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            _ => 0,
        };
        if remaining == 0 {
            state.open_handles.remove(&scope);
            state.released.insert(scope);
            tracing::debug!(flow = %self.flow_name, %scope, "released row scope");
        }
    }

    fn constant(&self, value_type: EnrichedValueType, value: Value) -> Result<NodeRef, EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        Ok(state.push_node(ROOT_SCOPE, Some(value_type), NodeOp::Constant { value }))
    }

    fn add_collector(&self, scope: ScopeRef, name: &str) -> Result<CollectorRef, EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        state.check_open(scope)?;
        if state.graph.collectors.iter().any(|c| c.name == name) {
            return Err(invalid(format!("collector `{name}` already exists")));
        }
        let id = CollectorRef::new(state.graph.collectors.len() as u64);
        state.graph.collectors.push(CollectorDef {
            id,
            scope,
            name: name.to_string(),
        });
        Ok(id)
    }

    fn collect(
        &self,
        collector: CollectorRef,
        fields: Vec<(String, NodeRef)>,
        auto_uuid_field: Option<String>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        let scope = state.collector(collector)?.scope;
        let mut seen = HashSet::new();
        for (name, node) in &fields {
            state.node(*node)?;
            if !seen.insert(name.as_str()) {
                return Err(invalid(format!("field `{name}` collected twice")));
            }
        }
        if let Some(name) = &auto_uuid_field {
            if seen.contains(name.as_str()) {
                return Err(invalid(format!("field `{name}` collected twice")));
            }
        }
        state.push_node(
            scope,
            None,
            NodeOp::Collect {
                collector,
                fields: fields
                    .into_iter()
                    .map(|(name, node)| FieldDef { name, node })
                    .collect(),
                auto_uuid_field,
            },
        );
        Ok(())
    }

    fn export(
        &self,
        name: &str,
        kind: &str,
        spec: Value,
        index_options: Value,
        collector: CollectorRef,
        setup_by_user: bool,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        state.collector(collector)?;
        if state.graph.exports.iter().any(|e| e.name == name) {
            return Err(invalid(format!("export `{name}` already exists")));
        }
        state.graph.exports.push(ExportDef {
            name: name.to_string(),
            kind: kind.to_string(),
            spec,
            index_options,
            collector,
            setup_by_user,
        });
        Ok(())
    }

    fn declare(&self, kind: &str, spec: Value) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        state.graph.declarations.push(DeclarationDef {
            kind: kind.to_string(),
            spec,
        });
        Ok(())
    }

    fn add_direct_input(&self, name: &str, value_type: EnrichedValueType) -> Result<NodeRef, EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        state.check_bindable(ROOT_SCOPE, name)?;
        let node = state.push_node(
            ROOT_SCOPE,
            Some(value_type),
            NodeOp::DirectInput {
                name: name.to_string(),
            },
        );
        state.bind(ROOT_SCOPE, name, node);
        Ok(node)
    }

    fn set_direct_output(&self, node: NodeRef) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.check_mutable()?;
        state.node(node)?;
        state.graph.direct_output = Some(node);
        Ok(())
    }

    async fn build_flow(&self) -> Result<Arc<dyn FlowRuntime>, EngineError> {
        let graph = self.compile(false)?;
        tracing::info!(
            flow = %self.flow_name,
            nodes = graph.nodes.len(),
            exports = graph.exports.len(),
            "flow graph built"
        );
        Ok(Arc::new(InMemoryFlowRuntime::new(graph, Arc::clone(&self.config))))
    }

    async fn build_transient_flow(&self) -> Result<Arc<dyn TransientFlowRuntime>, EngineError> {
        let graph = self.compile(true)?;
        tracing::info!(
            flow = %self.flow_name,
            nodes = graph.nodes.len(),
            "transient flow graph built"
        );
        Ok(Arc::new(InMemoryTransientFlow::new(graph, Arc::clone(&self.config))?))
    }
}
