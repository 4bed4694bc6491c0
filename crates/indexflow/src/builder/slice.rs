//! Deferred data slices.
//!
//! A [`DeferredSlice`] holds either a realized node or a one-shot
//! constructor. The constructor runs at most once: either standalone via
//! [`DeferredSlice::realize`], or bound to a scope field via
//! [`DeferredSlice::attach_to_scope`].

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::Value;

use super::scope::DataScope;
use super::state::FlowBuilderState;
use crate::errors::FlowError;
use crate::naming::op_prefix;
use crate::types::{FunctionSpec, NodeArg, NodeRef, OpSpec, ScopeRef};

type SliceConstructor =
    Box<dyn FnOnce(Option<(ScopeRef, &str)>) -> Result<NodeRef, FlowError> + Send>;

/// A lazily materialized graph node.
pub struct DeferredSlice {
    node: OnceLock<NodeRef>,
    constructor: Mutex<Option<SliceConstructor>>,
}

impl DeferredSlice {
    /// A slice whose node already exists.
    pub fn ready(node: NodeRef) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(node);
        Self {
            node: cell,
            constructor: Mutex::new(None),
        }
    }

    /// A slice created on first demand by `constructor`, which receives the
    /// target scope and field name when attached, `None` when realized
    /// standalone.
    pub fn deferred<F>(constructor: F) -> Self
    where
        F: FnOnce(Option<(ScopeRef, &str)>) -> Result<NodeRef, FlowError> + Send + 'static,
    {
        Self {
            node: OnceLock::new(),
            constructor: Mutex::new(Some(Box::new(constructor))),
        }
    }

    /// Whether the node has been created.
    pub fn is_realized(&self) -> bool {
        self.node.get().is_some()
    }

    /// Return the node, creating it standalone on first call.
    ///
    /// If the constructor fails the slice stays unrealized and later calls
    /// return [`FlowError::Uninitialized`].
    pub fn realize(&self) -> Result<NodeRef, FlowError> {
        if let Some(node) = self.node.get() {
            return Ok(*node);
        }
        let mut constructor = self.constructor.lock();
        if let Some(node) = self.node.get() {
            return Ok(*node);
        }
        let create = constructor.take().ok_or(FlowError::Uninitialized {
            what: "data slice constructor",
        })?;
        let node = create(None)?;
        let _ = self.node.set(node);
        Ok(node)
    }

    /// Create the node as field `field_name` of `scope`.
    ///
    /// Fails with [`FlowError::AlreadyAttached`] once the node exists,
    /// whether it was realized standalone or attached earlier.
    pub fn attach_to_scope(&self, scope: ScopeRef, field_name: &str) -> Result<(), FlowError> {
        if self.node.get().is_some() {
            return Err(FlowError::AlreadyAttached);
        }
        let mut constructor = self.constructor.lock();
        if self.node.get().is_some() {
            return Err(FlowError::AlreadyAttached);
        }
        let create = constructor.take().ok_or(FlowError::Uninitialized {
            what: "data slice constructor",
        })?;
        let node = create(Some((scope, field_name)))?;
        let _ = self.node.set(node);
        Ok(())
    }
}

impl std::fmt::Debug for DeferredSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredSlice")
            .field("node", &self.node.get())
            .finish_non_exhaustive()
    }
}

/// Something a transform or collector can consume: a slice, or a literal
/// that is lifted into a constant node on use.
#[derive(Debug, Clone)]
pub enum Operand {
    Slice(DataSlice),
    Literal(Value),
}

impl From<DataSlice> for Operand {
    fn from(slice: DataSlice) -> Self {
        Operand::Slice(slice)
    }
}

impl From<&DataSlice> for Operand {
    fn from(slice: &DataSlice) -> Self {
        Operand::Slice(slice.clone())
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Literal(value)
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Operand::Literal(Value::from(value))
    }
}

/// An extra transform argument. Positional when `name` is `None`.
#[derive(Debug, Clone)]
pub struct TransformArg {
    pub name: Option<String>,
    pub value: Operand,
}

impl TransformArg {
    pub fn positional(value: impl Into<Operand>) -> Self {
        Self {
            name: None,
            value: value.into(),
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<Operand>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
        }
    }
}

/// A user-facing handle onto a value in the flow graph.
///
/// Cloning shares the underlying [`DeferredSlice`], so every clone observes
/// the same realization.
#[derive(Clone)]
pub struct DataSlice {
    state: Arc<FlowBuilderState>,
    cell: Arc<DeferredSlice>,
}

impl DataSlice {
    pub(crate) fn new(state: Arc<FlowBuilderState>, cell: DeferredSlice) -> Self {
        Self {
            state,
            cell: Arc::new(cell),
        }
    }

    /// The engine node, realizing it standalone if needed.
    pub fn node(&self) -> Result<NodeRef, FlowError> {
        self.cell.realize()
    }

    pub fn is_realized(&self) -> bool {
        self.cell.is_realized()
    }

    /// Project struct field `name`.
    pub fn field(&self, name: &str) -> Result<DataSlice, FlowError> {
        let node = self.node()?;
        let field = self
            .state
            .graph()
            .field(node, name)?
            .ok_or_else(|| FlowError::MissingField {
                field: name.to_string(),
            })?;
        Ok(DataSlice::new(
            Arc::clone(&self.state),
            DeferredSlice::ready(field),
        ))
    }

    /// The row scope of this collection-valued slice.
    ///
    /// The scope is released when the returned [`DataScope`] is dropped.
    pub fn row(&self) -> Result<DataScope, FlowError> {
        let node = self.node()?;
        let scope = self.state.graph().collection_entry_scope(node)?;
        Ok(DataScope::row(Arc::clone(&self.state), scope))
    }

    /// Run `f` inside this collection's row scope, releasing the scope on
    /// every exit path.
    pub fn for_each<F>(&self, f: F) -> Result<(), FlowError>
    where
        F: FnOnce(&DataScope) -> Result<(), FlowError>,
    {
        let scope = self.row()?;
        f(&scope)
    }

    /// Apply a function with this slice as the only argument.
    pub fn transform(&self, spec: impl Into<FunctionSpec>) -> Result<DataSlice, FlowError> {
        self.transform_with(spec, std::iter::empty())
    }

    /// Apply a function with this slice as the first argument followed by
    /// `args`. Arguments are resolved now; the transform node itself is
    /// deferred until attached or demanded.
    pub fn transform_with<I>(
        &self,
        spec: impl Into<FunctionSpec>,
        args: I,
    ) -> Result<DataSlice, FlowError>
    where
        I: IntoIterator<Item = TransformArg>,
    {
        let spec = spec.into();
        let kind = spec.kind().to_string();
        let payload = spec.payload()?;

        let mut node_args = vec![NodeArg {
            node: self.node()?,
            name: None,
        }];
        for arg in args {
            node_args.push(NodeArg {
                node: self.state.operand_node(&arg.value)?,
                name: arg.name,
            });
        }

        let state = Arc::clone(&self.state);
        self.state.create_slice(None, move |target, name| {
            let field_name = state.build_name(name, &op_prefix(&kind));
            tracing::debug!(kind = %kind, field = %field_name, "adding transform");
            let node = state
                .graph()
                .transform(&kind, payload, node_args, target, &field_name)?;
            Ok(node)
        })
    }

    /// Pass this slice through `f`, for chaining user-defined helpers.
    pub fn call<T>(&self, f: impl FnOnce(&DataSlice) -> T) -> T {
        f(self)
    }

    pub(crate) fn attach_to_scope(&self, scope: ScopeRef, field_name: &str) -> Result<(), FlowError> {
        self.cell.attach_to_scope(scope, field_name)
    }
}

impl std::fmt::Debug for DataSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSlice").field("cell", &self.cell).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn realize_runs_constructor_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slice = DeferredSlice::deferred(move |target| {
            assert!(target.is_none());
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(NodeRef::new(4))
        });

        assert!(!slice.is_realized());
        assert_eq!(slice.realize().unwrap(), NodeRef::new(4));
        assert_eq!(slice.realize().unwrap(), NodeRef::new(4));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn attach_passes_target_through() {
        let slice = DeferredSlice::deferred(|target| {
            let (scope, name) = target.expect("attached");
            assert_eq!(scope, ScopeRef::new(0));
            assert_eq!(name, "chunks");
            Ok(NodeRef::new(9))
        });
        slice.attach_to_scope(ScopeRef::new(0), "chunks").unwrap();
        assert_eq!(slice.realize().unwrap(), NodeRef::new(9));
    }

    #[test]
    fn attach_after_realize_fails() {
        let slice = DeferredSlice::deferred(|_| Ok(NodeRef::new(1)));
        slice.realize().unwrap();
        assert!(matches!(
            slice.attach_to_scope(ScopeRef::new(0), "x"),
            Err(FlowError::AlreadyAttached)
        ));

        let ready = DeferredSlice::ready(NodeRef::new(2));
        assert!(matches!(
            ready.attach_to_scope(ScopeRef::new(0), "x"),
            Err(FlowError::AlreadyAttached)
        ));
    }

    #[test]
    fn second_attach_fails() {
        let slice = DeferredSlice::deferred(|_| Ok(NodeRef::new(1)));
        slice.attach_to_scope(ScopeRef::new(0), "a").unwrap();
        assert!(matches!(
            slice.attach_to_scope(ScopeRef::new(0), "b"),
            Err(FlowError::AlreadyAttached)
        ));
    }

    #[test]
    fn failed_constructor_leaves_slice_uninitialized() {
        let slice = DeferredSlice::deferred(|_| {
            Err(FlowError::MissingField {
                field: "text".into(),
            })
        });
        assert!(matches!(slice.realize(), Err(FlowError::MissingField { .. })));
        assert!(matches!(
            slice.realize(),
            Err(FlowError::Uninitialized { .. })
        ));
        assert!(!slice.is_realized());
    }

    #[test]
    fn concurrent_realize_and_attach_create_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let slice = Arc::new(DeferredSlice::deferred(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(NodeRef::new(11))
        }));

        let attached = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for i in 0..8 {
                let slice = Arc::clone(&slice);
                let attached = &attached;
                s.spawn(move || {
                    if i % 2 == 0 {
                        assert_eq!(slice.realize().unwrap(), NodeRef::new(11));
                    } else if slice.attach_to_scope(ScopeRef::new(0), "f").is_ok() {
                        attached.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(attached.load(Ordering::SeqCst) <= 1);
        assert_eq!(slice.realize().unwrap(), NodeRef::new(11));
    }
}
