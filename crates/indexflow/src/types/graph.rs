//! Graph description types: the contract between the builder front end and
//! the execution engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::EnrichedValueType;
use super::GRAPH_SCHEMA_VERSION;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap an engine-issued identifier.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The engine-issued identifier.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

handle!(
    /// Opaque reference to a value-producing node in an engine graph.
    NodeRef,
    "node"
);
handle!(
    /// Opaque reference to a scope (root, or the row scope of a collection).
    ScopeRef,
    "scope"
);
handle!(
    /// Opaque reference to a collector registered in a scope.
    CollectorRef,
    "collector"
);

/// The complete description of a compiled flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GraphDef {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub name: String,
    pub scopes: Vec<ScopeDef>,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub collectors: Vec<CollectorDef>,
    #[serde(default)]
    pub exports: Vec<ExportDef>,
    #[serde(default)]
    pub declarations: Vec<DeclarationDef>,
    /// Set only for transient flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_output: Option<NodeRef>,
}

fn default_schema_version() -> u16 {
    GRAPH_SCHEMA_VERSION
}

impl GraphDef {
    /// An empty graph named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema_version: GRAPH_SCHEMA_VERSION,
            name: name.into(),
            scopes: Vec::new(),
            nodes: Vec::new(),
            collectors: Vec::new(),
            exports: Vec::new(),
            declarations: Vec::new(),
            direct_output: None,
        }
    }

    pub fn node(&self, id: NodeRef) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn scope(&self, id: ScopeRef) -> Option<&ScopeDef> {
        self.scopes.iter().find(|s| s.id == id)
    }

    /// Iterate over nodes of one kind.
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &NodeDef> {
        self.nodes.iter().filter(move |n| n.op.kind() == kind)
    }

    /// Number of nodes of one kind.
    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes_of(kind).count()
    }
}

/// A scope and the named fields attached to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScopeDef {
    pub id: ScopeRef,
    /// The collection node whose rows this scope iterates. `None` for root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<NodeRef>,
    pub fields: Vec<FieldDef>,
}

impl ScopeDef {
    pub fn field(&self, name: &str) -> Option<NodeRef> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.node)
    }
}

/// A named field binding within a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FieldDef {
    pub name: String,
    pub node: NodeRef,
}

/// One node in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NodeDef {
    pub id: NodeRef,
    pub scope: ScopeRef,
    /// `None` until the engine knows the value's type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<EnrichedValueType>,
    pub op: NodeOp,
}

/// Discriminant of [`NodeOp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Source,
    Transform,
    Constant,
    Field,
    Collect,
    DirectInput,
}

/// What a node computes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
#[non_exhaustive]
pub enum NodeOp {
    Source {
        kind: String,
        spec: serde_json::Value,
        refresh_options: serde_json::Value,
    },
    Transform {
        kind: String,
        spec: serde_json::Value,
        args: Vec<NodeArg>,
    },
    Constant {
        value: serde_json::Value,
    },
    /// Projection of a struct field, or of a row field within a row scope.
    Field { parent: Option<NodeRef>, field: String },
    Collect {
        collector: CollectorRef,
        fields: Vec<FieldDef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_uuid_field: Option<String>,
    },
    DirectInput { name: String },
}

impl NodeOp {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeOp::Source { .. } => NodeKind::Source,
            NodeOp::Transform { .. } => NodeKind::Transform,
            NodeOp::Constant { .. } => NodeKind::Constant,
            NodeOp::Field { .. } => NodeKind::Field,
            NodeOp::Collect { .. } => NodeKind::Collect,
            NodeOp::DirectInput { .. } => NodeKind::DirectInput,
        }
    }
}

/// An argument to a transform: positional when `name` is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NodeArg {
    pub node: NodeRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A collector registered in a scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CollectorDef {
    pub id: CollectorRef,
    pub scope: ScopeRef,
    pub name: String,
}

/// A collector bound to an export target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportDef {
    pub name: String,
    pub kind: String,
    pub spec: serde_json::Value,
    pub index_options: serde_json::Value,
    pub collector: CollectorRef,
    #[serde(default)]
    pub setup_by_user: bool,
}

/// A free-standing declaration with no data dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeclarationDef {
    pub kind: String,
    pub spec: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handles_serialize_as_bare_integers() {
        assert_eq!(serde_json::to_value(NodeRef::new(7)).unwrap(), json!(7));
        assert_eq!(ScopeRef::new(2).to_string(), "scope#2");
    }

    #[test]
    fn node_op_is_tagged() {
        let op = NodeOp::DirectInput { name: "text".into() };
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "direct_input", "name": "text"})
        );
        assert_eq!(op.kind(), NodeKind::DirectInput);
    }

    #[test]
    fn count_by_kind() {
        let mut graph = GraphDef::new("g");
        graph.nodes.push(NodeDef {
            id: NodeRef::new(0),
            scope: ScopeRef::new(0),
            value_type: None,
            op: NodeOp::Constant { value: json!(1) },
        });
        assert_eq!(graph.count(NodeKind::Constant), 1);
        assert_eq!(graph.count(NodeKind::Source), 0);
        assert!(graph.node(NodeRef::new(0)).is_some());
    }
}
