//! indexflow: declarative data-indexing flows.
//!
//! This crate is the builder and update-lifecycle layer of an indexing
//! pipeline. User code describes a flow as a graph of sources, transforms,
//! row scopes, collectors and exports; the graph is compiled lazily by an
//! execution engine behind the [`traits`] seams, then kept fresh with
//! [`LiveUpdater`] or evaluated directly as a [`TransientFlow`].
//!
//! The layer never executes transforms or touches storage itself.
//! [`InMemoryEngine`] is the bundled reference engine.

pub mod builder;
pub mod defaults;
pub mod errors;
pub mod flow;
pub mod naming;
pub mod registry;
pub mod runtime;
pub mod traits;
pub mod transient;
pub mod types;
pub mod updater;

// Re-export public types at the crate level.

// builder
pub use builder::{
    CollectValue, DataCollector, DataScope, DataSlice, DeferredSlice, FlowBuilder,
    FlowBuilderState, GeneratedField, Operand, TransformArg,
};

// defaults
pub use defaults::{FunctionHandler, InMemoryEngine, InMemoryEngineBuilder, TypedFunction};

// errors
pub use errors::{EngineError, FlowError};

// flow / registry / lifecycle
pub use flow::{Flow, FlowDefiner, FLOW_NAME_PREFIX};
pub use naming::NameRegistry;
pub use registry::{FlowRegistry, TRANSIENT_FLOW_NAME_PREFIX};
pub use transient::{FlowArgs, FlowParam, ParamKind, TransientFlow};
pub use updater::LiveUpdater;

// traits
pub use traits::{
    FlowEngine, FlowRuntime, GraphBuilder, TransientFlowRuntime, UpdateProcess, UpdateStatus,
};

// types
pub use types::{
    CollectorRef, CustomSpec, DeclarationSpec, EnrichedValueType, EvaluateAndDumpOptions,
    ExportOptions, FunctionSpec, GraphDef, IndexOptions, IndexUpdateInfo, LiveUpdateOptions,
    NodeRef, OpSpec, ScopeRef, SourceOptions, SourceRefreshOptions, SourceSpec,
    SourceUpdateInfo, StorageSpec, ValueType, VectorIndexDef, VectorSimilarityMetric,
    GRAPH_SCHEMA_VERSION,
};
