//! Default engine implementation.
//!
//! [`InMemoryEngine`] lets flows be built, updated and evaluated with zero
//! external configuration. Any other engine plugs in through
//! [`FlowEngine`](crate::traits::FlowEngine).

pub mod in_memory_engine;
pub mod in_memory_graph;
pub mod in_memory_runtime;

pub use in_memory_engine::{FunctionHandler, InMemoryEngine, InMemoryEngineBuilder, TypedFunction};
pub use in_memory_graph::InMemoryGraphBuilder;
pub use in_memory_runtime::{InMemoryFlowRuntime, InMemoryTransientFlow, InMemoryUpdateProcess};
