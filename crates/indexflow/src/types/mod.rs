//! Foundational types shared by the builder, the lifecycle layer, and
//! engine implementations.
//!
//! Every type that crosses the engine boundary is `Serialize + Deserialize +
//! Debug + Clone`. Map fields use `BTreeMap` so dumps are deterministic.

pub mod graph;
pub mod options;
pub mod spec;
pub mod stats;
pub mod value;

pub use graph::*;
pub use options::*;
pub use spec::*;
pub use stats::*;
pub use value::*;

/// Current schema version for [`GraphDef`] serialization.
pub const GRAPH_SCHEMA_VERSION: u16 = 1;
