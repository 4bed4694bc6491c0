//! Collectors: gather rows within a scope and bind them to an export.

use std::sync::Arc;

use super::slice::Operand;
use super::state::{self, FlowBuilderState};
use crate::errors::FlowError;
use crate::types::{CollectorRef, DeclarationSpec, ExportOptions, OpSpec, StorageSpec};

/// A field whose value the engine fills in at collection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedField {
    /// A stable UUID per collected row.
    Uuid,
    /// A marker this layer does not know how to generate.
    Unrecognized(String),
}

impl GeneratedField {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "Uuid" | "uuid" => GeneratedField::Uuid,
            other => GeneratedField::Unrecognized(other.to_string()),
        }
    }
}

/// One field value passed to [`DataCollector::collect`].
#[derive(Debug, Clone)]
pub enum CollectValue {
    Value(Operand),
    Generated(GeneratedField),
}

macro_rules! collect_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for CollectValue {
                fn from(value: $ty) -> Self {
                    CollectValue::Value(value.into())
                }
            }
        )*
    };
}

collect_value_from!(
    Operand,
    super::slice::DataSlice,
    &super::slice::DataSlice,
    serde_json::Value,
    &str,
    String,
    i64,
    f64,
    bool,
);

impl From<GeneratedField> for CollectValue {
    fn from(field: GeneratedField) -> Self {
        CollectValue::Generated(field)
    }
}

#[derive(Debug, Clone)]
pub struct DataCollector {
    state: Arc<FlowBuilderState>,
    collector: CollectorRef,
}

impl DataCollector {
    pub(crate) fn new(state: Arc<FlowBuilderState>, collector: CollectorRef) -> Self {
        Self { state, collector }
    }

    pub fn collector_ref(&self) -> CollectorRef {
        self.collector
    }

    /// Collect one row. At most one field may be [`GeneratedField::Uuid`].
    ///
    /// Generated-field markers are checked before any value is resolved, so
    /// a rejected call adds nothing to the graph.
    pub fn collect<I, K>(&self, fields: I) -> Result<(), FlowError>
    where
        I: IntoIterator<Item = (K, CollectValue)>,
        K: Into<String>,
    {
        let fields: Vec<(String, CollectValue)> =
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect();

        let mut auto_uuid_field: Option<String> = None;
        for (name, value) in &fields {
            match value {
                CollectValue::Value(_) => {}
                CollectValue::Generated(GeneratedField::Uuid) => {
                    if let Some(first) = &auto_uuid_field {
                        return Err(FlowError::MultipleGeneratedFields {
                            first: first.clone(),
                            second: name.clone(),
                        });
                    }
                    auto_uuid_field = Some(name.clone());
                }
                CollectValue::Generated(GeneratedField::Unrecognized(marker)) => {
                    return Err(FlowError::UnsupportedGeneratedField {
                        field: name.clone(),
                        marker: marker.clone(),
                    });
                }
            }
        }

        let mut regular = Vec::with_capacity(fields.len());
        for (name, value) in fields {
            if let CollectValue::Value(operand) = value {
                regular.push((name, self.state.operand_node(&operand)?));
            }
        }

        self.state
            .graph()
            .collect(self.collector, regular, auto_uuid_field)?;
        Ok(())
    }

    /// Export the collected rows to `target` under `name`.
    pub fn export(
        &self,
        name: &str,
        target: impl Into<StorageSpec>,
        options: ExportOptions,
    ) -> Result<(), FlowError> {
        let target = target.into();
        let index_options = serde_json::to_value(options.index_options())?;
        self.state.graph().export(
            name,
            target.kind(),
            target.payload()?,
            index_options,
            self.collector,
            options.setup_by_user,
        )?;
        tracing::debug!(export = name, kind = target.kind(), "added export");
        Ok(())
    }

    /// Register a free-standing declaration.
    pub fn declare(&self, spec: impl Into<DeclarationSpec>) -> Result<(), FlowError> {
        state::declare(&self.state, spec.into())
    }
}
