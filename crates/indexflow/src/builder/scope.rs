//! Scopes: the root of a flow and the row scopes of collections.

use std::sync::Arc;

use super::collector::DataCollector;
use super::slice::{DataSlice, DeferredSlice};
use super::state::FlowBuilderState;
use crate::errors::FlowError;
use crate::types::ScopeRef;

/// A named-field scope. Row scopes are released when dropped.
pub struct DataScope {
    state: Arc<FlowBuilderState>,
    scope: ScopeRef,
    owned: bool,
}

impl DataScope {
    pub(crate) fn root(state: Arc<FlowBuilderState>, scope: ScopeRef) -> Self {
        Self {
            state,
            scope,
            owned: false,
        }
    }

    pub(crate) fn row(state: Arc<FlowBuilderState>, scope: ScopeRef) -> Self {
        Self {
            state,
            scope,
            owned: true,
        }
    }

    pub fn scope_ref(&self) -> ScopeRef {
        self.scope
    }

    /// Read field `name` of this scope.
    pub fn get_field(&self, name: &str) -> Result<DataSlice, FlowError> {
        let node = self
            .state
            .graph()
            .scope_field(self.scope, name)?
            .ok_or_else(|| FlowError::MissingField {
                field: name.to_string(),
            })?;
        Ok(DataSlice::new(
            Arc::clone(&self.state),
            DeferredSlice::ready(node),
        ))
    }

    /// Bind `slice` as field `name` of this scope. The slice must not have
    /// been realized or attached yet.
    pub fn set_field(&self, name: &str, slice: &DataSlice) -> Result<(), FlowError> {
        slice.attach_to_scope(self.scope, name)
    }

    /// Add a collector to this scope, named `_collector_N` unless `name` is
    /// given.
    pub fn add_collector(&self, name: Option<&str>) -> Result<DataCollector, FlowError> {
        let name = self.state.build_name(name, "_collector_");
        let collector = self.state.graph().add_collector(self.scope, &name)?;
        tracing::debug!(scope = %self.scope, collector = %name, "added collector");
        Ok(DataCollector::new(Arc::clone(&self.state), collector))
    }
}

impl Drop for DataScope {
    fn drop(&mut self) {
        if self.owned {
            self.state.graph().release_scope(self.scope);
        }
    }
}

impl std::fmt::Debug for DataScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataScope")
            .field("scope", &self.scope)
            .field("owned", &self.owned)
            .finish()
    }
}
