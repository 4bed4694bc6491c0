//! Option records recognized at the engine boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options for a live update run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LiveUpdateOptions {
    /// Keep watching sources after the initial pass. `false` means one-shot.
    #[serde(default = "default_true")]
    pub live_mode: bool,
    /// Log update statistics when the run finishes.
    #[serde(default)]
    pub print_stats: bool,
}

impl Default for LiveUpdateOptions {
    fn default() -> Self {
        Self {
            live_mode: true,
            print_stats: false,
        }
    }
}

impl LiveUpdateOptions {
    /// A single catch-up pass.
    pub fn one_shot() -> Self {
        Self {
            live_mode: false,
            ..Default::default()
        }
    }
}

/// Options for evaluating a flow and dumping its outputs to files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EvaluateAndDumpOptions {
    pub output_dir: String,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

impl EvaluateAndDumpOptions {
    pub fn new(output_dir: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            use_cache: true,
        }
    }
}

/// Similarity metric of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum VectorSimilarityMetric {
    CosineSimilarity,
    L2Distance,
    InnerProduct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VectorIndexDef {
    pub field_name: String,
    pub metric: VectorSimilarityMetric,
}

impl VectorIndexDef {
    pub fn new(field_name: impl Into<String>, metric: VectorSimilarityMetric) -> Self {
        Self {
            field_name: field_name.into(),
            metric,
        }
    }
}

/// Index layout of an export target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IndexOptions {
    pub primary_key_fields: Vec<String>,
    #[serde(default)]
    pub vector_indexes: Vec<VectorIndexDef>,
}

/// Per-source refresh behavior.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceRefreshOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<Duration>,
}

/// Call-site options of [`FlowBuilder::add_source`](crate::FlowBuilder::add_source).
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Explicit field name. When set, the source is created immediately as
    /// a standalone named field instead of being deferred.
    pub name: Option<String>,
    pub refresh_interval: Option<Duration>,
}

impl SourceOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }
}

/// Call-site options of [`DataCollector::export`](crate::DataCollector::export).
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub primary_key_fields: Vec<String>,
    pub vector_indexes: Vec<VectorIndexDef>,
    /// Deprecated single-metric form, folded into `vector_indexes` when
    /// that list is empty.
    pub vector_index: Vec<(String, VectorSimilarityMetric)>,
    pub setup_by_user: bool,
}

impl ExportOptions {
    pub fn primary_key<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            primary_key_fields: fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn vector_index(mut self, field_name: impl Into<String>, metric: VectorSimilarityMetric) -> Self {
        self.vector_indexes.push(VectorIndexDef::new(field_name, metric));
        self
    }

    pub fn setup_by_user(mut self, setup_by_user: bool) -> Self {
        self.setup_by_user = setup_by_user;
        self
    }

    /// The index options record handed to the engine.
    pub fn index_options(&self) -> IndexOptions {
        let vector_indexes = if self.vector_indexes.is_empty() && !self.vector_index.is_empty() {
            self.vector_index
                .iter()
                .map(|(field_name, metric)| VectorIndexDef::new(field_name.clone(), *metric))
                .collect()
        } else {
            self.vector_indexes.clone()
        };
        IndexOptions {
            primary_key_fields: self.primary_key_fields.clone(),
            vector_indexes,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn live_update_defaults() {
        let opts: LiveUpdateOptions = serde_json::from_value(json!({})).unwrap();
        assert!(opts.live_mode);
        assert!(!opts.print_stats);
        assert!(!LiveUpdateOptions::one_shot().live_mode);
    }

    #[test]
    fn evaluate_defaults_to_cache() {
        let opts: EvaluateAndDumpOptions =
            serde_json::from_value(json!({"output_dir": "out"})).unwrap();
        assert!(opts.use_cache);
    }

    #[test]
    fn deprecated_vector_index_is_folded_in() {
        let legacy = ExportOptions {
            primary_key_fields: vec!["id".into()],
            vector_index: vec![("embedding".into(), VectorSimilarityMetric::CosineSimilarity)],
            ..Default::default()
        };
        let modern = ExportOptions::primary_key(["id"])
            .vector_index("embedding", VectorSimilarityMetric::CosineSimilarity);
        assert_eq!(legacy.index_options(), modern.index_options());
    }

    #[test]
    fn modern_vector_indexes_win() {
        let opts = ExportOptions {
            primary_key_fields: vec!["id".into()],
            vector_indexes: vec![VectorIndexDef::new("a", VectorSimilarityMetric::L2Distance)],
            vector_index: vec![("b".into(), VectorSimilarityMetric::InnerProduct)],
            setup_by_user: false,
        };
        let index = opts.index_options();
        assert_eq!(index.vector_indexes.len(), 1);
        assert_eq!(index.vector_indexes[0].field_name, "a");
    }

    #[test]
    fn metric_serializes_by_name() {
        assert_eq!(
            serde_json::to_value(VectorSimilarityMetric::L2Distance).unwrap(),
            json!("L2Distance")
        );
    }
}
