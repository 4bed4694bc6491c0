//! Flow construction front end.
//!
//! User code describes a flow through [`FlowBuilder`], [`DataScope`],
//! [`DataSlice`] and [`DataCollector`]. Each call is forwarded to the
//! engine's [`GraphBuilder`](crate::traits::GraphBuilder); unnamed slices
//! are deferred so that assigning them to a scope field decides their name.

mod collector;
mod scope;
mod slice;
mod state;

pub use collector::{CollectValue, DataCollector, GeneratedField};
pub use scope::DataScope;
pub use slice::{DataSlice, DeferredSlice, Operand, TransformArg};
pub use state::{FlowBuilder, FlowBuilderState};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::defaults::{InMemoryEngine, InMemoryGraphBuilder};
    use crate::errors::FlowError;
    use crate::traits::FlowEngine;
    use crate::types::*;

    struct Fixture {
        state: Arc<FlowBuilderState>,
        graph: Arc<InMemoryGraphBuilder>,
    }

    impl Fixture {
        fn new() -> Self {
            let engine = InMemoryEngine::builder()
                .source_rows(
                    "LocalFile",
                    vec![json!({"filename": "a.md", "content": "alpha"})],
                )
                .build();
            let handle = engine.new_graph_builder("test").unwrap();
            Self {
                state: FlowBuilderState::new(handle),
                graph: engine.graph_builder("test").unwrap(),
            }
        }

        fn builder(&self) -> FlowBuilder {
            FlowBuilder::new(Arc::clone(&self.state))
        }
    }

    #[test]
    fn collect_allows_one_generated_field() {
        let fx = Fixture::new();
        let root = fx.state.root_scope();
        let out = root.add_collector(Some("out")).unwrap();

        out.collect([("id", CollectValue::from(GeneratedField::Uuid))])
            .unwrap();

        let err = out
            .collect([
                ("a", CollectValue::from(GeneratedField::Uuid)),
                ("b", CollectValue::from(GeneratedField::Uuid)),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::MultipleGeneratedFields { ref first, ref second }
                if first == "a" && second == "b"
        ));
        assert_eq!(fx.graph.snapshot().count(NodeKind::Collect), 1);
    }

    #[test]
    fn unrecognized_marker_is_rejected() {
        let fx = Fixture::new();
        let out = fx.state.root_scope().add_collector(None).unwrap();
        let err = out
            .collect([
                ("title", CollectValue::from("constant title")),
                ("stamp", CollectValue::from(GeneratedField::from_tag("Timestamp"))),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::UnsupportedGeneratedField { ref field, ref marker }
                if field == "stamp" && marker == "Timestamp"
        ));
        assert_eq!(fx.graph.snapshot().count(NodeKind::Constant), 0);
    }

    #[test]
    fn collected_literals_become_constants() {
        let fx = Fixture::new();
        let out = fx.state.root_scope().add_collector(None).unwrap();
        out.collect([
            ("kind", CollectValue::from("doc")),
            ("id", CollectValue::from(GeneratedField::Uuid)),
        ])
        .unwrap();

        let graph = fx.graph.snapshot();
        assert_eq!(graph.count(NodeKind::Constant), 1);
        let collect = graph.nodes_of(NodeKind::Collect).next().unwrap();
        match &collect.op {
            NodeOp::Collect {
                fields,
                auto_uuid_field,
                ..
            } => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].name, "kind");
                assert_eq!(auto_uuid_field.as_deref(), Some("id"));
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn collector_names_are_generated() {
        let fx = Fixture::new();
        let root = fx.state.root_scope();
        root.add_collector(None).unwrap();
        root.add_collector(Some("named")).unwrap();
        root.add_collector(None).unwrap();

        let names: Vec<_> = fx
            .graph
            .snapshot()
            .collectors
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, ["_collector_0", "named", "_collector_1"]);
    }

    #[test]
    fn deprecated_vector_index_exports_identically() {
        let fx = Fixture::new();
        let root = fx.state.root_scope();
        for (i, options) in [
            ExportOptions {
                primary_key_fields: vec!["id".into()],
                vector_index: vec![("embedding".into(), VectorSimilarityMetric::CosineSimilarity)],
                ..Default::default()
            },
            ExportOptions::primary_key(["id"])
                .vector_index("embedding", VectorSimilarityMetric::CosineSimilarity),
        ]
        .into_iter()
        .enumerate()
        {
            let out = root.add_collector(None).unwrap();
            out.export(&format!("export_{i}"), Postgres::default(), options)
                .unwrap();
        }

        let exports = fx.graph.snapshot().exports;
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].index_options, exports[1].index_options);
        assert_eq!(
            exports[0].index_options,
            json!({
                "primary_key_fields": ["id"],
                "vector_indexes": [{"field_name": "embedding", "metric": "CosineSimilarity"}],
            })
        );
    }

    #[test]
    fn row_scope_is_released_on_drop() {
        let fx = Fixture::new();
        let docs = fx
            .builder()
            .add_source(LocalFile::new("docs"), SourceOptions::named("documents"))
            .unwrap();
        {
            let row = docs.row().unwrap();
            row.get_field("content").unwrap();
            assert_eq!(fx.graph.open_row_scopes().len(), 1);
        }
        assert!(fx.graph.open_row_scopes().is_empty());

        docs.for_each(|row| {
            row.get_field("filename")?;
            assert_eq!(fx.graph.open_row_scopes().len(), 1);
            Ok(())
        })
        .unwrap();
        assert!(fx.graph.open_row_scopes().is_empty());
    }

    #[test]
    fn nested_row_handles_share_the_scope() {
        let fx = Fixture::new();
        let docs = fx
            .builder()
            .add_source(LocalFile::new("docs"), SourceOptions::named("documents"))
            .unwrap();
        let outer = docs.row().unwrap();
        {
            let inner = docs.row().unwrap();
            inner.get_field("filename").unwrap();
        }
        docs.for_each(|row| row.get_field("filename").map(|_| ()))
            .unwrap();

        assert!(outer.get_field("content").is_ok());
        assert_eq!(fx.graph.open_row_scopes(), [outer.scope_ref()]);
        drop(outer);
        assert!(fx.graph.open_row_scopes().is_empty());
    }

    #[test]
    fn refresh_interval_is_recorded_on_the_source() {
        let fx = Fixture::new();
        fx.builder()
            .add_source(
                LocalFile::new("docs"),
                SourceOptions::named("documents").refresh_interval(Duration::from_secs(30)),
            )
            .unwrap();

        let graph = fx.graph.snapshot();
        let source = graph.nodes_of(NodeKind::Source).next().unwrap();
        match &source.op {
            NodeOp::Source {
                refresh_options, ..
            } => {
                let refresh: SourceRefreshOptions =
                    serde_json::from_value(refresh_options.clone()).unwrap();
                assert_eq!(refresh.refresh_interval, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn slices_from_released_scope_cannot_be_extended() {
        let fx = Fixture::new();
        let docs = fx
            .builder()
            .add_source(LocalFile::new("docs"), SourceOptions::named("documents"))
            .unwrap();
        let row = docs.row().unwrap();
        let content = row.get_field("content").unwrap();
        drop(row);

        let split = content.transform(SplitRecursively::default()).unwrap();
        assert!(matches!(
            split.node(),
            Err(FlowError::Engine(crate::errors::EngineError::ScopeReleased { .. }))
        ));
    }

    #[test]
    fn missing_fields_are_reported() {
        let fx = Fixture::new();
        let root = fx.state.root_scope();
        assert!(matches!(
            root.get_field("nope"),
            Err(FlowError::MissingField { ref field }) if field == "nope"
        ));

        let meta = fx.builder().constant(json!({"title": "t"})).unwrap();
        assert!(meta.field("title").is_ok());
        assert!(matches!(
            meta.field("body"),
            Err(FlowError::MissingField { .. })
        ));
    }

    #[test]
    fn transform_attaches_once() {
        let fx = Fixture::new();
        let root = fx.state.root_scope();
        let docs = fx
            .builder()
            .add_source(LocalFile::new("docs"), SourceOptions::default())
            .unwrap();
        root.set_field("documents", &docs).unwrap();

        let split = root
            .get_field("documents")
            .unwrap()
            .call(|s| s.transform(SplitRecursively::default()))
            .unwrap();
        root.set_field("chunks", &split).unwrap();
        assert!(matches!(
            root.set_field("chunks_again", &split),
            Err(FlowError::AlreadyAttached)
        ));

        let graph = fx.graph.snapshot();
        let root_def = graph.scope(root.scope_ref()).unwrap();
        assert!(root_def.field("documents").is_some());
        assert!(root_def.field("chunks").is_some());
        assert!(root_def.field("chunks_again").is_none());
    }

    #[test]
    fn standalone_transform_gets_generated_name() {
        let fx = Fixture::new();
        let docs = fx
            .builder()
            .add_source(LocalFile::new("docs"), SourceOptions::named("documents"))
            .unwrap();
        docs.transform(SplitRecursively::default())
            .unwrap()
            .node()
            .unwrap();
        docs.transform(SplitRecursively::default())
            .unwrap()
            .node()
            .unwrap();

        let graph = fx.graph.snapshot();
        let root = graph.scope(fx.state.root_scope().scope_ref()).unwrap();
        assert!(root.field("split_recursively_0").is_some());
        assert!(root.field("split_recursively_1").is_some());
    }

    #[test]
    fn declarations_are_recorded() {
        let fx = Fixture::new();
        fx.builder()
            .declare(Neo4jDeclaration {
                connection: "neo4j".into(),
                nodes_label: "Entity".into(),
                primary_key_fields: vec!["value".into()],
                vector_indexes: vec![],
            })
            .unwrap();
        let declarations = fx.graph.snapshot().declarations;
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].kind, "Neo4jDeclaration");
    }
}
