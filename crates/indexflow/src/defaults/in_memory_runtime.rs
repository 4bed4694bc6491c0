//! Compiled flows of the in-memory engine.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;
use uuid::Uuid;

use super::in_memory_engine::EngineConfig;
use crate::errors::EngineError;
use crate::traits::{FlowRuntime, TransientFlowRuntime, UpdateProcess, UpdateStatus};
use crate::types::*;

/// One source as seen by an update run.
#[derive(Debug, Clone)]
struct SourceTask {
    name: String,
    rows: Vec<Value>,
    failure: Option<String>,
    refresh_interval: Option<Duration>,
}

pub struct InMemoryFlowRuntime {
    graph: GraphDef,
    config: Arc<EngineConfig>,
}

impl InMemoryFlowRuntime {
    pub(crate) fn new(graph: GraphDef, config: Arc<EngineConfig>) -> Self {
        Self { graph, config }
    }

    /// The field a node is bound to, if any.
    fn bound_name(&self, node: NodeRef) -> Option<&str> {
        self.graph
            .scopes
            .iter()
            .flat_map(|s| s.fields.iter())
            .find(|f| f.node == node)
            .map(|f| f.name.as_str())
    }

    fn sources(&self) -> Result<Vec<SourceTask>, EngineError> {
        let mut tasks = Vec::new();
        for node in self.graph.nodes_of(NodeKind::Source) {
            let NodeOp::Source {
                kind,
                refresh_options,
                ..
            } = &node.op
            else {
                continue;
            };
            let name = self
                .bound_name(node.id)
                .map(str::to_string)
                .unwrap_or_else(|| node.id.to_string());
            let refresh: SourceRefreshOptions = serde_json::from_value(refresh_options.clone())
                .map_err(|e| EngineError::InvalidGraph {
                    message: format!("source `{name}` has malformed refresh options: {e}"),
                })?;
            tasks.push(SourceTask {
                name,
                rows: self.config.source_rows.get(kind).cloned().unwrap_or_default(),
                failure: self.config.failing_sources.get(kind).cloned(),
                refresh_interval: refresh.refresh_interval,
            });
        }
        Ok(tasks)
    }
}

#[async_trait]
impl FlowRuntime for InMemoryFlowRuntime {
    fn name(&self) -> &str {
        &self.graph.name
    }

    fn graph(&self) -> &GraphDef {
        &self.graph
    }

    async fn evaluate_and_dump(&self, options: &EvaluateAndDumpOptions) -> Result<(), EngineError> {
        let mut sources = BTreeMap::new();
        for source in self.sources()? {
            if let Some(message) = source.failure {
                return Err(EngineError::Execution {
                    message: format!("source `{}` failed: {message}", source.name),
                });
            }
            sources.insert(source.name, Value::Array(source.rows));
        }
        let dump = json!({
            "flow": self.graph.name,
            "graph": self.graph,
            "sources": sources,
        });
        let data = serde_json::to_vec_pretty(&dump).map_err(|e| EngineError::Execution {
            message: format!("failed to serialize dump: {e}"),
        })?;

        let dir = PathBuf::from(&options.output_dir);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", self.graph.name));
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, data).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        tracing::info!(
            flow = %self.graph.name,
            path = %path.display(),
            use_cache = options.use_cache,
            "dumped flow output"
        );
        Ok(())
    }

    async fn start_update(
        &self,
        options: &LiveUpdateOptions,
    ) -> Result<Arc<dyn UpdateProcess>, EngineError> {
        let sources = self.sources()?;
        let interval = sources
            .iter()
            .filter_map(|s| s.refresh_interval)
            .min()
            .unwrap_or(self.config.poll_interval);
        tracing::info!(
            flow = %self.graph.name,
            sources = sources.len(),
            interval_ms = interval.as_millis() as u64,
            live_mode = options.live_mode,
            "starting update"
        );
        self.config
            .started_updates
            .lock()
            .push((self.graph.name.clone(), options.clone()));
        Ok(InMemoryUpdateProcess::spawn(
            self.graph.name.clone(),
            sources,
            interval,
            options.clone(),
        ))
    }
}

struct UpdateState {
    info: IndexUpdateInfo,
    error: Option<String>,
}

/// A simulated update run on a tokio task.
///
/// The first cycle counts every configured row as an insertion; later
/// live-mode cycles count them as unchanged.
pub struct InMemoryUpdateProcess {
    run_id: Uuid,
    abort_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<UpdateStatus>,
    shared: Arc<Mutex<UpdateState>>,
}

impl InMemoryUpdateProcess {
    /// Identifier of this update run, as it appears in log events.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn spawn(
        flow_name: String,
        sources: Vec<SourceTask>,
        interval: Duration,
        options: LiveUpdateOptions,
    ) -> Arc<Self> {
        let run_id = Uuid::new_v4();
        let (abort_tx, abort_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(UpdateStatus::Running);

        let mut info = IndexUpdateInfo::new(Utc::now());
        info.sources = sources
            .iter()
            .map(|s| SourceUpdateInfo::new(s.name.clone()))
            .collect();
        let shared = Arc::new(Mutex::new(UpdateState { info, error: None }));

        tracing::debug!(flow = %flow_name, %run_id, "spawning update task");
        let task_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let status = run_cycles(&sources, interval, options.live_mode, abort_rx, &task_shared).await;
            let info = {
                let mut state = task_shared.lock();
                state.info.finished_at = Some(Utc::now());
                state.info.clone()
            };
            if options.print_stats {
                tracing::info!(flow = %flow_name, %run_id, status = ?status, stats = %info, "index update finished");
            } else {
                tracing::debug!(flow = %flow_name, %run_id, status = ?status, "index update finished");
            }
            status_tx.send_replace(status);
        });

        Arc::new(Self {
            run_id,
            abort_tx,
            status_rx,
            shared,
        })
    }
}

async fn run_cycles(
    sources: &[SourceTask],
    interval: Duration,
    live_mode: bool,
    mut abort_rx: watch::Receiver<bool>,
    shared: &Mutex<UpdateState>,
) -> UpdateStatus {
    if *abort_rx.borrow() {
        return UpdateStatus::Aborted;
    }
    if apply_cycle(sources, true, shared).is_err() || !live_mode {
        return UpdateStatus::Finished;
    }
    loop {
        tokio::select! {
            changed = abort_rx.changed() => {
                if changed.is_err() || *abort_rx.borrow() {
                    return UpdateStatus::Aborted;
                }
            }
            _ = tokio::time::sleep(interval) => {
                if apply_cycle(sources, false, shared).is_err() {
                    return UpdateStatus::Finished;
                }
            }
        }
    }
}

fn apply_cycle(sources: &[SourceTask], first: bool, shared: &Mutex<UpdateState>) -> Result<(), ()> {
    let mut state = shared.lock();
    for (i, source) in sources.iter().enumerate() {
        let counters = &mut state.info.sources[i];
        if let Some(message) = &source.failure {
            counters.num_errors += 1;
            tracing::warn!(source = %source.name, error = %message, "source update failed");
            state.error = Some(format!("source `{}` failed: {message}", source.name));
            return Err(());
        }
        let rows = source.rows.len() as u64;
        if first {
            counters.num_insertions += rows;
        } else {
            counters.num_no_change += rows;
        }
    }
    Ok(())
}

#[async_trait]
impl UpdateProcess for InMemoryUpdateProcess {
    fn abort(&self) {
        self.abort_tx.send_replace(true);
    }

    async fn wait(&self) -> Result<(), EngineError> {
        let mut status_rx = self.status_rx.clone();
        status_rx
            .wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| EngineError::Execution {
                message: "update task ended without reporting a status".into(),
            })?;
        let error = self.shared.lock().error.clone();
        match error {
            Some(message) => Err(EngineError::Execution { message }),
            None => Ok(()),
        }
    }

    fn status(&self) -> UpdateStatus {
        *self.status_rx.borrow()
    }

    fn index_update_info(&self) -> IndexUpdateInfo {
        self.shared.lock().info.clone()
    }
}

/// A transient flow evaluated by walking the graph from its output.
pub struct InMemoryTransientFlow {
    graph: GraphDef,
    inputs: Vec<NodeRef>,
    output: NodeRef,
    config: Arc<EngineConfig>,
}

impl InMemoryTransientFlow {
    pub(crate) fn new(graph: GraphDef, config: Arc<EngineConfig>) -> Result<Self, EngineError> {
        let output = graph.direct_output.ok_or_else(|| EngineError::InvalidGraph {
            message: "transient flow has no output".into(),
        })?;
        let inputs = graph.nodes_of(NodeKind::DirectInput).map(|n| n.id).collect();
        Ok(Self {
            graph,
            inputs,
            output,
            config,
        })
    }

    fn eval(&self, node: NodeRef, values: &mut HashMap<NodeRef, Value>) -> Result<Value, EngineError> {
        if let Some(value) = values.get(&node) {
            return Ok(value.clone());
        }
        let def = self.graph.node(node).ok_or(EngineError::UnknownHandle {
            what: "node",
            id: node.raw(),
        })?;
        let value = match &def.op {
            NodeOp::Constant { value } => value.clone(),
            NodeOp::Field {
                parent: Some(parent),
                field,
            } => {
                let parent = self.eval(*parent, values)?;
                parent.get(field).cloned().unwrap_or(Value::Null)
            }
            NodeOp::Transform { kind, args, .. } => {
                let handler = self.config.functions.get(kind).ok_or_else(|| EngineError::Execution {
                    message: format!("no function registered for `{kind}`"),
                })?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg.node, values))
                    .collect::<Result<Vec<_>, _>>()?;
                handler.evaluate(&args)?
            }
            other => {
                return Err(EngineError::Execution {
                    message: format!("{:?} nodes cannot be evaluated directly", other.kind()),
                })
            }
        };
        values.insert(node, value.clone());
        Ok(value)
    }
}

#[async_trait]
impl TransientFlowRuntime for InMemoryTransientFlow {
    fn name(&self) -> &str {
        &self.graph.name
    }

    fn graph(&self) -> &GraphDef {
        &self.graph
    }

    async fn evaluate(&self, inputs: Vec<Value>) -> Result<Value, EngineError> {
        if inputs.len() != self.inputs.len() {
            return Err(EngineError::Execution {
                message: format!(
                    "transient flow `{}` takes {} inputs, got {}",
                    self.graph.name,
                    self.inputs.len(),
                    inputs.len()
                ),
            });
        }
        let mut values: HashMap<NodeRef, Value> =
            self.inputs.iter().copied().zip(inputs).collect();
        let output = self.eval(self.output, &mut values)?;
        tracing::debug!(flow = %self.graph.name, "evaluated transient flow");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::InMemoryEngine;
    use crate::traits::{FlowEngine, GraphBuilder};

    fn one_shot_engine(rows: usize) -> InMemoryEngine {
        InMemoryEngine::builder()
            .source_rows(
                "LocalFile",
                (0..rows).map(|i| json!({"filename": format!("{i}.md")})).collect(),
            )
            .poll_interval(Duration::from_millis(10))
            .build()
    }

    async fn runtime_with_source(engine: &InMemoryEngine) -> Arc<dyn FlowRuntime> {
        let builder = engine.new_graph_builder("docs_flow").unwrap();
        builder
            .add_source("LocalFile", json!({}), None, "documents", json!({}))
            .unwrap();
        builder.build_flow().await.unwrap()
    }

    #[tokio::test]
    async fn one_shot_update_counts_insertions() {
        let runtime = runtime_with_source(&one_shot_engine(3)).await;
        let process = runtime
            .start_update(&LiveUpdateOptions::one_shot())
            .await
            .unwrap();
        process.wait().await.unwrap();

        assert_eq!(process.status(), UpdateStatus::Finished);
        let info = process.index_update_info();
        assert_eq!(info.source("documents").unwrap().num_insertions, 3);
        assert!(info.finished_at.is_some());
    }

    #[tokio::test]
    async fn live_update_runs_until_aborted() {
        let runtime = runtime_with_source(&one_shot_engine(2)).await;
        let process = runtime
            .start_update(&LiveUpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(process.status(), UpdateStatus::Running);

        tokio::time::sleep(Duration::from_millis(50)).await;
        process.abort();
        process.abort();
        process.wait().await.unwrap();

        assert_eq!(process.status(), UpdateStatus::Aborted);
        let info = process.index_update_info();
        let documents = info.source("documents").unwrap();
        assert_eq!(documents.num_insertions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_interval_drives_live_cycles() {
        let engine = InMemoryEngine::builder()
            .source_rows("LocalFile", vec![json!({"filename": "a.md"}), json!({"filename": "b.md"})])
            .poll_interval(Duration::from_secs(3600))
            .build();
        let builder = engine.new_graph_builder("refreshing").unwrap();
        let refresh = serde_json::to_value(SourceRefreshOptions {
            refresh_interval: Some(Duration::from_secs(10)),
        })
        .unwrap();
        builder
            .add_source("LocalFile", json!({}), None, "documents", refresh)
            .unwrap();
        let runtime = builder.build_flow().await.unwrap();

        let process = runtime
            .start_update(&LiveUpdateOptions::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(35)).await;
        process.abort();
        process.wait().await.unwrap();

        let info = process.index_update_info();
        let documents = info.source("documents").unwrap();
        assert_eq!(documents.num_insertions, 2);
        assert_eq!(documents.num_no_change, 6);
    }

    #[tokio::test]
    async fn malformed_refresh_options_are_rejected() {
        let engine = one_shot_engine(1);
        let builder = engine.new_graph_builder("broken").unwrap();
        builder
            .add_source(
                "LocalFile",
                json!({}),
                None,
                "documents",
                json!({"refresh_interval": "soon"}),
            )
            .unwrap();
        let runtime = builder.build_flow().await.unwrap();

        let err = runtime
            .start_update(&LiveUpdateOptions::one_shot())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::InvalidGraph { ref message } if message.contains("documents")));
    }

    #[tokio::test]
    async fn failing_source_reports_error() {
        let engine = InMemoryEngine::builder()
            .failing_source("LocalFile", "permission denied")
            .build();
        let runtime = runtime_with_source(&engine).await;
        let process = runtime
            .start_update(&LiveUpdateOptions::one_shot())
            .await
            .unwrap();

        let err = process.wait().await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(process.index_update_info().sources[0].num_errors, 1);
    }

    #[tokio::test]
    async fn evaluate_and_dump_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_source(&one_shot_engine(1)).await;
        let output_dir = dir.path().join("out");
        runtime
            .evaluate_and_dump(&EvaluateAndDumpOptions::new(output_dir.to_string_lossy()))
            .await
            .unwrap();

        let data = std::fs::read(output_dir.join("docs_flow.json")).unwrap();
        let dump: Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(dump["flow"], "docs_flow");
        assert_eq!(dump["sources"]["documents"][0]["filename"], "0.md");
        assert!(!output_dir.join("docs_flow.json.tmp").exists());
    }

    #[tokio::test]
    async fn transient_flow_evaluates_functions() {
        let engine = InMemoryEngine::builder()
            .function("Concat", |args: &[Value]| {
                let joined: String = args.iter().filter_map(Value::as_str).collect();
                Ok(Value::from(joined))
            })
            .build();
        let builder = engine.new_graph_builder("t").unwrap();
        let text = builder
            .add_direct_input("text", EnrichedValueType::new(ValueType::Str))
            .unwrap();
        let suffix = builder
            .constant(EnrichedValueType::new(ValueType::Str), json!("!"))
            .unwrap();
        let out = builder
            .transform(
                "Concat",
                json!({}),
                vec![
                    NodeArg { node: text, name: None },
                    NodeArg { node: suffix, name: None },
                ],
                None,
                "concat_0",
            )
            .unwrap();
        builder.set_direct_output(out).unwrap();
        let flow = builder.build_transient_flow().await.unwrap();

        assert_eq!(flow.evaluate(vec![json!("hi")]).await.unwrap(), json!("hi!"));
        assert!(flow.evaluate(vec![]).await.is_err());
    }
}
