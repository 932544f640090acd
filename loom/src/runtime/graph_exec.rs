//! Graph Executor (component G): a Command-based, wave-scheduled executor
//! over a single typed [`GraphState`], supporting parallel fan-out/fan-in
//! with per-key reducers, conditional edges, and barrier fan-in.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info_span, Instrument};

use super::event::{Event, ObjectKind};
use crate::error::AgentError;

/// Overwrite, append-to-array, or append-each-entry-of-a-map-into-an-array-valued-key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reducer {
    Default,
    AppendSlice,
    AppendMapSlice,
}

impl Reducer {
    fn apply(self, current: Option<&Value>, update: &Value) -> Value {
        match self {
            Reducer::Default => update.clone(),
            Reducer::AppendSlice => {
                let mut base = match current {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                match update {
                    Value::Array(items) => base.extend(items.clone()),
                    other => base.push(other.clone()),
                }
                Value::Array(base)
            }
            Reducer::AppendMapSlice => {
                let mut base = match current {
                    Some(Value::Array(items)) => items.clone(),
                    _ => Vec::new(),
                };
                if let Value::Object(map) = update {
                    for (_, v) in map {
                        base.push(v.clone());
                    }
                }
                Value::Array(base)
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct SchemaField {
    pub reducer: Reducer,
    pub default: Value,
}

/// Describes every key a [`GraphState`] may hold and how updates to it merge.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    fields: BTreeMap<String, SchemaField>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, reducer: Reducer, default: Value) -> Self {
        self.fields.insert(key.into(), SchemaField { reducer, default });
        self
    }

    pub fn defaults(&self) -> GraphState {
        let mut state = BTreeMap::new();
        for (k, field) in &self.fields {
            state.insert(k.clone(), field.default.clone());
        }
        GraphState(state)
    }

    fn reducer_for(&self, key: &str) -> Reducer {
        self.fields.get(key).map(|f| f.reducer).unwrap_or(Reducer::Default)
    }
}

/// A string-keyed typed state value, merged key-by-key via the schema's reducers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphState(pub BTreeMap<String, Value>);

impl GraphState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn merge(&mut self, schema: &Schema, delta: &BTreeMap<String, Value>) {
        for (key, update) in delta {
            let reducer = schema.reducer_for(key);
            let merged = reducer.apply(self.0.get(key), update);
            self.0.insert(key.clone(), merged);
        }
    }
}

/// A node's return value: either a plain state delta (follow its static
/// edges) or an explicit list of commands naming their own targets.
pub enum NodeOutcome {
    Delta(BTreeMap<String, Value>),
    Commands(Vec<Command>),
}

/// One fan-out target: the state update to merge, which node to schedule
/// next, and an optional task-local payload delivered straight to that node
/// instance instead of through shared state — the mechanism `create-map-tasks`
/// uses to give each parallel `map-summarize` invocation its own chunk
/// without every wave member clobbering a shared key (§4.G map-reduce pattern).
pub struct Command {
    pub update: BTreeMap<String, Value>,
    pub goto: String,
    pub task_input: Option<Value>,
}

impl Command {
    pub fn new(goto: impl Into<String>, update: BTreeMap<String, Value>) -> Self {
        Self {
            goto: goto.into(),
            update,
            task_input: None,
        }
    }

    pub fn with_task_input(mut self, value: Value) -> Self {
        self.task_input = Some(value);
        self
    }
}

/// End-of-branch sentinel returned by a conditional edge.
pub const END: &str = "__end__";

#[async_trait]
pub trait GraphNode: Send + Sync {
    fn name(&self) -> &str;

    /// `task_input` carries the payload a fan-out `Command` addressed to this
    /// specific invocation (`None` for statically-edged or entry nodes).
    async fn run(&self, state: &GraphState, task_input: Option<&Value>) -> Result<NodeOutcome, AgentError>;
}

/// A conditional edge's predicate: inspects the state and names the next
/// node, or [`END`] to terminate that branch (used for barrier fan-in, §4.G).
pub type ConditionalEdge = Arc<dyn Fn(&GraphState) -> String + Send + Sync>;

enum Edge {
    Static(String),
    Conditional(ConditionalEdge),
}

#[derive(Debug, thiserror::Error)]
pub enum GraphCompileError {
    #[error("no entry point set")]
    MissingEntry,
    #[error("edge references unknown node: {0}")]
    UnknownNode(String),
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),
}

pub struct GraphBuilder {
    schema: Schema,
    nodes: Vec<Arc<dyn GraphNode>>,
    edges: BTreeMap<String, Edge>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            nodes: Vec::new(),
            edges: BTreeMap::new(),
            entry: None,
        }
    }

    pub fn add_node(mut self, node: Arc<dyn GraphNode>) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.insert(from.into(), Edge::Static(to.into()));
        self
    }

    pub fn add_conditional_edge(mut self, from: impl Into<String>, predicate: ConditionalEdge) -> Self {
        self.edges.insert(from.into(), Edge::Conditional(predicate));
        self
    }

    pub fn set_entry(mut self, node: impl Into<String>) -> Self {
        self.entry = Some(node.into());
        self
    }

    pub fn compile(self) -> Result<CompiledGraph, GraphCompileError> {
        let Some(entry) = self.entry else {
            return Err(GraphCompileError::MissingEntry);
        };
        let mut seen = std::collections::BTreeSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name().to_string()) {
                return Err(GraphCompileError::DuplicateNode(node.name().to_string()));
            }
        }
        if !seen.contains(&entry) {
            return Err(GraphCompileError::UnknownNode(entry));
        }
        for (from, edge) in &self.edges {
            if !seen.contains(from) {
                return Err(GraphCompileError::UnknownNode(from.clone()));
            }
            if let Edge::Static(to) = edge {
                if to != END && !seen.contains(to) {
                    return Err(GraphCompileError::UnknownNode(to.clone()));
                }
            }
        }
        Ok(CompiledGraph {
            schema: self.schema,
            nodes: self.nodes,
            edges: self.edges,
            entry,
        })
    }
}

pub struct CompiledGraph {
    schema: Schema,
    nodes: Vec<Arc<dyn GraphNode>>,
    edges: BTreeMap<String, Edge>,
    entry: String,
}

/// One scheduled wave member: the node to run, its task-local input (if any),
/// and the registration-relative ordering key used to make within-wave
/// reduction order reproducible (§4.G "Within a wave...").
struct ScheduledTarget {
    source_index: usize,
    command_index: usize,
    node: String,
    task_input: Option<Value>,
}

/// A node name paired with the task-local input it was dispatched with.
struct ActiveNode {
    name: String,
    task_input: Option<Value>,
}

impl CompiledGraph {
    fn node_index(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name() == name)
    }

    fn follow(&self, node: &str, state: &GraphState) -> Option<String> {
        let target = match self.edges.get(node) {
            Some(Edge::Static(to)) => to.clone(),
            Some(Edge::Conditional(predicate)) => predicate(state),
            None => return None,
        };
        if target == END {
            None
        } else {
            Some(target)
        }
    }

    /// Runs the graph to completion, emitting one event per wave's state
    /// delta and a terminal `graph.execution` event carrying the final
    /// state and chosen message (§4.G).
    pub async fn run(
        &self,
        invocation_id: &str,
        branch: &[String],
        initial: BTreeMap<String, Value>,
        emit: &tokio::sync::mpsc::Sender<Event>,
    ) -> Result<GraphState, AgentError> {
        let mut state = self.schema.defaults();
        state.merge(&self.schema, &initial);

        let mut active = vec![ActiveNode {
            name: self.entry.clone(),
            task_input: None,
        }];

        while !active.is_empty() {
            let span = info_span!("graph_wave", wave_size = active.len());

            // One task per node in the wave, run concurrently against a shared
            // read-only snapshot; the deterministic reduce below only starts
            // once every node in the wave has returned.
            let snapshot = Arc::new(state.clone());
            let mut handles = Vec::with_capacity(active.len());
            for active_node in &active {
                let Some(idx) = self.node_index(&active_node.name) else {
                    return Err(AgentError::ExecutionFailed(format!(
                        "scheduled unknown node: {}",
                        active_node.name
                    )));
                };
                let node = self.nodes[idx].clone();
                let snapshot = snapshot.clone();
                let node_name = active_node.name.clone();
                let task_input = active_node.task_input.clone();
                let node_span = span.clone();
                handles.push(tokio::spawn(
                    async move {
                        let result = node.run(&snapshot, task_input.as_ref()).await;
                        (idx, node_name, result)
                    }
                    .instrument(node_span),
                ));
            }

            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(handle.await.map_err(|e| {
                    AgentError::ExecutionFailed(format!("graph node task panicked: {e}"))
                })?);
            }

            let mut targets: Vec<ScheduledTarget> = Vec::new();
            for (source_index, node_name, result) in results {
                match result? {
                    NodeOutcome::Delta(delta) => {
                        state.merge(&self.schema, &delta);
                        if !delta.is_empty() {
                            let event = Event::from_state_delta(invocation_id, "graph", branch, delta);
                            let _ = emit.send(event).await;
                        }
                        if let Some(next) = self.follow(&node_name, &state) {
                            targets.push(ScheduledTarget {
                                source_index,
                                command_index: 0,
                                node: next,
                                task_input: None,
                            });
                        }
                    }
                    NodeOutcome::Commands(commands) => {
                        for (command_index, command) in commands.into_iter().enumerate() {
                            state.merge(&self.schema, &command.update);
                            if !command.update.is_empty() {
                                let event = Event::from_state_delta(
                                    invocation_id,
                                    "graph",
                                    branch,
                                    command.update,
                                );
                                let _ = emit.send(event).await;
                            }
                            if command.goto != END {
                                targets.push(ScheduledTarget {
                                    source_index,
                                    command_index,
                                    node: command.goto,
                                    task_input: command.task_input,
                                });
                            }
                        }
                    }
                }
            }

            targets.sort_by_key(|t| (t.source_index, t.command_index));
            active = targets
                .into_iter()
                .map(|t| ActiveNode {
                    name: t.node,
                    task_input: t.task_input,
                })
                .collect();
        }

        let mut terminal = Event::from_response(
            invocation_id,
            "graph",
            branch,
            super::event::Response {
                id: uuid::Uuid::new_v4().to_string(),
                object: ObjectKind::GraphExecution,
                created: 0,
                choices: Vec::new(),
                done: true,
                is_partial: false,
                error: None,
            },
        );
        terminal.state_delta = Some(state.0.clone());
        let _ = emit.send(terminal).await;

        Ok(state)
    }
}
