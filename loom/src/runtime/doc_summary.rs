//! The canonical map-reduce document-summary graph (§4.G "Map-reduce
//! pattern"): `load-and-chunk → retrieve(top-K) → create-map-tasks →
//! map-summarize → collect-partial → conditional barrier → prepare-reduce →
//! reduce-join → finish`. Built on [`super::graph_exec`]'s primitives; the
//! only thing specific to this workflow is the seven [`GraphNode`]
//! implementations below and the [`Schema`] wiring them together.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::chunking::chunk_text;
use super::event::Message;
use super::graph_exec::{
    Command, CompiledGraph, GraphBuilder, GraphCompileError, GraphNode, GraphState, NodeOutcome,
    Reducer, Schema, END,
};
use super::model::{GenerationConfig, Model, Request};
use crate::error::AgentError;

#[derive(Debug, thiserror::Error)]
pub enum DocumentSummaryError {
    #[error(transparent)]
    Compile(#[from] GraphCompileError),
}

fn schema() -> Schema {
    Schema::new()
        .with_field("document_text", Reducer::Default, Value::String(String::new()))
        .with_field("chunk_size", Reducer::Default, Value::from(800))
        .with_field("overlap", Reducer::Default, Value::from(100))
        .with_field("top_k", Reducer::Default, Value::from(4))
        .with_field("question", Reducer::Default, Value::String(String::new()))
        .with_field("chunks", Reducer::Default, Value::Array(Vec::new()))
        .with_field("retrieved_chunks", Reducer::Default, Value::Array(Vec::new()))
        .with_field("selected_count", Reducer::Default, Value::from(0))
        .with_field("partial_summaries", Reducer::AppendSlice, Value::Array(Vec::new()))
        .with_field("final_answer", Reducer::Default, Value::String(String::new()))
}

struct LoadAndChunkNode;

#[async_trait]
impl GraphNode for LoadAndChunkNode {
    fn name(&self) -> &str {
        "load_and_chunk"
    }

    async fn run(&self, state: &GraphState, _task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
        let text = state.get("document_text").and_then(Value::as_str).unwrap_or("");
        let chunk_size = state.get("chunk_size").and_then(Value::as_u64).unwrap_or(800) as usize;
        let overlap = state.get("overlap").and_then(Value::as_u64).unwrap_or(100) as usize;

        let chunks = chunk_text(text, chunk_size, overlap).map_err(|e| AgentError::ExecutionFailed(e.to_string()))?;

        let mut delta = BTreeMap::new();
        delta.insert(
            "chunks".to_string(),
            Value::Array(chunks.into_iter().map(Value::String).collect()),
        );
        Ok(NodeOutcome::Delta(delta))
    }
}

struct RetrieveNode;

#[async_trait]
impl GraphNode for RetrieveNode {
    fn name(&self) -> &str {
        "retrieve"
    }

    async fn run(&self, state: &GraphState, _task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
        let chunks = state.get("chunks").and_then(Value::as_array).cloned().unwrap_or_default();
        if chunks.is_empty() {
            return Err(AgentError::ExecutionFailed("no chunks to retrieve from".into()));
        }
        let top_k = state.get("top_k").and_then(Value::as_u64).unwrap_or(4) as usize;
        let selected: Vec<Value> = chunks.into_iter().take(top_k.max(1)).collect();

        let mut delta = BTreeMap::new();
        delta.insert("retrieved_chunks".to_string(), Value::Array(selected));
        Ok(NodeOutcome::Delta(delta))
    }
}

struct CreateMapTasksNode;

#[async_trait]
impl GraphNode for CreateMapTasksNode {
    fn name(&self) -> &str {
        "create_map_tasks"
    }

    async fn run(&self, state: &GraphState, _task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
        let chunks = state
            .get("retrieved_chunks")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let question = state.get("question").and_then(Value::as_str).unwrap_or("").to_string();

        let mut commands = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let task = serde_json::json!({"chunk": chunk, "question": question});
            let mut command = Command::new("map_summarize", BTreeMap::new()).with_task_input(task);
            if i == 0 {
                let mut update = BTreeMap::new();
                update.insert("selected_count".to_string(), Value::from(chunks.len()));
                command.update = update;
            }
            commands.push(command);
        }
        Ok(NodeOutcome::Commands(commands))
    }
}

struct MapSummarizeNode {
    model: Arc<dyn Model>,
}

#[async_trait]
impl GraphNode for MapSummarizeNode {
    fn name(&self) -> &str {
        "map_summarize"
    }

    async fn run(&self, _state: &GraphState, task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
        let task = task_input.ok_or_else(|| AgentError::ExecutionFailed("map_summarize dispatched without a task".into()))?;
        let chunk = task.get("chunk").and_then(Value::as_str).unwrap_or("");
        let question = task.get("question").and_then(Value::as_str).unwrap_or("");

        let prompt = format!(
            "Summarize the following passage in light of the question \"{question}\":\n\n{chunk}"
        );
        let request = Request {
            messages: vec![Message::user(prompt)],
            tools: Vec::new(),
            config: GenerationConfig::default(),
        };
        let response = self.model.generate(&request, None).await?;
        let summary = response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(NodeOutcome::Commands(vec![Command::new("collect_partial", BTreeMap::new()).with_task_input(Value::String(summary))]))
    }
}

/// The barrier node (§4.G): each arriving partial is appended here, one at a
/// time, so the conditional edge below can count up to `selected_count`
/// instead of seeing the full list on its first invocation.
struct CollectPartialNode;

#[async_trait]
impl GraphNode for CollectPartialNode {
    fn name(&self) -> &str {
        "collect_partial"
    }

    async fn run(&self, _state: &GraphState, task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
        let summary = task_input.cloned().unwrap_or(Value::Null);
        let mut delta = BTreeMap::new();
        delta.insert("partial_summaries".to_string(), Value::Array(vec![summary]));
        Ok(NodeOutcome::Delta(delta))
    }
}

fn barrier_reached(state: &GraphState) -> String {
    let collected = state.get("partial_summaries").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);
    let expected = state.get("selected_count").and_then(Value::as_u64).unwrap_or(0) as usize;
    if expected > 0 && collected >= expected {
        "prepare_reduce".to_string()
    } else {
        END.to_string()
    }
}

struct PrepareReduceNode;

#[async_trait]
impl GraphNode for PrepareReduceNode {
    fn name(&self) -> &str {
        "prepare_reduce"
    }

    async fn run(&self, _state: &GraphState, _task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
        Ok(NodeOutcome::Delta(BTreeMap::new()))
    }
}

struct ReduceJoinNode {
    model: Arc<dyn Model>,
}

#[async_trait]
impl GraphNode for ReduceJoinNode {
    fn name(&self) -> &str {
        "reduce_join"
    }

    async fn run(&self, state: &GraphState, _task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
        let question = state.get("question").and_then(Value::as_str).unwrap_or("");
        let summaries: Vec<String> = state
            .get("partial_summaries")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let prompt = format!(
            "Answer the question \"{question}\" using these partial summaries:\n\n{}",
            summaries.join("\n---\n")
        );
        let request = Request {
            messages: vec![Message::user(prompt)],
            tools: Vec::new(),
            config: GenerationConfig::default(),
        };
        let response = self.model.generate(&request, None).await?;
        let answer = response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        let mut delta = BTreeMap::new();
        delta.insert("final_answer".to_string(), Value::String(answer));
        Ok(NodeOutcome::Delta(delta))
    }
}

struct FinishNode;

#[async_trait]
impl GraphNode for FinishNode {
    fn name(&self) -> &str {
        "finish"
    }

    async fn run(&self, _state: &GraphState, _task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
        Ok(NodeOutcome::Delta(BTreeMap::new()))
    }
}

/// Builds the compiled map-reduce document-summary graph, driven by `model`
/// for both the per-chunk map step and the final reduce step.
pub fn build_document_summary_graph(model: Arc<dyn Model>) -> Result<CompiledGraph, DocumentSummaryError> {
    let graph = GraphBuilder::new(schema())
        .add_node(Arc::new(LoadAndChunkNode))
        .add_node(Arc::new(RetrieveNode))
        .add_node(Arc::new(CreateMapTasksNode))
        .add_node(Arc::new(MapSummarizeNode { model: model.clone() }))
        .add_node(Arc::new(CollectPartialNode))
        .add_node(Arc::new(PrepareReduceNode))
        .add_node(Arc::new(ReduceJoinNode { model }))
        .add_node(Arc::new(FinishNode))
        .add_edge("load_and_chunk", "retrieve")
        .add_edge("retrieve", "create_map_tasks")
        .add_conditional_edge("collect_partial", Arc::new(barrier_reached))
        .add_edge("prepare_reduce", "reduce_join")
        .add_edge("reduce_join", "finish")
        .add_edge("finish", END.to_string())
        .set_entry("load_and_chunk")
        .compile()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::event::{Choice, ObjectKind, Response};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Model for StubModel {
        async fn generate(
            &self,
            request: &Request,
            _chunk_tx: Option<tokio::sync::mpsc::Sender<Response>>,
        ) -> Result<Response, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let content = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Response {
                id: format!("stub-{n}"),
                object: ObjectKind::ChatCompletion,
                created: 0,
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(format!("summary of: {}", &content[..content.len().min(20)])),
                    delta: None,
                }],
                done: true,
                is_partial: false,
                error: None,
            })
        }
    }

    fn initial_state(document_text: &str, chunk_size: u64, overlap: u64, top_k: u64, question: &str) -> BTreeMap<String, Value> {
        let mut initial = BTreeMap::new();
        initial.insert("document_text".to_string(), Value::String(document_text.to_string()));
        initial.insert("chunk_size".to_string(), Value::from(chunk_size));
        initial.insert("overlap".to_string(), Value::from(overlap));
        initial.insert("top_k".to_string(), Value::from(top_k));
        initial.insert("question".to_string(), Value::String(question.to_string()));
        initial
    }

    #[tokio::test]
    async fn map_reduce_document_summary_produces_four_partials_and_an_answer() {
        let model = Arc::new(StubModel { calls: AtomicUsize::new(0) });
        let graph = build_document_summary_graph(model).unwrap();

        let document_text: String = "lorem ipsum dolor sit amet ".repeat(180); // ~5000 chars
        let initial = initial_state(&document_text, 800, 100, 4, "what is this about?");

        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let state = graph.run("inv-1", &[], initial, &tx).await.unwrap();
        drop(tx);

        let mut saw_terminal = false;
        while let Some(event) = rx.recv().await {
            if let Some(response) = &event.response {
                if response.object == ObjectKind::GraphExecution {
                    saw_terminal = true;
                }
            }
        }
        assert!(saw_terminal);

        let partials = state.get("partial_summaries").and_then(Value::as_array).unwrap();
        assert_eq!(partials.len(), 4);
        let answer = state.get("final_answer").and_then(Value::as_str).unwrap();
        assert!(!answer.is_empty());
    }

    #[tokio::test]
    async fn empty_document_fails_retrieve_with_clear_error() {
        let model = Arc::new(StubModel { calls: AtomicUsize::new(0) });
        let graph = build_document_summary_graph(model).unwrap();
        let initial = initial_state("", 800, 100, 4, "anything?");

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let err = graph.run("inv-1", &[], initial, &tx).await.unwrap_err();
        drop(tx);
        while rx.recv().await.is_some() {}
        assert!(err.to_string().contains("no chunks to retrieve from"));
    }

    #[tokio::test]
    async fn barrier_routes_to_end_twice_then_prepare_reduce_once() {
        let prepare_runs = Arc::new(AtomicUsize::new(0));

        struct FanThree;
        #[async_trait]
        impl GraphNode for FanThree {
            fn name(&self) -> &str {
                "fan_three"
            }
            async fn run(&self, _state: &GraphState, _task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
                let mut commands = Vec::new();
                for (i, label) in ["a", "b", "c"].into_iter().enumerate() {
                    let mut command = Command::new("collect_partial", BTreeMap::new()).with_task_input(Value::String(label.into()));
                    if i == 0 {
                        let mut update = BTreeMap::new();
                        update.insert("selected_count".to_string(), Value::from(3));
                        command.update = update;
                    }
                    commands.push(command);
                }
                Ok(NodeOutcome::Commands(commands))
            }
        }

        struct CountingPrepareReduce {
            runs: Arc<AtomicUsize>,
        }
        #[async_trait]
        impl GraphNode for CountingPrepareReduce {
            fn name(&self) -> &str {
                "prepare_reduce"
            }
            async fn run(&self, _state: &GraphState, _task_input: Option<&Value>) -> Result<NodeOutcome, AgentError> {
                self.runs.fetch_add(1, Ordering::SeqCst);
                Ok(NodeOutcome::Delta(BTreeMap::new()))
            }
        }

        let graph = GraphBuilder::new(schema())
            .add_node(Arc::new(FanThree))
            .add_node(Arc::new(CollectPartialNode))
            .add_node(Arc::new(CountingPrepareReduce { runs: prepare_runs.clone() }))
            .add_conditional_edge("collect_partial", Arc::new(barrier_reached))
            .add_edge("prepare_reduce", END.to_string())
            .set_entry("fan_three")
            .compile()
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let state = graph.run("inv-1", &[], BTreeMap::new(), &tx).await.unwrap();
        drop(tx);
        while rx.recv().await.is_some() {}

        assert_eq!(
            state.get("partial_summaries").and_then(Value::as_array).unwrap().len(),
            3
        );
        assert_eq!(prepare_runs.load(Ordering::SeqCst), 1, "prepare_reduce runs exactly once");
    }
}
