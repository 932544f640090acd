//! Map-reduce document-summary scenario driven end-to-end through the
//! Runner and a `GraphAgent` wrapping `build_document_summary_graph` (S6).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use loom::{
    build_document_summary_graph, Agent, GraphAgent, InMemorySessionService, Message, Model,
    ModelRequest, ObjectKind, Response, Runner, RunOptions, SessionKey, SessionService,
};
use serde_json::Value;
use tokio::sync::mpsc;

struct SummarizingModel {
    calls: AtomicUsize,
}

#[async_trait]
impl Model for SummarizingModel {
    async fn generate(
        &self,
        request: &ModelRequest,
        _chunk_tx: Option<mpsc::Sender<Response>>,
    ) -> Result<Response, loom::AgentError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let content = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(Response::assistant_final(Message::assistant(format!(
            "answer #{n} grounded in {} chars of context",
            content.len()
        ))))
    }
}

#[tokio::test]
async fn s6_map_reduce_document_qa_via_runner() {
    let model = Arc::new(SummarizingModel { calls: AtomicUsize::new(0) });
    let graph = Arc::new(build_document_summary_graph(model).unwrap());

    let agent = Arc::new(GraphAgent {
        name: "doc_summary".into(),
        description: "map-reduce document QA".into(),
        graph,
    });

    let document_text: String = "lorem ipsum dolor sit amet consectetur adipiscing elit ".repeat(90); // ~5000 chars
    assert!(document_text.len() > 4900 && document_text.len() < 5100);

    let mut runtime_state = BTreeMap::new();
    runtime_state.insert("document_text".to_string(), Value::String(document_text));
    runtime_state.insert("chunk_size".to_string(), Value::from(800));
    runtime_state.insert("overlap".to_string(), Value::from(100));
    runtime_state.insert("top_k".to_string(), Value::from(4));
    runtime_state.insert("question".to_string(), Value::String("What is this document about?".to_string()));

    let options = RunOptions {
        runtime_state,
        ..RunOptions::default()
    };

    let sessions = Arc::new(InMemorySessionService::new());
    let runner = Runner::new("app", agent as Arc<dyn Agent>, sessions.clone());
    let mut rx = runner
        .run("u1", "s1", Message::user("What is this document about?"), options)
        .await
        .unwrap();

    let mut completion_state: Option<BTreeMap<String, Value>> = None;
    let mut saw_graph_terminal = false;
    while let Some(event) = rx.recv().await {
        if let Some(response) = &event.response {
            match response.object {
                ObjectKind::GraphExecution => saw_graph_terminal = true,
                ObjectKind::RunnerCompletion => completion_state = event.state_delta.clone(),
                _ => {}
            }
        }
    }
    assert!(saw_graph_terminal, "graph execution must emit a terminal event");

    let key = SessionKey::new("app", "u1", "s1");
    let session = sessions.get_session(&key).await.unwrap();
    let terminal_state = session
        .events
        .iter()
        .filter(|e| {
            e.response
                .as_ref()
                .map(|r| r.object == ObjectKind::GraphExecution)
                .unwrap_or(false)
        })
        .last()
        .and_then(|e| e.state_delta.clone())
        .expect("graph execution event must carry the final state");

    let partials = terminal_state
        .get("partial_summaries")
        .and_then(Value::as_array)
        .expect("partial_summaries must be present");
    assert_eq!(partials.len(), 4, "top_k=4 retrieved chunks must produce four partial summaries");

    let final_answer = terminal_state
        .get("final_answer")
        .and_then(Value::as_str)
        .expect("final_answer must be present");
    assert!(!final_answer.is_empty());

    let completion_state = completion_state.expect("runner.completion must carry a state delta");
    assert_eq!(
        completion_state.get("final_answer").and_then(Value::as_str),
        Some(final_answer),
        "runner-completion must carry the same final answer as the graph terminal"
    );
}
