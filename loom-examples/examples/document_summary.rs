//! Map-reduce document summary: chunk a document, summarize each chunk in
//! parallel, and combine the partial summaries into a final answer.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use loom::{build_document_summary_graph, Agent, GraphAgent, InMemorySessionService, Message, Model, ModelRequest, ObjectKind, Response, Runner, RunOptions};
use serde_json::Value;

struct SummarizingModel;

#[async_trait]
impl Model for SummarizingModel {
    async fn generate(
        &self,
        request: &ModelRequest,
        _chunk_tx: Option<tokio::sync::mpsc::Sender<Response>>,
    ) -> Result<Response, loom::AgentError> {
        let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let summary = prompt.lines().next().unwrap_or("").chars().take(80).collect::<String>();
        Ok(Response::assistant_final(Message::assistant(summary)))
    }
}

#[tokio::main]
async fn main() {
    let graph = Arc::new(build_document_summary_graph(Arc::new(SummarizingModel)).unwrap());
    let agent = Arc::new(GraphAgent {
        name: "doc_summary".into(),
        description: "map-reduce document QA".into(),
        graph,
    });

    let document_text = "Loom is a runtime for composing agents out of models, tools, and graphs. "
        .repeat(120);

    let mut runtime_state = BTreeMap::new();
    runtime_state.insert("document_text".to_string(), Value::String(document_text));
    runtime_state.insert("chunk_size".to_string(), Value::from(400));
    runtime_state.insert("overlap".to_string(), Value::from(50));
    runtime_state.insert("top_k".to_string(), Value::from(3));
    runtime_state.insert(
        "question".to_string(),
        Value::String("What does Loom compose agents out of?".to_string()),
    );

    let options = RunOptions {
        runtime_state,
        ..RunOptions::default()
    };

    let runner = Runner::new("demo", agent as Arc<dyn Agent>, Arc::new(InMemorySessionService::new()));
    let mut events = runner
        .run(
            "user-1",
            "session-1",
            Message::user("What does Loom compose agents out of?"),
            options,
        )
        .await
        .unwrap();

    while let Some(event) = events.recv().await {
        if let Some(response) = &event.response {
            if response.object == ObjectKind::GraphExecution {
                if let Some(state) = &event.state_delta {
                    if let Some(answer) = state.get("final_answer").and_then(Value::as_str) {
                        println!("final answer: {answer}");
                    }
                }
            }
        }
    }
}
