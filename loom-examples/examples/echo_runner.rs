//! Minimal end-to-end Runner walkthrough: an echoing `Model` behind an
//! `LlmAgent`, driven by a `Runner` against an in-memory session.

use std::sync::Arc;

use async_trait::async_trait;
use loom::{
    Agent, CallbackRegistry, InMemorySessionService, LlmAgent, Message, Model, ModelRequest,
    Response, Runner, RunOptions, ToolRuntime,
};

struct EchoModel;

#[async_trait]
impl Model for EchoModel {
    async fn generate(
        &self,
        request: &ModelRequest,
        _chunk_tx: Option<tokio::sync::mpsc::Sender<Response>>,
    ) -> Result<Response, loom::AgentError> {
        let reply = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(Response::assistant_final(Message::assistant(format!("echo: {reply}"))))
    }
}

#[tokio::main]
async fn main() {
    let agent = Arc::new(LlmAgent {
        name: "echo".into(),
        description: "echoes the user".into(),
        system_prompt: "be helpful".into(),
        model: Arc::new(EchoModel),
        tools: Arc::new(ToolRuntime::new(Vec::new())),
        callbacks: Arc::new(CallbackRegistry::new()),
        sub_agents: Vec::new(),
    });
    let runner = Runner::new("demo", agent as Arc<dyn Agent>, Arc::new(InMemorySessionService::new()));
    let mut events = runner
        .run("user-1", "session-1", Message::user("hello, world!"), RunOptions::default())
        .await
        .unwrap();
    while let Some(event) = events.recv().await {
        if let Some(response) = &event.response {
            if let Some(choice) = response.choices.first() {
                println!("{}: {}", event.author, choice.message.content);
            }
        }
    }
}
