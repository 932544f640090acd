//! Model interface (§6 External Interfaces): the Generate contract consumed
//! by the LLM Agent. Grounded on [`crate::llm::LlmClient`]'s invoke/stream
//! split, generalized to the runtime's `Request`/`Response` shapes (a
//! `Request` carries tool declarations and generation config; a `Response`
//! chunk is either a partial streaming delta or the final non-partial turn).

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::event::{Message, Response};
use super::tool_runtime::ToolDeclaration;
use crate::error::AgentError;

#[derive(Clone, Debug, Default)]
pub struct GenerationConfig {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stream: bool,
    pub profile: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Request {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDeclaration>,
    pub config: GenerationConfig,
}

/// Consumed by the LLM Agent (§4.F). A non-partial chunk terminates the stream.
#[async_trait]
pub trait Model: Send + Sync {
    /// Generates one turn. When `chunk_tx` is `Some`, implementations stream
    /// partial chunks (`is_partial = true`) before sending the final,
    /// non-partial `Response`. The final response is always returned, whether
    /// or not streaming was requested.
    async fn generate(
        &self,
        request: &Request,
        chunk_tx: Option<mpsc::Sender<Response>>,
    ) -> Result<Response, AgentError>;
}

/// Deterministic model used by agent-loop tests: echoes the last user
/// message back as the assistant turn, never requests tool calls.
#[cfg(test)]
pub struct EchoModel;

#[cfg(test)]
#[async_trait]
impl Model for EchoModel {
    async fn generate(
        &self,
        request: &Request,
        _chunk_tx: Option<mpsc::Sender<Response>>,
    ) -> Result<Response, AgentError> {
        use crate::runtime::event::{Choice, ObjectKind};

        let content = request
            .messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content.clone())
            .unwrap_or_default();
        // Never streams partial chunks; the caller always gets the final turn
        // from the return value, so `chunk_tx` is left untouched.
        Ok(Response {
            id: "echo-1".into(),
            object: ObjectKind::ChatCompletion,
            created: 0,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content),
                delta: None,
            }],
            done: true,
            is_partial: false,
            error: None,
        })
    }
}
