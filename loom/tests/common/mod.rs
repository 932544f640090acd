//! Shared fixtures for the integration tests: deterministic `Model`
//! implementations and small tool stand-ins, grounded on the crate's own
//! `EchoModel` test fixture but defined here since `#[cfg(test)]` items
//! aren't visible to these external test binaries.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use loom::{AgentError, Message, Model, ModelRequest, Response};
use tokio::sync::mpsc;

/// Echoes the last user message back, prefixed, and never requests tools.
pub struct EchoModel;

#[async_trait]
impl Model for EchoModel {
    async fn generate(
        &self,
        request: &ModelRequest,
        _chunk_tx: Option<mpsc::Sender<Response>>,
    ) -> Result<Response, AgentError> {
        let content = request
            .messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(Response::assistant_final(Message::assistant(format!("Hello! I received: {content}"))))
    }
}

/// Replays a fixed sequence of responses, one per `generate` call; calls past
/// the end of the script repeat the last entry.
pub struct ScriptedModel {
    turns: Vec<Response>,
    next: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(turns: Vec<Response>) -> Self {
        Self {
            turns,
            next: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Model for ScriptedModel {
    async fn generate(
        &self,
        _request: &ModelRequest,
        _chunk_tx: Option<mpsc::Sender<Response>>,
    ) -> Result<Response, AgentError> {
        let idx = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .turns
            .get(idx)
            .or_else(|| self.turns.last())
            .cloned()
            .unwrap_or_else(|| Response::assistant_final(Message::assistant(""))))
    }
}
