//! Invocation (component C): the per-`Run` call context threaded through
//! agents, tools, and the graph executor.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::event::Message;
use super::notice::{NoticeHandle, NoticeRegistry};
use super::session::SessionKey;

/// Per-run knobs controlling history, iteration bounds, and output channel sizing.
#[derive(Clone, Debug)]
pub struct RunOptions {
    /// Replaces session history for this run without persisting it twice;
    /// consumed by the Runner's seeding step (§4.H step 3).
    pub history_override: Option<Vec<Message>>,
    /// Extra state visible to the first graph wave, merged under `defaults(schema)`.
    pub runtime_state: BTreeMap<String, Value>,
    /// Bound on Model↔Tool round trips in the LLM agent loop (§4.F).
    pub max_tool_iterations: usize,
    /// Bound on the agent-output channel (§5 Backpressure).
    pub output_channel_capacity: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            history_override: None,
            runtime_state: BTreeMap::new(),
            max_tool_iterations: 10,
            output_channel_capacity: 32,
        }
    }
}

/// Identifies one `Run` call. Exclusively owned by the Runner for the call's
/// duration; embedded into the request context so tools (e.g. the A2A
/// delegation tool) can retrieve it.
pub struct Invocation {
    pub id: String,
    pub session_key: SessionKey,
    pub agent_name: String,
    pub message: Message,
    pub options: RunOptions,
    pub cancellation: CancellationToken,
    notices: Arc<NoticeRegistry>,
}

impl Invocation {
    pub fn new(
        session_key: SessionKey,
        agent_name: impl Into<String>,
        message: Message,
        options: RunOptions,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_key,
            agent_name: agent_name.into(),
            message,
            options,
            cancellation: CancellationToken::new(),
            notices: Arc::new(NoticeRegistry::new()),
        }
    }

    /// Registers (or rejoins) interest in `key`'s completion signal.
    pub fn add_notice_channel(&self, key: impl Into<String>) -> NoticeHandle {
        self.notices.wait(key)
    }

    /// Signals `key`'s completion. Safe to call before `add_notice_channel`.
    pub fn notify_completion(&self, key: impl Into<String>) {
        self.notices.signal(key, Value::Null);
    }

    /// Drains all outstanding notice channels, releasing any blocked producer.
    /// Called when the event stream terminates, normally or on cancellation.
    pub fn cleanup_notice(&self) {
        self.notices.cleanup();
    }

    pub fn notices(&self) -> Arc<NoticeRegistry> {
        self.notices.clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("session setup failed: {0}")]
    SessionSetup(String),
    #[error("history seeding failed: {0}")]
    SeedingFailed(String),
}
