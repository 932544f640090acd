//! Event & Message model (invocation runtime component A).
//!
//! `Event` is the streaming unit the rest of the runtime passes around: one
//! record per model chunk, tool call, tool response, state delta, error, or
//! completion. Events are immutable once constructed — every field is set at
//! construction time via the `Event::*` constructors below, not mutated after.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A turn of conversation. Value type: cheap to clone, compared by field equality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `role == Tool`: the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_id: None,
        }
    }

    pub fn tool(tool_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_id: Some(tool_id.into()),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Function,
}

/// One tool call requested by a model turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Opaque JSON arguments, parsed by the tool runtime before dispatch.
    pub arguments: Value,
}

/// Discriminator for `Response::object`. Mirrors the wire values named in the
/// external interfaces (§6): `chat.completion` family plus the two terminal
/// kinds the Graph Executor and Runner emit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    ChatCompletion,
    ChatCompletionChunk,
    ChatCompletionError,
    GraphExecution,
    RunnerCompletion,
}

/// One choice within a `Response`: an index plus the message (or streaming delta).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
}

/// One model reply envelope, or a terminal runner/graph envelope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub object: ObjectKind,
    pub created: u64,
    pub choices: Vec<Choice>,
    pub done: bool,
    pub is_partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// A `Response` is *qualifying* (§4.A) when it is a finished, non-partial
    /// turn with at least one choice.
    pub fn is_qualifying(&self) -> bool {
        self.done && !self.is_partial && !self.choices.is_empty()
    }

    /// Builds a single-choice, non-partial, done `chat.completion` response —
    /// the common case for a `Model` that never streams chunks.
    pub fn assistant_final(message: Message) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            object: ObjectKind::ChatCompletion,
            created: now_millis(),
            choices: vec![Choice {
                index: 0,
                message,
                delta: None,
            }],
            done: true,
            is_partial: false,
            error: None,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The streaming unit produced by agents and consumed by the Runner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    /// Agent name, or `"user"` for the event the Runner appends on the caller's behalf.
    pub author: String,
    pub timestamp: u64,
    /// Hierarchical path identifying the originating sub-agent, e.g. `["root", "researcher"]`.
    pub branch: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    /// Opaque per-key state updates; `None` means this event carries no state delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_delta: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter_key: String,
    #[serde(default)]
    pub requires_completion: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub long_running_tool_ids: BTreeSet<String>,
}

impl Event {
    fn base(invocation_id: &str, author: &str, branch: &[String]) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id: invocation_id.to_string(),
            author: author.to_string(),
            timestamp: now_millis(),
            branch: branch.to_vec(),
            response: None,
            state_delta: None,
            filter_key: String::new(),
            requires_completion: false,
            long_running_tool_ids: BTreeSet::new(),
        }
    }

    /// Constructs an event wrapping a model `Response`.
    pub fn from_response(invocation_id: &str, author: &str, branch: &[String], response: Response) -> Self {
        let mut event = Self::base(invocation_id, author, branch);
        event.response = Some(response);
        event
    }

    /// Constructs an event carrying only a state delta (no response), as emitted
    /// by Graph Executor nodes between waves.
    pub fn from_state_delta(
        invocation_id: &str,
        author: &str,
        branch: &[String],
        delta: BTreeMap<String, Value>,
    ) -> Self {
        let mut event = Self::base(invocation_id, author, branch);
        event.state_delta = Some(delta);
        event
    }

    /// Constructs an error event (`object = chat.completion.error`).
    pub fn error(invocation_id: &str, author: &str, branch: &[String], message: impl Into<String>) -> Self {
        let response = Response {
            id: uuid::Uuid::new_v4().to_string(),
            object: ObjectKind::ChatCompletionError,
            created: now_millis(),
            choices: Vec::new(),
            done: true,
            is_partial: false,
            error: Some(message.into()),
        };
        Self::from_response(invocation_id, author, branch, response)
    }

    pub fn with_filter_key(mut self, key: impl Into<String>) -> Self {
        self.filter_key = key.into();
        self
    }

    pub fn with_requires_completion(mut self, v: bool) -> Self {
        self.requires_completion = v;
        self
    }

    pub fn with_long_running_tool_id(mut self, id: impl Into<String>) -> Self {
        self.long_running_tool_ids.insert(id.into());
        self
    }

    /// An event is *final* (§4.A) when its response is a non-partial, `done`
    /// choice-bearing turn, or it carries a state delta, or it is one of the
    /// terminal object kinds.
    pub fn is_final(&self) -> bool {
        if self.state_delta.is_some() {
            return true;
        }
        match &self.response {
            Some(r) => {
                r.is_qualifying()
                    || matches!(r.object, ObjectKind::GraphExecution | ObjectKind::RunnerCompletion)
            }
            None => false,
        }
    }

    /// A *qualifying* event (§4.B) is persisted by the Session Service.
    pub fn is_qualifying(&self) -> bool {
        self.is_final()
    }
}
