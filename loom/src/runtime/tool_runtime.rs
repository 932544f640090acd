//! Tool Runtime (component E): the Unary/Streamable/LongRunning tool
//! abstraction and the per-call Before/After-Tool pipeline.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{warn, Instrument};

use super::callback::{CallbackRegistry, HookOutcome, ToolHookContext};
use super::invocation::Invocation;
use crate::error::AgentError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolKind {
    Unary,
    Streamable,
    LongRunning,
}

/// Tool metadata, exposed to the model as part of a Request (§6).
#[derive(Clone, Debug)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub long_running: bool,
    pub is_streamable: bool,
}

impl ToolDeclaration {
    pub fn kind(&self) -> ToolKind {
        if self.long_running {
            ToolKind::LongRunning
        } else if self.is_streamable {
            ToolKind::Streamable
        } else {
            ToolKind::Unary
        }
    }
}

/// The result of one tool invocation, fed back to the model as a tool message.
#[derive(Clone, Debug)]
pub struct ToolResult {
    pub content: Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Value::String(message.into()),
            is_error: true,
        }
    }
}

/// A callable tool. Unary tools implement `call`; streamable tools implement
/// `stream_call` instead (the default `stream_call` wraps `call` as a single
/// chunk, mirroring `LlmClient::invoke_stream`'s single-chunk fallback).
#[async_trait]
pub trait Tool: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    async fn call(&self, args: Value) -> Result<ToolResult, AgentError>;

    /// Default streaming fallback: runs `call` and emits its result as the
    /// one chunk on `chunk_tx`, then returns it.
    async fn stream_call(
        &self,
        args: Value,
        chunk_tx: Option<mpsc::Sender<ToolResult>>,
    ) -> Result<ToolResult, AgentError> {
        let result = self.call(args).await?;
        if let Some(tx) = chunk_tx {
            let _ = tx.send(result.clone()).await;
        }
        Ok(result)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolRuntimeError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("before-tool hook aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Dispatches tool calls by name, running the Before/After-Tool callback
/// chain around each invocation (§4.E).
pub struct ToolRuntime {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRuntime {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self { tools }
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools.iter().map(|t| t.declaration()).collect()
    }

    fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.declaration().name == name)
            .map(|t| t.as_ref())
    }

    /// Invokes `name` with `args`, running the callback chain. For
    /// LongRunning tools, pre-registers a notice channel keyed by
    /// `tool_call_id` before invoking (§4.E step 2) so a suspended agent loop
    /// can later await its resolution via `invocation.add_notice_channel`.
    pub async fn invoke(
        &self,
        callbacks: &CallbackRegistry,
        invocation: &Invocation,
        tool_call_id: &str,
        name: &str,
        mut args: Value,
    ) -> Result<ToolResult, ToolRuntimeError> {
        let Some(tool) = self.find(name) else {
            return Err(ToolRuntimeError::NotFound(name.to_string()));
        };
        let declaration = tool.declaration();

        let before_ctx = ToolHookContext {
            tool_name: name.to_string(),
            args: args.clone(),
        };
        match callbacks.run_before_tool(&before_ctx) {
            HookOutcome::Abort(message) => return Err(ToolRuntimeError::Aborted(message)),
            HookOutcome::Substitute(result) => return Ok(result),
            HookOutcome::Continue => {}
        }
        args = before_ctx.args;

        if declaration.long_running {
            let _handle = invocation.add_notice_channel(tool_call_id);
        }

        let span = tracing::info_span!("tool_call", tool = name, long_running = declaration.long_running);
        let call_result = tool.call(args.clone()).instrument(span).await;
        let (result, err_message) = match call_result {
            Ok(r) => (Some(r), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let after_ctx = ToolHookContext {
            tool_name: name.to_string(),
            args,
        };
        let result = match callbacks.run_after_tool(&after_ctx, result.as_ref(), err_message.as_deref()) {
            HookOutcome::Substitute(replacement) => Some(replacement),
            _ => result,
        };

        match (result, err_message) {
            (Some(r), _) => Ok(r),
            (None, Some(msg)) => {
                warn!(tool = name, error = %msg, "tool call failed");
                Ok(ToolResult::error(msg))
            }
            (None, None) => unreachable!("tool call produced neither a result nor an error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::event::Message;
    use crate::runtime::invocation::RunOptions;
    use crate::runtime::session::SessionKey;

    struct AddOneTool;

    #[async_trait]
    impl Tool for AddOneTool {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration {
                name: "add_one".into(),
                description: "adds one to the input number".into(),
                input_schema: serde_json::json!({"type": "object", "properties": {"n": {"type": "integer"}}, "required": ["n"]}),
                output_schema: serde_json::json!({"type": "integer"}),
                long_running: false,
                is_streamable: false,
            }
        }

        async fn call(&self, args: Value) -> Result<ToolResult, AgentError> {
            let n = args["n"].as_i64().ok_or_else(|| AgentError::InvalidArguments("n".into()))?;
            Ok(ToolResult::ok(Value::from(n + 1)))
        }
    }

    struct TicketTool;

    #[async_trait]
    impl Tool for TicketTool {
        fn declaration(&self) -> ToolDeclaration {
            ToolDeclaration {
                name: "request_approval".into(),
                description: "requests human approval".into(),
                input_schema: serde_json::json!({}),
                output_schema: serde_json::json!({}),
                long_running: true,
                is_streamable: false,
            }
        }

        async fn call(&self, _args: Value) -> Result<ToolResult, AgentError> {
            Ok(ToolResult::ok(serde_json::json!({"status": "pending", "ticket_id": "t-1"})))
        }
    }

    fn test_invocation() -> Invocation {
        Invocation::new(
            SessionKey::new("app", "u1", "s1"),
            "root",
            Message::user("hi"),
            RunOptions::default(),
        )
    }

    #[tokio::test]
    async fn unary_tool_call_returns_result() {
        let runtime = ToolRuntime::new(vec![Box::new(AddOneTool)]);
        let callbacks = CallbackRegistry::new();
        let invocation = test_invocation();
        let result = runtime
            .invoke(&callbacks, &invocation, "call-1", "add_one", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(result.content, Value::from(2));
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn unknown_tool_returns_not_found() {
        let runtime = ToolRuntime::new(vec![Box::new(AddOneTool)]);
        let callbacks = CallbackRegistry::new();
        let invocation = test_invocation();
        let err = runtime
            .invoke(&callbacks, &invocation, "call-1", "missing", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolRuntimeError::NotFound(_)));
    }

    #[tokio::test]
    async fn before_tool_substitute_short_circuits_call() {
        let runtime = ToolRuntime::new(vec![Box::new(AddOneTool)]);
        let mut callbacks = CallbackRegistry::new();
        callbacks.on_before_tool(|_ctx| HookOutcome::Substitute(ToolResult::ok(Value::String("short-circuited".into()))));
        let invocation = test_invocation();
        let result = runtime
            .invoke(&callbacks, &invocation, "call-1", "add_one", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(result.content, Value::String("short-circuited".into()));
    }

    #[tokio::test]
    async fn long_running_tool_registers_notice_channel() {
        let runtime = ToolRuntime::new(vec![Box::new(TicketTool)]);
        let callbacks = CallbackRegistry::new();
        let invocation = test_invocation();
        let result = runtime
            .invoke(&callbacks, &invocation, "call-1", "request_approval", Value::Null)
            .await
            .unwrap();
        assert_eq!(result.content["status"], Value::String("pending".into()));
        invocation.notify_completion("call-1");
        let handle = invocation.add_notice_channel("call-1");
        let _ = handle.wait().await;
    }

    #[tokio::test]
    async fn invalid_arguments_surface_as_tool_error_result() {
        let runtime = ToolRuntime::new(vec![Box::new(AddOneTool)]);
        let callbacks = CallbackRegistry::new();
        let invocation = test_invocation();
        let result = runtime
            .invoke(&callbacks, &invocation, "call-1", "add_one", serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.is_error);
    }
}
