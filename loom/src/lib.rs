//! # Loom
//!
//! The Invocation Runtime: a scheduler that turns a single user request into
//! an ordered, observable stream of events, while maintaining session
//! consistency, coordinating parallel sub-computations (fan-out map-reduce,
//! parallel sub-agents), mediating tool execution (including human-in-the-loop
//! long-running tools), and enforcing completion ordering between the event
//! producer (agent) and the event consumer (session persistence).
//!
//! ## Main modules
//!
//! - [`runtime::event`]: [`Event`], [`Message`], [`Response`] — the immutable record of one
//!   step in an invocation.
//! - [`runtime::session`]: [`SessionService`] and its [`InMemorySessionService`]/
//!   [`SqliteSessionService`] backends — append-only per-session event log.
//! - [`runtime::invocation`]: [`Invocation`], [`RunOptions`] — per-request context.
//! - [`runtime::callback`]: [`CallbackRegistry`] — Before/After hook chains for Agent, Model, Tool.
//! - [`runtime::model`]: the [`Model`] trait agents drive.
//! - [`runtime::tool_runtime`]: [`Tool`], [`ToolRuntime`] — tool dispatch with the long-running
//!   rendezvous protocol.
//! - [`runtime::agent`]: [`Agent`], [`LlmAgent`], [`GraphAgent`] — the Model↔Tool loop and the
//!   graph-driven agent.
//! - [`runtime::graph_exec`]: [`GraphBuilder`], [`CompiledGraph`] — the state-graph interpreter
//!   with conditional edges, fan-out commands, and reducer-based state merge.
//! - [`runtime::chunking`]: text chunking used by map-reduce document workflows.
//! - [`runtime::doc_summary`]: the canonical map-reduce document-summary graph.
//! - [`runtime::runner`]: [`Runner`] — the outer driver tying session, invocation, and agent together.
//! - [`runtime::a2a`]: [`A2ADelegationTool`] — exposes a remote agent's skill as a local tool.
//!
//! Key types are re-exported at crate root.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loom::{Agent, InMemorySessionService, LlmAgent, Message, Model, ModelRequest, Response, Runner, RunOptions, ToolRuntime};
//! use async_trait::async_trait;
//!
//! struct EchoModel;
//!
//! #[async_trait]
//! impl Model for EchoModel {
//!     async fn generate(
//!         &self,
//!         request: &ModelRequest,
//!         _chunk_tx: Option<tokio::sync::mpsc::Sender<Response>>,
//!     ) -> Result<Response, loom::AgentError> {
//!         let reply = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
//!         Ok(Response::assistant_final(Message::assistant(format!("echo: {reply}"))))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let agent = Arc::new(LlmAgent {
//!     name: "echo".into(),
//!     description: "echoes the user".into(),
//!     system_prompt: "be helpful".into(),
//!     model: Arc::new(EchoModel),
//!     tools: Arc::new(ToolRuntime::new(Vec::new())),
//!     callbacks: Arc::new(loom::CallbackRegistry::new()),
//!     sub_agents: Vec::new(),
//! });
//! let runner = Runner::new("demo", agent as Arc<dyn Agent>, Arc::new(InMemorySessionService::new()));
//! let mut events = runner
//!     .run("user-1", "session-1", Message::user("hello, world!"), RunOptions::default())
//!     .await
//!     .unwrap();
//! while let Some(event) = events.recv().await {
//!     let _ = event;
//! }
//! # }
//! ```
//!
//! Run the example: `cargo run -p loom-examples --example echo_runner`.

pub mod error;
pub mod runtime;

pub use error::AgentError;
pub use runtime::{
    a2a::A2ADelegationTool,
    agent::{Agent, GraphAgent, LlmAgent},
    callback::{AgentHookContext, CallbackRegistry, HookOutcome, ModelHookContext, ToolHookContext},
    chunking::{chunk_text, ChunkingError},
    doc_summary::{build_document_summary_graph, DocumentSummaryError},
    event::{Choice, Event, Message, ObjectKind, Response, Role, ToolCall},
    graph_exec::{
        Command, CompiledGraph, GraphBuilder, GraphCompileError, GraphNode, GraphState,
        NodeOutcome, Reducer, Schema, END,
    },
    invocation::{Invocation, InvocationError, RunOptions},
    model::{GenerationConfig, Model, Request as ModelRequest},
    notice::{NoticeHandle, NoticeRegistry},
    runner::{Runner, RunnerError},
    session::{
        InMemorySessionService, Session, SessionError, SessionKey, SessionService,
        SqliteSessionService, Summary,
    },
    tool_runtime::{Tool, ToolDeclaration, ToolKind, ToolResult, ToolRuntime, ToolRuntimeError},
};
