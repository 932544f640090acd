//! Core error type shared by nodes, agents, and the LLM client trait.
//!
//! Most call sites only ever construct `AgentError::ExecutionFailed`; the other
//! variants exist so that graph/tool/model failures keep their own identity
//! instead of collapsing into one string.

use thiserror::Error;

/// Error returned by `Node::run`, `LlmClient::invoke`, and agent runners.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A node, tool, or model call failed; the string is the underlying cause.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A tool call referenced a tool name not present in the registry/source.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Arguments for a tool call did not parse or did not satisfy the schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The run was cancelled before completion.
    #[error("cancelled")]
    Cancelled,
}
