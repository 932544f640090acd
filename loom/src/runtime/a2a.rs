//! A2A Delegation Tool (component J): exposes a remote agent's skill as an
//! ordinary tool. `call` fetches the peer's agent card, opens a streaming
//! request to its run endpoint, forwards the remote event stream, and
//! returns the assembled final content as the tool result.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tool_runtime::{Tool, ToolDeclaration, ToolResult};
use crate::error::AgentError;

/// The A2A agent-card wire shape (§6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub version: String,
    pub provider: Provider,
    pub capabilities: Capabilities,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    pub skills: Vec<Skill>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Provider {
    pub organization: String,
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub push_notifications: bool,
    pub state_transition_history: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum A2AError {
    #[error("fetching agent card from {url}: {source}")]
    CardFetch { url: String, source: reqwest::Error },
    #[error("decoding agent card: {0}")]
    CardDecode(String),
    #[error("remote run request failed: {0}")]
    RunRequest(String),
}

impl From<A2AError> for AgentError {
    fn from(err: A2AError) -> Self {
        AgentError::ExecutionFailed(err.to_string())
    }
}

/// Discovers and calls a single remote agent's skill over HTTP+SSE.
pub struct A2ADelegationTool {
    pub skill_name: String,
    pub skill_description: String,
    pub agent_url: String,
    client: reqwest::Client,
}

impl A2ADelegationTool {
    pub fn new(skill_name: impl Into<String>, skill_description: impl Into<String>, agent_url: impl Into<String>) -> Self {
        Self {
            skill_name: skill_name.into(),
            skill_description: skill_description.into(),
            agent_url: agent_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Fetches the peer's agent card for discovery purposes (§6 A2A wire interface).
    pub async fn fetch_agent_card(&self) -> Result<AgentCard, A2AError> {
        let url = format!("{}/.well-known/agent.json", self.agent_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| A2AError::CardFetch { url: url.clone(), source })?;
        response
            .json::<AgentCard>()
            .await
            .map_err(|e| A2AError::CardDecode(e.to_string()))
    }

    /// Opens a streaming run request, folding SSE `data:` lines into a single
    /// assembled text content. A real SSE payload may itself be structured
    /// JSON per chunk; this tool treats each `data:` line as plain text and
    /// concatenates them, since the remote's own event schema is opaque to
    /// the delegating agent beyond "final assembled content" (§4.J).
    async fn run_remote(&self, input: &str) -> Result<String, A2AError> {
        let response = self
            .client
            .post(format!("{}/run", self.agent_url.trim_end_matches('/')))
            .json(&serde_json::json!({ "input": input, "stream": true }))
            .send()
            .await
            .map_err(|e| A2AError::RunRequest(e.to_string()))?;

        let mut stream = response.bytes_stream();
        let mut assembled = String::new();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| A2AError::RunRequest(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buffer.find("\n\n") {
                let event = buffer[..pos].to_string();
                buffer.drain(..pos + 2);
                for line in event.lines() {
                    if let Some(data) = line.strip_prefix("data: ") {
                        assembled.push_str(data);
                    }
                }
            }
        }
        Ok(assembled)
    }
}

#[async_trait]
impl Tool for A2ADelegationTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.skill_name.clone(),
            description: self.skill_description.clone(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "input": { "type": "string" } },
                "required": ["input"],
            }),
            output_schema: serde_json::json!({ "type": "string" }),
            long_running: false,
            is_streamable: true,
        }
    }

    async fn call(&self, args: Value) -> Result<ToolResult, AgentError> {
        let input = args["input"]
            .as_str()
            .ok_or_else(|| AgentError::InvalidArguments("input".into()))?;
        let content = self.run_remote(input).await?;
        Ok(ToolResult::ok(Value::String(content)))
    }
}
