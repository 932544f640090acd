//! Agent (component F): the single interface every runnable unit satisfies
//! — a plain `LlmAgent` running the Model↔Tool loop, or a `GraphAgent`
//! wrapping a compiled [`super::graph_exec::CompiledGraph`]. Sub-agent
//! delegation (§4.F "Sub-agent protocol") works because both share this
//! trait: an `LlmAgent` may hold other `Arc<dyn Agent>`s as sub-agents and
//! expose them as ordinary tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info_span, warn, Instrument};

use super::callback::{AgentHookContext, CallbackRegistry, HookOutcome, ModelHookContext};
use super::event::{Event, Message};
use super::graph_exec::CompiledGraph;
use super::invocation::Invocation;
use super::model::{GenerationConfig, Model, Request};
use super::tool_runtime::ToolRuntime;
use crate::error::AgentError;

#[derive(Clone, Debug)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
}

/// The single interface every runnable agent satisfies (`Info`, `Run`,
/// `SubAgents`, `FindSubAgent`, `Tools` per the design notes).
#[async_trait]
pub trait Agent: Send + Sync {
    fn info(&self) -> AgentInfo;

    /// Runs the agent for one invocation, returning a receiver of events.
    /// The agent task closes the channel when it finishes (tool-call loop
    /// exhausted, iteration cap hit, or the graph reaches no active nodes).
    async fn run(self: Arc<Self>, invocation: Arc<Invocation>) -> mpsc::Receiver<Event>;

    fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &[]
    }

    fn find_sub_agent(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.sub_agents().iter().find(|a| a.info().name == name).cloned()
    }
}

/// An LLM-driven agent running the Model↔Tool loop (§4.F).
pub struct LlmAgent {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub model: Arc<dyn Model>,
    pub tools: Arc<ToolRuntime>,
    pub callbacks: Arc<CallbackRegistry>,
    pub sub_agents: Vec<Arc<dyn Agent>>,
}

impl LlmAgent {
    fn history(&self, invocation: &Invocation) -> Vec<Message> {
        let mut messages = vec![Message::system(&self.system_prompt)];
        if let Some(history) = &invocation.options.history_override {
            messages.extend(history.iter().cloned());
        }
        messages.push(invocation.message.clone());
        messages
    }

    async fn run_loop(self: Arc<Self>, invocation: Arc<Invocation>, tx: mpsc::Sender<Event>) {
        let branch = vec![self.name.clone()];
        let mut history = self.history(&invocation);
        let mut final_error: Option<String> = None;

        let agent_ctx = AgentHookContext {
            agent_name: self.name.clone(),
            invocation_id: invocation.id.clone(),
        };
        if let HookOutcome::Abort(message) = self.callbacks.run_before_agent(&agent_ctx) {
            let _ = tx
                .send(Event::error(&invocation.id, &self.name, &branch, message))
                .await;
            return;
        }

        let mut exhausted_cap = true;
        for _ in 0..invocation.options.max_tool_iterations {
            if invocation.cancellation.is_cancelled() {
                let _ = tx
                    .send(Event::error(&invocation.id, &self.name, &branch, "cancelled"))
                    .await;
                exhausted_cap = false;
                break;
            }

            let request = Request {
                messages: history.clone(),
                tools: self.tools.declarations(),
                config: GenerationConfig {
                    stream: true,
                    ..Default::default()
                },
            };

            let model_ctx = ModelHookContext {
                request: serde_json::to_value(&request.messages).unwrap_or(Value::Null),
            };
            if let HookOutcome::Abort(message) = self.callbacks.run_before_model(&model_ctx) {
                final_error = Some(message);
                exhausted_cap = false;
                break;
            }

            let (chunk_tx, mut chunk_rx) = mpsc::channel(8);
            let forward_tx = tx.clone();
            let invocation_id = invocation.id.clone();
            let author = self.name.clone();
            let forward_branch = branch.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(chunk) = chunk_rx.recv().await {
                    let event = Event::from_response(&invocation_id, &author, &forward_branch, chunk);
                    let _ = forward_tx.send(event).await;
                }
            });

            let span = info_span!("model_generate", agent = %self.name, invocation_id = %invocation.id);
            let result = self.model.generate(&request, Some(chunk_tx)).instrument(span).await;
            let _ = forwarder.await;

            let final_response = match result {
                Ok(response) => response,
                Err(err) => {
                    self.callbacks.run_after_model(&model_ctx, None, Some(&err.to_string()));
                    let _ = tx
                        .send(Event::error(&invocation.id, &self.name, &branch, err.to_string()))
                        .await;
                    final_error = Some(err.to_string());
                    exhausted_cap = false;
                    break;
                }
            };

            self.callbacks.run_after_model(&model_ctx, Some(&final_response), None);

            let assistant_message = final_response
                .choices
                .first()
                .map(|c| c.message.clone())
                .unwrap_or_else(|| Message::assistant(""));
            let tool_calls = assistant_message.tool_calls.clone();

            let event = Event::from_response(&invocation.id, &self.name, &branch, final_response);
            let _ = tx.send(event).await;
            history.push(assistant_message);

            if tool_calls.is_empty() {
                exhausted_cap = false;
                break;
            }

            let mut suspended = false;
            for call in &tool_calls {
                let result = self
                    .tools
                    .invoke(&self.callbacks, &invocation, &call.id, &call.name, call.arguments.clone())
                    .await;

                let (tool_message, long_running_id) = match result {
                    Ok(outcome) => {
                        let declaration = self.tools.declarations().into_iter().find(|d| d.name == call.name);
                        let is_long_running = declaration.map(|d| d.long_running).unwrap_or(false);
                        let content = outcome.content.to_string();
                        (
                            Message::tool(call.id.clone(), content),
                            is_long_running.then(|| call.id.clone()),
                        )
                    }
                    Err(err) => {
                        warn!(tool = %call.name, error = %err, "tool invocation failed");
                        (Message::tool(call.id.clone(), err.to_string()), None)
                    }
                };

                history.push(tool_message.clone());
                let mut tool_event = Event::from_response(
                    &invocation.id,
                    &self.name,
                    &branch,
                    super::event::Response {
                        id: uuid::Uuid::new_v4().to_string(),
                        object: super::event::ObjectKind::ChatCompletion,
                        created: 0,
                        choices: vec![super::event::Choice {
                            index: 0,
                            message: tool_message,
                            delta: None,
                        }],
                        done: true,
                        is_partial: false,
                        error: None,
                    },
                );
                if let Some(id) = &long_running_id {
                    tool_event = tool_event.with_long_running_tool_id(id.clone());
                    suspended = true;
                }
                let _ = tx.send(tool_event).await;
            }

            if suspended {
                exhausted_cap = false;
                break;
            }
        }

        if exhausted_cap {
            let message = "max tool iterations reached";
            let _ = tx
                .send(Event::error(&invocation.id, &self.name, &branch, message))
                .await;
            final_error = Some(message.to_string());
        }

        self.callbacks.run_after_agent(&agent_ctx, None, final_error.as_deref());
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn info(&self) -> AgentInfo {
        AgentInfo {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    async fn run(self: Arc<Self>, invocation: Arc<Invocation>) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(invocation.options.output_channel_capacity);
        tokio::spawn(self.run_loop(invocation, tx));
        rx
    }

    fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &self.sub_agents
    }
}

/// An agent whose `run` delegates entirely to a compiled graph (§4.G).
pub struct GraphAgent {
    pub name: String,
    pub description: String,
    pub graph: Arc<CompiledGraph>,
}

#[async_trait]
impl Agent for GraphAgent {
    fn info(&self) -> AgentInfo {
        AgentInfo {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }

    async fn run(self: Arc<Self>, invocation: Arc<Invocation>) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(invocation.options.output_channel_capacity);
        let graph = self.graph.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut initial: BTreeMap<String, Value> = invocation.options.runtime_state.clone();
            initial.insert("user_input".to_string(), Value::String(invocation.message.content.clone()));
            let branch = vec![name.clone()];
            if let Err(err) = graph.run(&invocation.id, &branch, initial, &tx).await {
                let _ = tx
                    .send(Event::error(&invocation.id, &name, &branch, err.to_string()))
                    .await;
            }
        });
        rx
    }
}
