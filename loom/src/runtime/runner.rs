//! Runner (component H): the public entry point tying Session Service,
//! Invocation, and Agent together.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info_span, warn, Instrument};

use super::agent::Agent;
use super::event::{Event, Message, ObjectKind, Response};
use super::invocation::{Invocation, RunOptions};
use super::session::{SessionError, SessionKey, SessionService};

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("session setup failed: {0}")]
    SessionSetup(#[from] SessionError),
    #[error("history seeding failed: {0}")]
    SeedingFailed(String),
}

pub struct Runner {
    pub app_name: String,
    pub agent: Arc<dyn Agent>,
    pub sessions: Arc<dyn SessionService>,
}

impl Runner {
    pub fn new(app_name: impl Into<String>, agent: Arc<dyn Agent>, sessions: Arc<dyn SessionService>) -> Self {
        Self {
            app_name: app_name.into(),
            agent,
            sessions,
        }
    }

    /// Runs the agent for `(user_id, session_id)` against `message`, returning
    /// a stream of events terminated by exactly one `runner.completion` event
    /// (§8 invariant 1).
    pub async fn run(
        &self,
        user_id: &str,
        session_id: &str,
        message: Message,
        options: RunOptions,
    ) -> Result<mpsc::Receiver<Event>, RunnerError> {
        self.run_with_messages(user_id, session_id, Vec::new(), message, options)
            .await
    }

    /// Convenience wrapper carrying a full history override; the latest user
    /// message in `messages` (scanning from the tail) becomes the invocation
    /// message. If none is found, an empty message is used but history is
    /// still forwarded via `options.history_override`.
    pub async fn run_with_messages(
        &self,
        user_id: &str,
        session_id: &str,
        messages: Vec<Message>,
        fallback_message: Message,
        mut options: RunOptions,
    ) -> Result<mpsc::Receiver<Event>, RunnerError> {
        let key = SessionKey::new(&self.app_name, user_id, session_id);

        // Step 1: get-or-create the session.
        let session = self.sessions.create_session(&key, Default::default()).await?;

        let latest_user = messages.iter().rev().find(|m| m.is_user()).cloned();
        let invocation_message = latest_user.unwrap_or(fallback_message);
        if !messages.is_empty() {
            options.history_override = Some(messages.clone());
        }

        // Step 3: seed history into an empty session.
        if session.events.is_empty() {
            if let Some(history) = &options.history_override {
                for event in history {
                    // history entries here are Messages, not Events; seed as
                    // user-authored events so the session's leading-user
                    // invariant holds for a seeded history ending in a user turn.
                    let author = if event.is_user() { "user" } else { "history" };
                    let seeded = Event::from_response(
                        "seed",
                        author,
                        &[],
                        Response {
                            id: uuid::Uuid::new_v4().to_string(),
                            object: ObjectKind::ChatCompletion,
                            created: 0,
                            choices: vec![super::event::Choice {
                                index: 0,
                                message: event.clone(),
                                delta: None,
                            }],
                            done: true,
                            is_partial: false,
                            error: None,
                        },
                    );
                    self.sessions
                        .append_event(&key, seeded)
                        .await
                        .map_err(|e| RunnerError::SeedingFailed(e.to_string()))?;
                }
            }
        }

        // Step 4: append the incoming user message unless it's empty, non-user,
        // or already the seeded history's last event.
        let session_after_seed = self.sessions.get_session(&key).await.unwrap_or(session);
        let already_seeded = session_after_seed
            .events
            .last()
            .and_then(|e| e.response.as_ref())
            .map(|r| r.choices.first())
            .flatten()
            .map(|c| c.message.is_user() && c.message.content == invocation_message.content)
            .unwrap_or(false);

        if invocation_message.is_user() && !invocation_message.content.is_empty() && !already_seeded {
            let event = Event::from_response(
                "seed",
                "user",
                &[],
                Response {
                    id: uuid::Uuid::new_v4().to_string(),
                    object: ObjectKind::ChatCompletion,
                    created: 0,
                    choices: vec![super::event::Choice {
                        index: 0,
                        message: invocation_message.clone(),
                        delta: None,
                    }],
                    done: true,
                    is_partial: false,
                    error: None,
                },
            );
            self.sessions
                .append_event(&key, event)
                .await
                .map_err(|e| RunnerError::SeedingFailed(e.to_string()))?;
        }

        // Step 5: construct the Invocation.
        let invocation = Arc::new(Invocation::new(
            key.clone(),
            self.agent.info().name,
            invocation_message,
            options,
        ));

        let span = info_span!("runner_run", app_name = %self.app_name, invocation_id = %invocation.id);

        // Step 6: run the agent.
        let agent_rx = self.agent.clone().run(invocation.clone()).instrument(span).await;

        // Step 7-10: spawn the forwarder.
        let (out_tx, out_rx) = mpsc::channel(invocation.options.output_channel_capacity);
        let sessions = self.sessions.clone();
        let app_name = self.app_name.clone();
        tokio::spawn(Self::forward(sessions, app_name, key, invocation, agent_rx, out_tx));

        Ok(out_rx)
    }

    async fn forward(
        sessions: Arc<dyn SessionService>,
        app_name: String,
        key: SessionKey,
        invocation: Arc<Invocation>,
        mut agent_rx: mpsc::Receiver<Event>,
        out_tx: mpsc::Sender<Event>,
    ) {
        let mut last_graph_terminal: Option<Event> = None;

        while let Some(event) = agent_rx.recv().await {
            if invocation.cancellation.is_cancelled() {
                break;
            }

            if event.is_qualifying() {
                match sessions.append_event(&key, event.clone()).await {
                    Ok(()) => {
                        if !event.filter_key.is_empty() {
                            sessions.enqueue_summary_job(&key, &event.filter_key, false).await;
                        }
                        if let Some(response) = &event.response {
                            if response.object == ObjectKind::GraphExecution {
                                last_graph_terminal = Some(event.clone());
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "session append failed, skipping summary enqueue");
                    }
                }
            }

            if event.requires_completion {
                invocation.notify_completion(event.id.clone());
            }

            if out_tx.send(event).await.is_err() {
                break;
            }
        }

        // Step 8: terminal runner.completion event.
        let mut completion = Event::from_response(
            &invocation.id,
            &app_name,
            &[],
            Response {
                id: uuid::Uuid::new_v4().to_string(),
                object: ObjectKind::RunnerCompletion,
                created: 0,
                choices: last_graph_terminal
                    .as_ref()
                    .and_then(|e| e.response.as_ref())
                    .map(|r| r.choices.clone())
                    .unwrap_or_default(),
                done: true,
                is_partial: false,
                error: None,
            },
        );
        if let Some(terminal) = &last_graph_terminal {
            completion.state_delta = terminal.state_delta.clone();
        }

        if let Err(err) = sessions.append_event(&key, completion.clone()).await {
            error!(error = %err, "failed to persist runner.completion event");
        }
        let _ = out_tx.send(completion).await;

        invocation.cleanup_notice();
        sessions.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::agent::LlmAgent;
    use crate::runtime::callback::CallbackRegistry;
    use crate::runtime::model::EchoModel;
    use crate::runtime::session::InMemorySessionService;
    use crate::runtime::tool_runtime::ToolRuntime;

    fn echo_agent() -> Arc<dyn Agent> {
        Arc::new(LlmAgent {
            name: "root".into(),
            description: "test agent".into(),
            system_prompt: "be helpful".into(),
            model: Arc::new(EchoModel),
            tools: Arc::new(ToolRuntime::new(Vec::new())),
            callbacks: Arc::new(CallbackRegistry::new()),
            sub_agents: Vec::new(),
        })
    }

    #[tokio::test]
    async fn run_ends_with_exactly_one_runner_completion() {
        let runner = Runner::new("app", echo_agent(), Arc::new(InMemorySessionService::new()));
        let mut rx = runner
            .run("u1", "s1", Message::user("Hello, world!"), RunOptions::default())
            .await
            .unwrap();

        let mut completions = 0;
        while let Some(event) = rx.recv().await {
            if let Some(response) = &event.response {
                if response.object == ObjectKind::RunnerCompletion {
                    completions += 1;
                }
            }
        }
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn empty_user_message_appends_no_session_event() {
        let sessions = Arc::new(InMemorySessionService::new());
        let runner = Runner::new("app", echo_agent(), sessions.clone());
        let mut rx = runner
            .run("u1", "s1", Message::user(""), RunOptions::default())
            .await
            .unwrap();
        while rx.recv().await.is_some() {}

        let key = SessionKey::new("app", "u1", "s1");
        let session = sessions.get_session(&key).await.unwrap();
        assert!(
            session.events.iter().all(|e| e.author != "user"),
            "empty user message must not be appended"
        );
    }

    #[tokio::test]
    async fn seed_history_with_identical_latest_user_is_not_duplicated() {
        let sessions = Arc::new(InMemorySessionService::new());
        let runner = Runner::new("app", echo_agent(), sessions.clone());
        let history = vec![Message::system("sys"), Message::assistant("prev"), Message::user("hello")];
        let mut rx = runner
            .run_with_messages("u1", "s1", history, Message::user("hello"), RunOptions::default())
            .await
            .unwrap();
        while rx.recv().await.is_some() {}

        let key = SessionKey::new("app", "u1", "s1");
        let session = sessions.get_session(&key).await.unwrap();
        let user_events_with_hello = session
            .events
            .iter()
            .filter(|e| {
                e.response
                    .as_ref()
                    .and_then(|r| r.choices.first())
                    .map(|c| c.message.is_user() && c.message.content == "hello")
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(user_events_with_hello, 1, "identical latest user message must not duplicate");
    }
}
