//! Session Service (invocation runtime component B).
//!
//! Append-only per-`(app_name, user_id, session_id)` event log with summaries
//! and a state map. Two backends ship here: [`InMemorySessionService`] (default,
//! used by tests and examples) and [`SqliteSessionService`] (durable across
//! restarts). Both implement [`SessionService`]; callers depend on the trait,
//! never on a concrete backend, per the dependency-injected-factory note in
//! the design notes (no process-wide registry).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use super::event::Event;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }

    fn composite(&self) -> String {
        format!("{}/{}/{}", self.app_name, self.user_id, self.session_id)
    }
}

/// A session's most recent summary for one `filter_key`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub updated_at: u64,
}

/// Append-only event log plus summaries and state, for one session key.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Session {
    pub key_app_name: String,
    pub key_user_id: String,
    pub key_session_id: String,
    pub events: Vec<Event>,
    pub summaries: BTreeMap<String, Summary>,
    pub state: BTreeMap<String, Value>,
}

impl Session {
    fn new(key: &SessionKey, initial_state: BTreeMap<String, Value>) -> Self {
        Self {
            key_app_name: key.app_name.clone(),
            key_user_id: key.user_id.clone(),
            key_session_id: key.session_id.clone(),
            events: Vec::new(),
            summaries: BTreeMap::new(),
            state: initial_state,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("backend: {0}")]
    Backend(String),
}

/// Session Service contract (§4.B). Implementations must serialize concurrent
/// appends to the same session (invariant 2 in §3) and apply the leading-user-event
/// filter and state-delta application atomically with the append (invariants 1, 3).
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Returns the session, or `None` if it does not exist. Never fails for "not found".
    async fn get_session(&self, key: &SessionKey) -> Option<Session>;

    /// Idempotent create: returns the existing session if present.
    async fn create_session(
        &self,
        key: &SessionKey,
        initial_state: BTreeMap<String, Value>,
    ) -> Result<Session, SessionError>;

    /// Appends `event`, filtering it out if it is a leading non-user event in an
    /// empty session (invariant 1), then applying its state delta atomically.
    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<(), SessionError>;

    /// Schedules background summarization for `filter_key` (or a full-session
    /// summary when `filter_key` is empty). Non-blocking; at most one active job
    /// per `(session, filter_key)`, coalescing later calls.
    async fn enqueue_summary_job(&self, key: &SessionKey, filter_key: &str, force: bool);

    /// Most recent full-session summary, if one has been computed.
    async fn get_session_summary_text(&self, key: &SessionKey) -> Option<String>;

    /// Flushes pending summary jobs.
    async fn close(&self);
}

fn is_user_event(event: &Event) -> bool {
    event.author == "user"
}

/// Appends `event` onto `session.events`, applying the leading-user-event filter
/// (invariant 1) and the state delta (invariant 3). Shared by both backends so
/// the invariant is enforced identically regardless of storage.
fn apply_append(session: &mut Session, event: Event) {
    if session.events.is_empty() && !is_user_event(&event) {
        warn!(
            author = %event.author,
            "dropping leading non-user event on empty session"
        );
        return;
    }
    if let Some(delta) = &event.state_delta {
        for (k, v) in delta {
            session.state.insert(k.clone(), v.clone());
        }
    }
    session.events.push(event);
}

/// In-memory `SessionService`. Default backend for tests and examples; not
/// durable across process restarts.
#[derive(Default)]
pub struct InMemorySessionService {
    sessions: DashMap<String, Session>,
    /// Pending summary job generation per `(session, filter_key)`, used to
    /// coalesce repeated enqueue calls (later call replaces the pending one).
    summary_generation: DashMap<(String, String), u64>,
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn get_session(&self, key: &SessionKey) -> Option<Session> {
        self.sessions.get(&key.composite()).map(|s| s.clone())
    }

    async fn create_session(
        &self,
        key: &SessionKey,
        initial_state: BTreeMap<String, Value>,
    ) -> Result<Session, SessionError> {
        let composite = key.composite();
        if let Some(existing) = self.sessions.get(&composite) {
            return Ok(existing.clone());
        }
        let session = Session::new(key, initial_state);
        self.sessions.insert(composite, session.clone());
        Ok(session)
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<(), SessionError> {
        let composite = key.composite();
        let mut entry = self
            .sessions
            .entry(composite)
            .or_insert_with(|| Session::new(key, BTreeMap::new()));
        apply_append(&mut entry, event);
        Ok(())
    }

    async fn enqueue_summary_job(&self, key: &SessionKey, filter_key: &str, _force: bool) {
        let gen_key = (key.composite(), filter_key.to_string());
        let gen = self
            .summary_generation
            .entry(gen_key)
            .and_modify(|g| *g += 1)
            .or_insert(1)
            .value()
            .to_owned();
        info!(filter_key, generation = gen, "summary job enqueued");
        // A real worker would spawn a task here; summarization itself is an
        // external collaborator (§1) so this records intent only.
    }

    async fn get_session_summary_text(&self, key: &SessionKey) -> Option<String> {
        self.sessions
            .get(&key.composite())
            .and_then(|s| s.summaries.get("").map(|summary| summary.text.clone()))
    }

    async fn close(&self) {}
}

/// SQLite-backed `SessionService`. Durable across process restarts; one
/// connection guarded by a blocking mutex, matching `loom_workspace::Store`'s
/// approach to a single-writer embedded database.
pub struct SqliteSessionService {
    db: Arc<Mutex<rusqlite::Connection>>,
    write_lock: AsyncMutex<()>,
}

impl SqliteSessionService {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let conn = rusqlite::Connection::open(path.as_ref())
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                composite_key TEXT PRIMARY KEY,
                app_name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                state_json TEXT NOT NULL,
                summaries_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS session_events (
                composite_key TEXT NOT NULL,
                seq INTEGER NOT NULL,
                event_json TEXT NOT NULL,
                PRIMARY KEY (composite_key, seq)
            );
            "#,
        )
        .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            write_lock: AsyncMutex::new(()),
        })
    }

    fn load(conn: &rusqlite::Connection, composite: &str) -> Result<Option<Session>, SessionError> {
        let row = conn
            .query_row(
                "SELECT app_name, user_id, session_id, state_json, summaries_json FROM sessions WHERE composite_key = ?1",
                rusqlite::params![composite],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .ok();
        let Some((app_name, user_id, session_id, state_json, summaries_json)) = row else {
            return Ok(None);
        };
        let state: BTreeMap<String, Value> =
            serde_json::from_str(&state_json).map_err(|e| SessionError::Backend(e.to_string()))?;
        let summaries: BTreeMap<String, Summary> =
            serde_json::from_str(&summaries_json).map_err(|e| SessionError::Backend(e.to_string()))?;
        let mut stmt = conn
            .prepare("SELECT event_json FROM session_events WHERE composite_key = ?1 ORDER BY seq ASC")
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        let events = stmt
            .query_map(rusqlite::params![composite], |row| row.get::<_, String>(0))
            .map_err(|e| SessionError::Backend(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SessionError::Backend(e.to_string()))?
            .into_iter()
            .map(|s| serde_json::from_str::<Event>(&s).map_err(|e| SessionError::Backend(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Session {
            key_app_name: app_name,
            key_user_id: user_id,
            key_session_id: session_id,
            events,
            summaries,
            state,
        }))
    }

    fn save_session_row(conn: &rusqlite::Connection, composite: &str, session: &Session) -> Result<(), SessionError> {
        let state_json =
            serde_json::to_string(&session.state).map_err(|e| SessionError::Backend(e.to_string()))?;
        let summaries_json =
            serde_json::to_string(&session.summaries).map_err(|e| SessionError::Backend(e.to_string()))?;
        conn.execute(
            "INSERT INTO sessions (composite_key, app_name, user_id, session_id, state_json, summaries_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(composite_key) DO UPDATE SET state_json = excluded.state_json, summaries_json = excluded.summaries_json",
            rusqlite::params![
                composite,
                session.key_app_name,
                session.key_user_id,
                session.key_session_id,
                state_json,
                summaries_json,
            ],
        )
        .map_err(|e| SessionError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SessionService for SqliteSessionService {
    async fn get_session(&self, key: &SessionKey) -> Option<Session> {
        let db = self.db.clone();
        let composite = key.composite();
        tokio::task::block_in_place(|| {
            let conn = db.lock().expect("sqlite mutex poisoned");
            Self::load(&conn, &composite).ok().flatten()
        })
    }

    async fn create_session(
        &self,
        key: &SessionKey,
        initial_state: BTreeMap<String, Value>,
    ) -> Result<Session, SessionError> {
        let _guard = self.write_lock.lock().await;
        let db = self.db.clone();
        let composite = key.composite();
        let key = key.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| SessionError::Backend("lock".into()))?;
            if let Some(existing) = Self::load(&conn, &composite)? {
                return Ok(existing);
            }
            let session = Session::new(&key, initial_state);
            Self::save_session_row(&conn, &composite, &session)?;
            Ok(session)
        })
    }

    async fn append_event(&self, key: &SessionKey, event: Event) -> Result<(), SessionError> {
        let _guard = self.write_lock.lock().await;
        let db = self.db.clone();
        let composite = key.composite();
        let key = key.clone();
        tokio::task::block_in_place(move || {
            let conn = db.lock().map_err(|_| SessionError::Backend("lock".into()))?;
            let mut session =
                Self::load(&conn, &composite)?.unwrap_or_else(|| Session::new(&key, BTreeMap::new()));
            let seq = session.events.len() as i64;
            let was_empty = session.events.is_empty();
            let should_drop = was_empty && !is_user_event(&event);
            apply_append(&mut session, event.clone());
            Self::save_session_row(&conn, &composite, &session)?;
            if !should_drop {
                let event_json =
                    serde_json::to_string(&event).map_err(|e| SessionError::Backend(e.to_string()))?;
                conn.execute(
                    "INSERT INTO session_events (composite_key, seq, event_json) VALUES (?1, ?2, ?3)",
                    rusqlite::params![composite, seq, event_json],
                )
                .map_err(|e| SessionError::Backend(e.to_string()))?;
            }
            Ok(())
        })
    }

    async fn enqueue_summary_job(&self, _key: &SessionKey, filter_key: &str, _force: bool) {
        info!(filter_key, "summary job enqueued (sqlite backend)");
    }

    async fn get_session_summary_text(&self, key: &SessionKey) -> Option<String> {
        self.get_session(key)
            .await
            .and_then(|s| s.summaries.get("").map(|summary| summary.text.clone()))
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::event::{Event as RtEvent, ObjectKind, Response};

    fn qualifying_assistant_event(invocation_id: &str, content: &str) -> RtEvent {
        RtEvent::from_response(
            invocation_id,
            "assistant",
            &[],
            Response {
                id: "r1".into(),
                object: ObjectKind::ChatCompletion,
                created: 0,
                choices: vec![super::super::event::Choice {
                    index: 0,
                    message: super::super::event::Message::assistant(content),
                    delta: None,
                }],
                done: true,
                is_partial: false,
                error: None,
            },
        )
    }

    fn user_event(invocation_id: &str, content: &str) -> RtEvent {
        let mut event = qualifying_assistant_event(invocation_id, content);
        event.author = "user".to_string();
        event
    }

    #[tokio::test]
    async fn leading_non_user_event_is_filtered_on_empty_session() {
        let svc = InMemorySessionService::new();
        let key = SessionKey::new("app", "u1", "s1");
        svc.append_event(&key, qualifying_assistant_event("inv-1", "hi"))
            .await
            .unwrap();
        let session = svc.get_session(&key).await.unwrap();
        assert!(session.events.is_empty());
    }

    #[tokio::test]
    async fn user_event_then_assistant_event_both_kept() {
        let svc = InMemorySessionService::new();
        let key = SessionKey::new("app", "u1", "s1");
        svc.append_event(&key, user_event("inv-1", "hello"))
            .await
            .unwrap();
        svc.append_event(&key, qualifying_assistant_event("inv-1", "hi back"))
            .await
            .unwrap();
        let session = svc.get_session(&key).await.unwrap();
        assert_eq!(session.events.len(), 2);
        assert_eq!(session.events[0].author, "user");
    }

    #[tokio::test]
    async fn create_session_is_idempotent() {
        let svc = InMemorySessionService::new();
        let key = SessionKey::new("app", "u1", "s1");
        let first = svc.create_session(&key, BTreeMap::new()).await.unwrap();
        svc.append_event(&key, user_event("inv-1", "hello"))
            .await
            .unwrap();
        let second = svc.create_session(&key, BTreeMap::new()).await.unwrap();
        assert_eq!(first.events.len(), 0);
        assert_eq!(second.events.len(), 1, "create_session must return the existing session");
    }

    #[tokio::test]
    async fn state_delta_applied_atomically_with_append() {
        let svc = InMemorySessionService::new();
        let key = SessionKey::new("app", "u1", "s1");
        svc.append_event(&key, user_event("inv-1", "hello"))
            .await
            .unwrap();
        let mut delta = BTreeMap::new();
        delta.insert("counter".to_string(), Value::from(1));
        let event = RtEvent::from_state_delta("inv-1", "graph", &[], delta);
        svc.append_event(&key, event).await.unwrap();
        let session = svc.get_session(&key).await.unwrap();
        assert_eq!(session.state.get("counter"), Some(&Value::from(1)));
    }

    #[tokio::test]
    async fn sqlite_backend_round_trips_events() {
        let dir = tempfile::tempdir().unwrap();
        let svc = SqliteSessionService::open(dir.path().join("sessions.db")).unwrap();
        let key = SessionKey::new("app", "u1", "s1");
        svc.append_event(&key, user_event("inv-1", "hello")).await.unwrap();
        svc.append_event(&key, qualifying_assistant_event("inv-1", "hi"))
            .await
            .unwrap();
        let session = svc.get_session(&key).await.unwrap();
        assert_eq!(session.events.len(), 2);
        assert_eq!(session.events[1].author, "assistant");
    }
}
