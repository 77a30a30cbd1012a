//! Call sessions
//!
//! One [`SessionState`] per live call: current node, extracted variables and
//! conversation history. The [`SessionManager`] caps concurrency and expires
//! sessions abandoned without a hangup.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

use callflow_core::{ConversationHistory, HistoryEntry, VarValue};

use crate::EngineError;

/// Mutable state of one call.
pub struct SessionState {
    pub id: String,
    node_id: Mutex<String>,
    variables: Mutex<HashMap<String, VarValue>>,
    history: Mutex<ConversationHistory>,
    started_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    ended: AtomicBool,
}

impl SessionState {
    pub fn new(start_node: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: Mutex::new(start_node.into()),
            variables: Mutex::new(HashMap::new()),
            history: Mutex::new(ConversationHistory::new()),
            started_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            ended: AtomicBool::new(false),
        }
    }

    pub fn node_id(&self) -> String {
        self.node_id.lock().clone()
    }

    /// Copy of the variables for a turn to work on
    pub fn variables_snapshot(&self) -> HashMap<String, VarValue> {
        self.variables.lock().clone()
    }

    /// Copy of the history for a turn to work on
    pub fn history_snapshot(&self) -> ConversationHistory {
        self.history.lock().clone()
    }

    /// Commit a completed turn: node, variables and both sides of the
    /// exchange. A cancelled turn never reaches this.
    pub fn commit_turn(
        &self,
        node_id: &str,
        variables: HashMap<String, VarValue>,
        caller_text: Option<&str>,
        agent_lines: &[String],
    ) {
        *self.node_id.lock() = node_id.to_string();
        *self.variables.lock() = variables;

        let mut history = self.history.lock();
        if let Some(text) = caller_text {
            history.push(HistoryEntry::caller(text));
        }
        for line in agent_lines {
            history.push(HistoryEntry::agent(line));
        }
    }

    /// Append an agent-only line (check-in prompts)
    pub fn push_agent_line(&self, line: &str) {
        self.history.lock().push(HistoryEntry::agent(line));
    }

    /// Note caller activity
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    pub fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Exportable record of the call for downstream processing.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            node_id: self.node_id(),
            variables: self.variables_snapshot(),
            history: self.history_snapshot(),
            started_at: self.started_at,
            ended: self.is_ended(),
        }
    }
}

/// Serializable session export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub node_id: String,
    pub variables: HashMap<String, VarValue>,
    pub history: ConversationHistory,
    pub started_at: DateTime<Utc>,
    pub ended: bool,
}

/// Holds live sessions, capped and expiring.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionState>>>,
    max_sessions: usize,
    session_timeout: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, session_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            session_timeout,
        }
    }

    /// Create and register a session at the flow's start node.
    pub fn create(&self, start_node: impl Into<String>) -> Result<Arc<SessionState>, EngineError> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(EngineError::SessionLimit(self.max_sessions));
        }

        let session = Arc::new(SessionState::new(start_node));
        sessions.insert(session.id.clone(), session.clone());
        tracing::info!(session_id = %session.id, total = sessions.len(), "session created");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionState>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SessionState>> {
        self.sessions.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drop ended sessions and sessions idle past the timeout.
    pub fn remove_expired(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_ended() && session.idle_for() < self.session_timeout);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, remaining = sessions.len(), "expired sessions removed");
        }
        removed
    }

    /// Background expiry sweep. Returns the shutdown handle; send `true`
    /// (or drop it) to stop the task.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.remove_expired();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("session cleanup task stopped");
        });

        shutdown_tx
    }
}
