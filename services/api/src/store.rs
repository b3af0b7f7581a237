//! In-Memory Session Registry
//!
//! Sessions live only as long as the student's browser session; nothing is
//! persisted. Each session sits behind its own async mutex so one student's
//! requests are handled one at a time while other students proceed freely.
//! A student who simply closes the browser never ends the session, so idle
//! sessions are evicted by a background sweeper.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;
use vpe_core::session::Session;

/// Upper bound on the time between two idle sweeps.
const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// A registered session and its conversation state.
#[derive(Debug)]
pub struct SessionEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub state: Mutex<Session>,
    last_active: Mutex<Instant>,
}

impl SessionEntry {
    /// When the session was last looked up.
    pub async fn last_active(&self) -> Instant {
        *self.last_active.lock().await
    }

    async fn touch(&self) {
        *self.last_active.lock().await = Instant::now();
    }
}

pub type SessionHandle = Arc<SessionEntry>;

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new, empty session.
    pub async fn create(&self) -> SessionHandle {
        let entry = Arc::new(SessionEntry {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            state: Mutex::new(Session::new()),
            last_active: Mutex::new(Instant::now()),
        });
        self.sessions.write().await.insert(entry.id, entry.clone());
        info!(session_id = %entry.id, "Session created");
        entry
    }

    /// Looks up a session and marks it as active.
    pub async fn get(&self, id: Uuid) -> Option<SessionHandle> {
        let entry = self.sessions.read().await.get(&id).cloned()?;
        entry.touch().await;
        Some(entry)
    }

    /// Drops a session. Returns `false` if it did not exist.
    pub async fn remove(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            info!(session_id = %id, "Session ended");
        }
        removed
    }

    /// Drops every session not looked up for at least `max_idle`.
    ///
    /// A session whose state is locked is serving a request and is kept.
    /// Returns the number of sessions evicted.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        let mut expired = Vec::new();
        for (id, entry) in sessions.iter() {
            if entry.state.try_lock().is_err() {
                continue;
            }
            if now.duration_since(entry.last_active().await) >= max_idle {
                expired.push(*id);
            }
        }
        for id in &expired {
            sessions.remove(id);
            info!(session_id = %id, idle_secs = max_idle.as_secs(), "Session expired");
        }
        expired.len()
    }

    /// Periodically evicts sessions idle for longer than `max_idle`.
    pub fn spawn_idle_sweeper(self: &Arc<Self>, max_idle: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = max_idle.min(MAX_SWEEP_PERIOD);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = store.evict_idle(max_idle).await;
                if evicted > 0 {
                    let remaining = store.len().await;
                    debug!(evicted, remaining, "Idle sweep finished");
                }
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
