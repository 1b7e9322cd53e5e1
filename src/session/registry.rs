//! Process-wide session registry with idle eviction.
//!
//! Maps session ids to live sessions. Handlers hold an `Arc` to their
//! session for the connection's lifetime, so destruction is atomic with
//! respect to in-flight work: `destroy` removes the map entry and cancels
//! the session's token; tasks observe the cancellation at their next await
//! point while their `Arc` keeps the state alive until they finish.

use crate::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Registry of live sessions.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_ttl,
        }
    }

    /// Register a session.
    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.lock().unwrap().insert(session.id(), session);
    }

    /// Look up a session by id.
    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.lock().unwrap().get(id).cloned()
    }

    /// Remove and cancel a session. Idempotent.
    ///
    /// Returns true if the session was still registered.
    pub fn destroy(&self, id: &Uuid) -> bool {
        let removed = self.sessions.lock().unwrap().remove(id);
        match removed {
            Some(session) => {
                session.close();
                debug!(session_id = %id, "session destroyed");
                true
            }
            None => false,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy sessions idle past the TTL. Idempotent.
    ///
    /// Returns the number of sessions destroyed.
    pub fn sweep(&self) -> usize {
        let expired: Vec<Uuid> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .values()
                .filter(|s| s.idle_for() > self.idle_ttl)
                .map(|s| s.id())
                .collect()
        };

        let mut destroyed = 0;
        for id in expired {
            if self.destroy(&id) {
                destroyed += 1;
            }
        }

        if destroyed > 0 {
            info!(count = destroyed, "swept idle sessions");
        }
        destroyed
    }

    /// Run the sweep on a timer until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.sweep();
                    }
                    None => break,
                }
            }
        })
    }

    /// Request end-of-stream finalization on every live session.
    ///
    /// Used by graceful shutdown; sessions unregister themselves as their
    /// handlers finish.
    pub fn request_end_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().unwrap().values().cloned().collect();
        for session in sessions {
            session.request_end();
        }
    }

    /// Cancel every live session immediately.
    pub fn close_all(&self) {
        let ids: Vec<Uuid> = self.sessions.lock().unwrap().keys().copied().collect();
        for id in ids {
            self.destroy(&id);
        }
    }
}
