//! Registry of live sessions, used to force-close them on shutdown.

use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type SessionId = u64;

#[derive(Debug)]
struct SessionEntry {
    label: Arc<str>,
    peer: SocketAddr,
    opened_at: Instant,
    cancel: CancellationToken,
}

/// Snapshot of a live session for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub label: Arc<str>,
    pub peer: SocketAddr,
    pub age: Duration,
}

/// Tracks live sessions by id. Every session token is a child of the
/// registry's root token, so a session registered after shutdown starts out
/// already cancelled.
#[derive(Debug)]
pub struct Registry {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    next_id: AtomicU64,
    root: CancellationToken,
}

impl Registry {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            root,
        }
    }

    /// Insert a session and return a guard that removes it when dropped.
    pub fn register(self: &Arc<Self>, peer: SocketAddr, label: Arc<str>) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.root.child_token();
        let active = {
            let mut sessions = self.sessions.lock();
            sessions.insert(
                id,
                SessionEntry {
                    label,
                    peer,
                    opened_at: Instant::now(),
                    cancel: cancel.clone(),
                },
            );
            sessions.len()
        };
        metrics::session_registered();
        debug!("Registered session {} ({} active)", id, active);

        SessionGuard {
            registry: Arc::clone(self),
            id,
            cancel,
        }
    }

    /// Remove a session. Returns false if it was not tracked.
    pub fn remove(&self, id: SessionId) -> bool {
        let (removed, active) = {
            let mut sessions = self.sessions.lock();
            let removed = sessions.remove(&id).is_some();
            (removed, sessions.len())
        };
        if removed {
            metrics::session_unregistered();
            debug!("Unregistered session {} ({} active)", id, active);
        }
        removed
    }

    /// Cancel every tracked session so its pumps stop and drop their sockets.
    /// Sessions stay registered until their own task unregisters them.
    pub fn close_all(&self) -> usize {
        let sessions = self.sessions.lock();
        for entry in sessions.values() {
            entry.cancel.cancel();
        }
        sessions.len()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.lock();
        let mut list: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: *id,
                label: Arc::clone(&entry.label),
                peer: entry.peer,
                age: entry.opened_at.elapsed(),
            })
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }
}

/// Keeps a session registered for as long as it is alive.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<Registry>,
    id: SessionId,
    cancel: CancellationToken,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Token cancelled when the session is force-closed
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
