use crate::observer::RegistryObserver;
use crate::transport::{ConnId, Transport};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Session {
    pub name: String,
    pub transport: Transport,
    pub connected_at: DateTime<Utc>,
}

/// What a registration displaced.
#[derive(Debug, Default)]
pub struct Registration {
    /// Older transport that held the same name. It stays connected but is
    /// no longer reachable by name.
    pub superseded: Option<Transport>,
    /// Name this transport was registered under before renaming itself.
    pub renamed_from: Option<String>,
}

/// Name -> session binding for connected displays, in registration order.
/// Owned by the hub task; nothing else mutates it.
pub struct SessionRegistry {
    sessions: Vec<Session>,
    observer: Arc<dyn RegistryObserver>,
}

impl SessionRegistry {
    pub fn new(observer: Arc<dyn RegistryObserver>) -> Self {
        Self {
            sessions: Vec::new(),
            observer,
        }
    }

    /// Last writer wins. A transport holds at most one name, so re-registering
    /// under a new name drops its old binding.
    pub fn register(&mut self, name: &str, transport: Transport) -> Registration {
        let mut outcome = Registration::default();
        let conn_id = transport.conn_id();
        self.sessions.retain(|session| {
            if session.transport.conn_id() == conn_id {
                if session.name != name {
                    outcome.renamed_from = Some(session.name.clone());
                }
                false
            } else if session.name == name {
                outcome.superseded = Some(session.transport.clone());
                false
            } else {
                true
            }
        });
        self.sessions.push(Session {
            name: name.to_string(),
            transport,
            connected_at: Utc::now(),
        });

        if let Some(old) = &outcome.superseded {
            info!(
                event = "display_superseded",
                name = name,
                old_conn = old.conn_id(),
                new_conn = conn_id
            );
        }
        if let Some(previous) = &outcome.renamed_from {
            info!(event = "display_renamed", conn_id = conn_id, from = %previous, to = name);
        }
        info!(event = "display_registered", name = name, conn_id = conn_id);
        self.notify();
        outcome
    }

    /// No-op when the connection holds no binding, which covers double
    /// close and a superseded transport closing after its replacement.
    pub fn unregister(&mut self, conn_id: ConnId) -> Option<Session> {
        let idx = self
            .sessions
            .iter()
            .position(|session| session.transport.conn_id() == conn_id)?;
        let removed = self.sessions.remove(idx);
        info!(
            event = "display_unregistered",
            name = %removed.name,
            conn_id = conn_id
        );
        self.notify();
        Some(removed)
    }

    pub fn resolve(&self, name: &str) -> Option<&Session> {
        self.sessions.iter().find(|session| session.name == name)
    }

    /// Sessions whose transport still accepts frames. Silently dead links are
    /// filtered here rather than reaped ahead of time.
    pub fn all_open(&self) -> impl Iterator<Item = &Session> {
        self.sessions
            .iter()
            .filter(|session| session.transport.is_open())
    }

    pub fn names(&self) -> Vec<String> {
        self.sessions
            .iter()
            .map(|session| session.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn notify(&self) {
        self.observer.registry_changed(&self.names());
    }
}
