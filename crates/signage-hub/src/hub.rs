use crate::cache::ZoneCache;
use crate::protocol::{DisplayLink, LinkStep, ProtocolError};
use crate::registry::SessionRegistry;
use crate::router::{CommandRouter, DispatchReport};
use crate::transport::{ConnId, Transport};
use signage_core::wire::FrameError;
use signage_core::{Command, Zone};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const EVENT_QUEUE: usize = 1024;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub loop is not running")]
    Stopped,
    #[error("command rejected: {0}")]
    Rejected(#[from] FrameError),
    #[error("invalid address {addr}: {reason}")]
    InvalidAddr { addr: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub enum HubEvent {
    Opened {
        transport: Transport,
        remote: Option<SocketAddr>,
    },
    Frame {
        conn_id: ConnId,
        text: String,
    },
    Closed {
        conn_id: ConnId,
        reason: &'static str,
    },
    Dispatch {
        command: Command,
        reply: oneshot::Sender<Result<DispatchReport, FrameError>>,
    },
    Snapshot {
        reply: oneshot::Sender<BTreeMap<Zone, Command>>,
    },
    Displays {
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Ends the loop once earlier events are handled. Dropping the cache
    /// then lets the persistence worker drain.
    Shutdown,
}

/// Sole owner of the registry, the cache and every link. Events are handled
/// one at a time to completion, so none of that state needs a lock.
pub struct Hub {
    registry: SessionRegistry,
    cache: ZoneCache,
    router: CommandRouter,
    links: HashMap<ConnId, DisplayLink>,
    events: mpsc::Receiver<HubEvent>,
    max_frame_bytes: usize,
}

impl Hub {
    pub fn new(
        registry: SessionRegistry,
        cache: ZoneCache,
        router: CommandRouter,
        max_frame_bytes: usize,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let hub = Self {
            registry,
            cache,
            router,
            links: HashMap::new(),
            events: rx,
            max_frame_bytes,
        };
        let handle = HubHandle {
            tx,
            conn_counter: Arc::new(AtomicU64::new(0)),
        };
        (hub, handle)
    }

    /// Runs until `HubEvent::Shutdown` or until every handle is dropped.
    pub async fn run(mut self) {
        info!(event = "hub_loop_start", cached_zones = self.cache.snapshot().len());
        while let Some(event) = self.events.recv().await {
            if self.handle_event(event).is_break() {
                break;
            }
        }
        info!(
            event = "hub_loop_stop",
            links = self.links.len(),
            sessions = self.registry.len()
        );
    }

    fn handle_event(&mut self, event: HubEvent) -> ControlFlow<()> {
        match event {
            HubEvent::Opened { transport, remote } => self.on_opened(transport, remote),
            HubEvent::Frame { conn_id, text } => self.on_frame(conn_id, &text),
            HubEvent::Closed { conn_id, reason } => self.on_closed(conn_id, reason),
            HubEvent::Dispatch { command, reply } => {
                let result = self
                    .router
                    .dispatch(&self.registry, &mut self.cache, command);
                if let Err(err) = &result {
                    warn!(event = "command_rejected", error = %err);
                }
                let _ = reply.send(result);
            }
            HubEvent::Snapshot { reply } => {
                let _ = reply.send(self.cache.snapshot());
            }
            HubEvent::Displays { reply } => {
                let _ = reply.send(self.registry.names());
            }
            HubEvent::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn on_opened(&mut self, transport: Transport, remote: Option<SocketAddr>) {
        let conn_id = transport.conn_id();
        let remote_label = remote.map(|addr| addr.to_string()).unwrap_or_default();
        info!(event = "display_connected", conn_id = conn_id, remote = %remote_label);
        self.links.insert(
            conn_id,
            DisplayLink::new(transport, remote, self.max_frame_bytes),
        );
    }

    fn on_frame(&mut self, conn_id: ConnId, text: &str) {
        let Some(link) = self.links.get_mut(&conn_id) else {
            debug!(event = "frame_for_unknown_link", conn_id = conn_id);
            return;
        };
        let was_registered = link.name().is_some();
        match link.accept(text) {
            Ok(LinkStep::Register { name, handshake }) => {
                let transport = link.transport().clone();
                info!(
                    event = "handshake_ok",
                    conn_id = conn_id,
                    name = %name,
                    platform = handshake.platform.as_deref().unwrap_or_default(),
                    rehandshake = was_registered
                );
                let registration = self.registry.register(&name, transport.clone());
                let sent = self.cache.replay(&transport);
                info!(
                    event = "replay_sent",
                    conn_id = conn_id,
                    name = %name,
                    count = sent,
                    superseded = registration.superseded.is_some(),
                    renamed_from = registration.renamed_from.as_deref().unwrap_or_default()
                );
            }
            Ok(LinkStep::Ignored { kind }) => {
                if was_registered {
                    debug!(
                        event = "display_frame_ignored",
                        conn_id = conn_id,
                        kind = kind.as_deref().unwrap_or_default()
                    );
                } else {
                    warn!(
                        event = "expected_handshake",
                        conn_id = conn_id,
                        kind = kind.as_deref().unwrap_or_default()
                    );
                }
            }
            Err(ProtocolError::MissingName) => {
                warn!(event = "handshake_missing_name", conn_id = conn_id);
            }
            Err(err) => {
                warn!(event = "protocol_error", conn_id = conn_id, error = %err);
            }
        }
    }

    /// Liveness path: close and error both land here, possibly more than once.
    fn on_closed(&mut self, conn_id: ConnId, reason: &'static str) {
        let (name, remote) = match self.links.remove(&conn_id) {
            Some(link) => {
                let remote = link.remote();
                (link.close(), remote)
            }
            None => (None, None),
        };
        let removed = self.registry.unregister(conn_id);
        let remote_label = remote.map(|addr| addr.to_string()).unwrap_or_default();
        info!(
            event = "display_disconnected",
            conn_id = conn_id,
            name = name.as_deref().unwrap_or_default(),
            remote = %remote_label,
            evicted = removed.is_some(),
            reason = reason
        );
    }
}

/// Cloneable way into the hub loop for connection tasks and HTTP handlers.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
    conn_counter: Arc<AtomicU64>,
}

impl HubHandle {
    pub fn next_conn_id(&self) -> ConnId {
        self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn opened(
        &self,
        transport: Transport,
        remote: Option<SocketAddr>,
    ) -> Result<(), HubError> {
        self.send(HubEvent::Opened { transport, remote }).await
    }

    pub async fn frame(&self, conn_id: ConnId, text: String) -> Result<(), HubError> {
        self.send(HubEvent::Frame { conn_id, text }).await
    }

    pub async fn closed(&self, conn_id: ConnId, reason: &'static str) -> Result<(), HubError> {
        self.send(HubEvent::Closed { conn_id, reason }).await
    }

    /// Routing misses come back inside the report, never as an error.
    pub async fn dispatch(&self, command: Command) -> Result<DispatchReport, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Dispatch { command, reply }).await?;
        let report = rx.await.map_err(|_| HubError::Stopped)??;
        Ok(report)
    }

    pub async fn snapshot(&self) -> Result<BTreeMap<Zone, Command>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Snapshot { reply }).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    pub async fn displays(&self) -> Result<Vec<String>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubEvent::Displays { reply }).await?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    /// Asks the loop to stop after the events already queued.
    pub async fn stop(&self) -> Result<(), HubError> {
        self.send(HubEvent::Shutdown).await
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubError> {
        self.tx.send(event).await.map_err(|_| HubError::Stopped)
    }
}
