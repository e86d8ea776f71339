use crate::cache::ZoneCache;
use crate::observer::CommandMirror;
use crate::registry::SessionRegistry;
use serde::Serialize;
use signage_core::wire::{encode_text, FrameError};
use signage_core::{Command, Recipient, Zone};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Display names the command was queued for.
    pub delivered: Vec<String>,
    /// Open sessions whose queue refused the frame.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<Zone>,
    /// Set when a targeted command found no open session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missed: Option<String>,
}

pub struct CommandRouter {
    mirror: Arc<dyn CommandMirror>,
    max_frame_bytes: usize,
}

impl CommandRouter {
    pub fn new(mirror: Arc<dyn CommandMirror>, max_frame_bytes: usize) -> Self {
        Self {
            mirror,
            max_frame_bytes,
        }
    }

    /// At-most-once delivery to whatever is open right now. A broadcast is
    /// encoded once and every session gets the same bytes.
    pub fn dispatch(
        &self,
        registry: &SessionRegistry,
        cache: &mut ZoneCache,
        command: Command,
    ) -> Result<DispatchReport, FrameError> {
        self.mirror.command_mirrored(&command);

        let text: Arc<str> = Arc::from(encode_text(&command, self.max_frame_bytes)?);
        let mut report = DispatchReport::default();

        match command.recipient() {
            Recipient::All => {
                for session in registry.all_open() {
                    match session.transport.deliver(text.clone()) {
                        Ok(()) => report.delivered.push(session.name.clone()),
                        Err(err) => {
                            warn!(
                                event = "delivery_failed",
                                name = %session.name,
                                conn_id = session.transport.conn_id(),
                                error = %err
                            );
                            report.failed.push(session.name.clone());
                        }
                    }
                }
                if let Some(zone) = command.cache_zone() {
                    cache.put(zone, command.clone());
                    report.cached = Some(zone);
                }
                info!(
                    event = "command_broadcast",
                    target = %command.target,
                    delivered = report.delivered.len(),
                    failed = report.failed.len()
                );
            }
            Recipient::Display(name) => {
                let session = registry
                    .resolve(name)
                    .filter(|session| session.transport.is_open());
                let Some(session) = session else {
                    warn!(event = "routing_miss", target = %command.target, target_id = name);
                    report.missed = Some(name.to_string());
                    return Ok(report);
                };
                match session.transport.deliver(text) {
                    Ok(()) => {
                        debug!(event = "command_unicast", target = %command.target, name = name);
                        report.delivered.push(session.name.clone());
                    }
                    Err(err) => {
                        warn!(
                            event = "delivery_failed",
                            name = name,
                            conn_id = session.transport.conn_id(),
                            error = %err
                        );
                        report.failed.push(session.name.clone());
                    }
                }
            }
        }
        Ok(report)
    }
}
