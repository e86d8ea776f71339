use serde::Serialize;
use signage_core::Command;
use tokio::sync::broadcast;

const FEED_CAPACITY: usize = 256;

/// Controller UI side of the registry.
pub trait RegistryObserver: Send + Sync {
    fn registry_changed(&self, names: &[String]);
}

/// Local preview surface; sees every dispatched command regardless of routing.
pub trait CommandMirror: Send + Sync {
    fn command_mirrored(&self, command: &Command);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    RegistryChanged { names: Vec<String> },
}

/// Fans hub notifications out to whichever UI sockets are listening.
/// Sends with no receivers are dropped, lagging receivers skip ahead.
#[derive(Clone)]
pub struct NoticeFeed {
    notices: broadcast::Sender<Notice>,
    mirrored: broadcast::Sender<Command>,
}

impl NoticeFeed {
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(FEED_CAPACITY);
        let (mirrored, _) = broadcast::channel(FEED_CAPACITY);
        Self { notices, mirrored }
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn subscribe_preview(&self) -> broadcast::Receiver<Command> {
        self.mirrored.subscribe()
    }
}

impl Default for NoticeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryObserver for NoticeFeed {
    fn registry_changed(&self, names: &[String]) {
        let _ = self.notices.send(Notice::RegistryChanged {
            names: names.to_vec(),
        });
    }
}

impl CommandMirror for NoticeFeed {
    fn command_mirrored(&self, command: &Command) {
        let _ = self.mirrored.send(command.clone());
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use signage_core::CommandTarget;

    #[test]
    fn feed_delivers_to_current_subscribers() {
        let feed = NoticeFeed::new();
        feed.registry_changed(&["nobody-listening".to_string()]);

        let mut notices = feed.subscribe_notices();
        let mut preview = feed.subscribe_preview();
        feed.registry_changed(&["Lobby".to_string()]);
        let command = Command::new(CommandTarget::Layout, serde_json::json!({"mode": "wide"}));
        feed.command_mirrored(&command);

        assert_eq!(
            notices.try_recv().expect("notice"),
            Notice::RegistryChanged {
                names: vec!["Lobby".to_string()]
            }
        );
        assert_eq!(preview.try_recv().expect("mirror"), command);
    }

    #[test]
    fn notice_serializes_with_type_tag() {
        let notice = Notice::RegistryChanged {
            names: vec!["Cafe".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&notice).expect("encode"),
            serde_json::json!({"type": "registry_changed", "names": ["Cafe"]})
        );
    }
}
