use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub mod wire;

/// `targetId` value addressing every connected display.
pub const BROADCAST_TARGET: &str = "ALL";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum CommandTarget {
    Ticker,
    Banner,
    MainZone,
    Layout,
    Style,
    Spotify,
}

impl CommandTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandTarget::Ticker => "ticker",
            CommandTarget::Banner => "banner",
            CommandTarget::MainZone => "mainZone",
            CommandTarget::Layout => "layout",
            CommandTarget::Style => "style",
            CommandTarget::Spotify => "spotify",
        }
    }

    /// Zone whose shared state this target rewrites. Layout, style and spotify
    /// commands are transient and have no zone.
    pub fn zone(&self) -> Option<Zone> {
        match self {
            CommandTarget::Ticker => Some(Zone::Ticker),
            CommandTarget::Banner => Some(Zone::Banner),
            CommandTarget::MainZone => Some(Zone::MainContent),
            CommandTarget::Layout | CommandTarget::Style | CommandTarget::Spotify => None,
        }
    }
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcast-addressable display regions. Declaration order is replay order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Zone {
    Ticker,
    Banner,
    MainContent,
}

impl Zone {
    pub const REPLAY_ORDER: [Zone; 3] = [Zone::Ticker, Zone::Banner, Zone::MainContent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Ticker => "ticker",
            Zone::Banner => "banner",
            Zone::MainContent => "mainContent",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a command is addressed to once `targetId` defaults are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient<'a> {
    All,
    Display(&'a str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub target: CommandTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

impl Command {
    pub fn new(target: CommandTarget, content: Value) -> Self {
        Self {
            target,
            content_type: None,
            content,
            target_id: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    /// An absent or empty `targetId` means broadcast.
    pub fn resolved_target_id(&self) -> &str {
        match self.target_id.as_deref() {
            Some(value) if !value.is_empty() => value,
            _ => BROADCAST_TARGET,
        }
    }

    pub fn recipient(&self) -> Recipient<'_> {
        match self.resolved_target_id() {
            BROADCAST_TARGET => Recipient::All,
            name => Recipient::Display(name),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.recipient(), Recipient::All)
    }

    pub fn zone(&self) -> Option<Zone> {
        self.target.zone()
    }

    /// Zone this command overwrites in the shared cache, if any. Only
    /// broadcast commands for a zone qualify; targeted ones diverge per display.
    pub fn cache_zone(&self) -> Option<Zone> {
        if self.is_broadcast() {
            self.zone()
        } else {
            None
        }
    }
}
