//! Control hub for signage displays: displays register by name over a
//! websocket, operator commands fan out to all or one of them, and the last
//! broadcast per zone is replayed to every display that (re)joins.

pub mod cache;
pub mod config;
pub mod hub;
pub mod logging;
pub mod observer;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod store;
pub mod transport;

pub use cache::{ZoneCache, ZoneEntry};
pub use config::HubConfig;
pub use hub::{Hub, HubError, HubEvent, HubHandle};
pub use observer::{CommandMirror, Notice, NoticeFeed, RegistryObserver};
pub use protocol::{DisplayLink, LinkState, LinkStep, ProtocolError};
pub use registry::{Registration, Session, SessionRegistry};
pub use router::{CommandRouter, DispatchReport};
pub use server::Controller;
pub use store::{JsonZoneStore, MemoryZoneStore, StoreError, ZoneCommitter, ZoneStore};
pub use transport::{ConnId, DeliveryError, Outbound, Transport};
