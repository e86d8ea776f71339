use crate::store::{ZoneCommitter, ZoneStore};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use signage_core::wire::encode_text;
use signage_core::{Command, Zone};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ZoneEntry {
    pub command: Command,
    pub updated_at: DateTime<Utc>,
}

/// Last broadcast command per zone, so late joiners converge without the
/// operator re-sending anything.
pub struct ZoneCache {
    entries: BTreeMap<Zone, ZoneEntry>,
    committer: ZoneCommitter,
    max_frame_bytes: usize,
}

impl ZoneCache {
    pub fn new(committer: ZoneCommitter, max_frame_bytes: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            committer,
            max_frame_bytes,
        }
    }

    /// Seeds from the persisted snapshot. A failed load starts empty.
    pub fn load(store: &dyn ZoneStore, committer: ZoneCommitter, max_frame_bytes: usize) -> Self {
        let mut cache = Self::new(committer, max_frame_bytes);
        match store.load() {
            Ok(zones) => {
                let now = Utc::now();
                for (zone, command) in zones {
                    cache.entries.insert(
                        zone,
                        ZoneEntry {
                            command,
                            updated_at: now,
                        },
                    );
                }
                info!(event = "zone_cache_loaded", zones = cache.entries.len());
            }
            Err(err) => {
                warn!(event = "zone_cache_load_failed", error = %err);
            }
        }
        cache
    }

    /// Overwrites the zone and hands the command to persistence.
    pub fn put(&mut self, zone: Zone, command: Command) {
        self.committer.submit(zone, command.clone());
        self.entries.insert(
            zone,
            ZoneEntry {
                command,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, zone: Zone) -> Option<&ZoneEntry> {
        self.entries.get(&zone)
    }

    /// Sends every cached zone to one transport, ticker then banner then main
    /// content. Returns how many frames were queued.
    pub fn replay(&self, transport: &Transport) -> usize {
        let mut sent = 0;
        for zone in Zone::REPLAY_ORDER {
            let Some(entry) = self.entries.get(&zone) else {
                continue;
            };
            let text = match encode_text(&entry.command, self.max_frame_bytes) {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "replay_encode_error", zone = %zone, error = %err);
                    continue;
                }
            };
            match transport.deliver(Arc::from(text)) {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(
                        event = "replay_failed",
                        conn_id = transport.conn_id(),
                        zone = %zone,
                        error = %err
                    );
                    break;
                }
            }
        }
        sent
    }

    pub fn snapshot(&self) -> BTreeMap<Zone, Command> {
        self.entries
            .iter()
            .map(|(zone, entry)| (*zone, entry.command.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryZoneStore;
    use crate::transport::Outbound;
    use serde_json::json;
    use signage_core::wire::DEFAULT_MAX_FRAME_BYTES;
    use signage_core::CommandTarget;

    fn cache() -> ZoneCache {
        ZoneCache::new(ZoneCommitter::disabled(), DEFAULT_MAX_FRAME_BYTES)
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<Outbound>) -> Vec<Command> {
        let mut out = Vec::new();
        while let Ok(Outbound::Text(text)) = rx.try_recv() {
            out.push(serde_json::from_str(&text).expect("command json"));
        }
        out
    }

    #[test]
    fn replay_sends_latest_per_zone_in_fixed_order() {
        let mut cache = cache();
        let main = Command::new(CommandTarget::MainZone, json!({"videoUrl": "loop.mp4"}))
            .with_content_type("localVideo");
        let old_ticker = Command::new(CommandTarget::Ticker, json!({"messages": ["old"]}));
        let ticker = Command::new(CommandTarget::Ticker, json!({"messages": ["new"]}));
        cache.put(Zone::MainContent, main.clone());
        cache.put(Zone::Ticker, old_ticker);
        cache.put(Zone::Ticker, ticker.clone());

        let (transport, mut rx) = crate::transport::Transport::channel(1, 8);
        assert_eq!(cache.replay(&transport), 2);
        assert_eq!(drain(&mut rx), vec![ticker, main]);
    }

    #[test]
    fn empty_cache_replays_nothing() {
        let (transport, mut rx) = crate::transport::Transport::channel(1, 8);
        assert_eq!(cache().replay(&transport), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn load_seeds_snapshot_from_store() {
        let banner = Command::new(CommandTarget::Banner, json!({"images": ["a.jpg"]}));
        let store = MemoryZoneStore::seeded(BTreeMap::from([(Zone::Banner, banner.clone())]));
        let cache = ZoneCache::load(&store, ZoneCommitter::disabled(), DEFAULT_MAX_FRAME_BYTES);

        assert_eq!(cache.snapshot(), BTreeMap::from([(Zone::Banner, banner)]));
        assert!(cache.get(Zone::Ticker).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn put_persists_through_committer() {
        let store = Arc::new(MemoryZoneStore::new());
        let (committer, handle) = ZoneCommitter::spawn(store.clone());
        let mut cache = ZoneCache::new(committer, DEFAULT_MAX_FRAME_BYTES);
        let ticker = Command::new(CommandTarget::Ticker, json!({"messages": ["hello"]}));
        cache.put(Zone::Ticker, ticker.clone());
        drop(cache);
        handle.await.expect("committer join");

        assert_eq!(store.load().expect("load").get(&Zone::Ticker), Some(&ticker));
    }
}
