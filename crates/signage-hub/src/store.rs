use signage_core::{Command, Zone};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable home of the shared zone state, so it survives controller restarts.
pub trait ZoneStore: Send + Sync {
    fn load(&self) -> Result<BTreeMap<Zone, Command>, StoreError>;
    fn commit(&self, zone: Zone, command: &Command) -> Result<(), StoreError>;
}

/// One pretty-printed JSON file per zone, each holding the whole last command.
pub struct JsonZoneStore {
    dir: PathBuf,
}

impl JsonZoneStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn zone_path(&self, zone: Zone) -> PathBuf {
        self.dir.join(format!("{}.json", zone.as_str()))
    }
}

impl ZoneStore for JsonZoneStore {
    fn load(&self) -> Result<BTreeMap<Zone, Command>, StoreError> {
        let mut state = BTreeMap::new();
        for zone in Zone::REPLAY_ORDER {
            let path = self.zone_path(zone);
            let raw = match fs::read_to_string(&path) {
                Ok(value) => value,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!(event = "zone_load_failed", zone = %zone, path = %path.display(), error = %err);
                    continue;
                }
            };
            match serde_json::from_str::<Command>(&raw) {
                Ok(command) => {
                    state.insert(zone, command);
                }
                Err(err) => {
                    warn!(event = "zone_load_corrupt", zone = %zone, path = %path.display(), error = %err);
                }
            }
        }
        Ok(state)
    }

    fn commit(&self, zone: Zone, command: &Command) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(command)?;
        let path = self.zone_path(zone);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Process-local store for tests and `--no-persist`.
#[derive(Default)]
pub struct MemoryZoneStore {
    zones: Mutex<BTreeMap<Zone, Command>>,
}

impl MemoryZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(zones: BTreeMap<Zone, Command>) -> Self {
        Self {
            zones: Mutex::new(zones),
        }
    }
}

impl ZoneStore for MemoryZoneStore {
    fn load(&self) -> Result<BTreeMap<Zone, Command>, StoreError> {
        self.zones
            .lock()
            .map(|zones| zones.clone())
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }

    fn commit(&self, zone: Zone, command: &Command) -> Result<(), StoreError> {
        let mut zones = self
            .zones
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))?;
        zones.insert(zone, command.clone());
        Ok(())
    }
}

struct ZoneCommit {
    zone: Zone,
    command: Command,
}

/// Fire-and-forget persistence. Commits run in order on a background task
/// so a slow disk never stalls dispatch; failures are only logged.
#[derive(Clone)]
pub struct ZoneCommitter {
    tx: Option<mpsc::UnboundedSender<ZoneCommit>>,
}

impl ZoneCommitter {
    pub fn spawn(store: Arc<dyn ZoneStore>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ZoneCommit>();
        let handle = tokio::spawn(async move {
            while let Some(ZoneCommit { zone, command }) = rx.recv().await {
                let store = store.clone();
                let result =
                    tokio::task::spawn_blocking(move || store.commit(zone, &command)).await;
                match result {
                    Ok(Ok(())) => debug!(event = "zone_committed", zone = %zone),
                    Ok(Err(err)) => {
                        warn!(event = "zone_commit_failed", zone = %zone, error = %err)
                    }
                    Err(err) => {
                        warn!(event = "zone_commit_failed", zone = %zone, error = %err)
                    }
                }
            }
        });
        (Self { tx: Some(tx) }, handle)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn submit(&self, zone: Zone, command: Command) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(ZoneCommit { zone, command }).is_err() {
            warn!(event = "zone_commit_failed", zone = %zone, error = "committer stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use signage_core::CommandTarget;
    use tempfile::TempDir;

    fn banner() -> Command {
        Command::new(CommandTarget::Banner, json!({"images": ["a.jpg", "b.jpg"]}))
            .with_content_type("carousel")
            .with_target_id("ALL")
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let store = JsonZoneStore::new(dir.path().join("state"));
        store.commit(Zone::Banner, &banner()).expect("commit");

        let reopened = JsonZoneStore::new(dir.path().join("state"));
        let state = reopened.load().expect("load");
        assert_eq!(state.len(), 1);
        assert_eq!(state.get(&Zone::Banner), Some(&banner()));
        assert!(reopened.zone_path(Zone::Banner).ends_with("banner.json"));
        assert!(!reopened.zone_path(Zone::Banner).with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_zone_file_is_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let store = JsonZoneStore::new(dir.path());
        store.commit(Zone::Banner, &banner()).expect("commit");
        fs::write(store.zone_path(Zone::Ticker), "{not json").expect("write corrupt");

        let state = store.load().expect("load");
        assert!(state.get(&Zone::Ticker).is_none());
        assert!(state.get(&Zone::Banner).is_some());
    }

    #[test]
    fn missing_directory_loads_empty() {
        let dir = TempDir::new().expect("tempdir");
        let store = JsonZoneStore::new(dir.path().join("never-created"));
        assert!(store.load().expect("load").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn committer_applies_commits_in_order() {
        let store = Arc::new(MemoryZoneStore::new());
        let (committer, handle) = ZoneCommitter::spawn(store.clone());

        let first = Command::new(CommandTarget::Ticker, json!({"messages": ["one"]}));
        let second = Command::new(CommandTarget::Ticker, json!({"messages": ["two"]}));
        committer.submit(Zone::Ticker, first);
        committer.submit(Zone::Ticker, second.clone());
        drop(committer);
        handle.await.expect("committer join");

        assert_eq!(store.load().expect("load").get(&Zone::Ticker), Some(&second));
    }
}
