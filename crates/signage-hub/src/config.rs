use clap::Parser;
use signage_core::Zone;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DATA_DIR: &str = ".signage";
pub const DEFAULT_LOG_DIR: &str = ".signage/logs";

/// Smallest writer queue that holds a full zone replay plus a ping.
pub const MIN_QUEUE_CAPACITY: usize = Zone::REPLAY_ORDER.len() + 1;

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub addr: String,
    pub data_dir: PathBuf,
    pub log_dir: String,
    pub debug: bool,
    pub persist: bool,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub max_frame_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            debug: false,
            persist: true,
            ping_interval: Duration::from_secs(10),
            write_timeout: Duration::from_secs(2),
            queue_capacity: 64,
            max_frame_bytes: signage_core::wire::DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "signage-hub", about = "Display registry and command fan-out for signage zones")]
pub struct Args {
    #[arg(long, default_value = "")]
    pub addr: String,
    #[arg(long, default_value = "")]
    pub data_dir: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value_t = false)]
    pub no_persist: bool,
    /// Seconds between websocket pings, 0 disables.
    #[arg(long, default_value_t = 10)]
    pub ping_interval: u64,
    #[arg(long, default_value_t = 2)]
    pub write_timeout: u64,
    #[arg(long, default_value_t = 64)]
    pub queue_capacity: usize,
}

impl HubConfig {
    pub fn load() -> Self {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Self {
        let defaults = Self::default();
        Self {
            addr: resolve(&args.addr, "SIGNAGE_HUB_ADDR", DEFAULT_ADDR),
            data_dir: PathBuf::from(resolve(&args.data_dir, "SIGNAGE_DATA_DIR", DEFAULT_DATA_DIR)),
            log_dir: resolve(&args.log_dir, "SIGNAGE_LOG_DIR", DEFAULT_LOG_DIR),
            debug: args.debug || env_true("SIGNAGE_HUB_DEBUG"),
            persist: !args.no_persist,
            ping_interval: Duration::from_secs(args.ping_interval),
            write_timeout: Duration::from_secs(args.write_timeout.max(1)),
            queue_capacity: args.queue_capacity.max(MIN_QUEUE_CAPACITY),
            max_frame_bytes: defaults.max_frame_bytes,
        }
    }
}

/// Flag wins, then the environment, then the default.
fn resolve(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
