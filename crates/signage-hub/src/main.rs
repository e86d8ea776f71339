use signage_hub::{config::HubConfig, logging::init_logging, server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = HubConfig::load();
    if let Some(path) = init_logging(&config) {
        info!(event = "log_file", path = %path.display());
    }
    if let Err(err) = server::run(config).await {
        error!(event = "hub_error", error = %err);
        std::process::exit(1);
    }
}
