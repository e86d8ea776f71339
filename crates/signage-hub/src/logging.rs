use crate::config::HubConfig;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, EnvFilter, Layer, Registry,
};

const LOG_FILE_STEM: &str = "signage-hub";

/// `signage-hub-<port>.log`, so hubs sharing a log dir keep separate files.
pub fn log_file_name(config: &HubConfig) -> String {
    let port = config
        .addr
        .rsplit(':')
        .next()
        .filter(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()));
    match port {
        Some(port) => format!("{LOG_FILE_STEM}-{port}.log"),
        None => format!("{LOG_FILE_STEM}.log"),
    }
}

/// Installs the global subscriber: stdout plus, when the log dir is usable,
/// an append-only plain-text file. Returns the file path in use.
pub fn init_logging(config: &HubConfig) -> Option<PathBuf> {
    let level = if config.debug {
        "debug".to_string()
    } else {
        std::env::var("SIGNAGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file, path) = match open_log_file(&config.log_dir, &log_file_name(config)) {
        Ok(Some((file, path))) => (Some(file), Some(path)),
        Ok(None) => (None, None),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            (None, None)
        }
    };
    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer())
        .with(file.map(file_layer));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    path
}

fn file_layer<S>(file: File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer().with_ansi(false).with_writer(Mutex::new(file))
}

/// `Ok(None)` when file logging is switched off with a blank dir or the dir
/// cannot be created.
fn open_log_file(log_dir: &str, file_name: &str) -> io::Result<Option<(File, PathBuf)>> {
    if log_dir.trim().is_empty() {
        return Ok(None);
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(None);
    }
    let path = dir.join(file_name);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(Some((file, path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(addr: &str, log_dir: &str) -> HubConfig {
        HubConfig {
            addr: addr.to_string(),
            log_dir: log_dir.to_string(),
            ..HubConfig::default()
        }
    }

    #[test]
    fn log_file_is_named_after_the_listen_port() {
        assert_eq!(log_file_name(&HubConfig::default()), "signage-hub-8080.log");
        assert_eq!(log_file_name(&config_for("[::1]:9000", "")), "signage-hub-9000.log");
        assert_eq!(log_file_name(&config_for("localhost", "")), "signage-hub.log");
    }

    #[test]
    fn file_layer_appends_plain_lines() {
        let dir = TempDir::new().expect("tempdir");
        let log_dir = dir.path().join("logs");
        let config = config_for("127.0.0.1:9123", &log_dir.to_string_lossy());

        for event in ["first", "second"] {
            let (file, path) = open_log_file(&config.log_dir, &log_file_name(&config))
                .expect("open")
                .expect("file logging enabled");
            assert!(path.ends_with("signage-hub-9123.log"));
            let subscriber = Registry::default().with(file_layer(file));
            tracing::subscriber::with_default(subscriber, || {
                tracing::warn!(event = event, "zone replay");
            });
        }

        let contents = std::fs::read_to_string(log_dir.join("signage-hub-9123.log"))
            .expect("read log");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("WARN") && lines[0].contains("first"));
        assert!(lines[1].contains("second"));
        assert!(!contents.contains('\u{1b}'));
    }

    #[test]
    fn blank_log_dir_disables_file_output() {
        assert!(open_log_file("  ", "signage-hub.log").expect("open").is_none());
    }
}
