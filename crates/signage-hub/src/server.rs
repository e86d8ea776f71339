use crate::cache::ZoneCache;
use crate::config::{HubConfig, MIN_QUEUE_CAPACITY};
use crate::hub::{Hub, HubError, HubHandle};
use crate::observer::{Notice, NoticeFeed};
use crate::registry::SessionRegistry;
use crate::router::CommandRouter;
use crate::store::{JsonZoneStore, MemoryZoneStore, ZoneCommitter, ZoneStore};
use crate::transport::{ConnId, DeliveryError, Outbound, Transport};
use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use signage_core::Command;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, info, warn};

/// How long shutdown waits for queued zone commits to reach the store.
pub const COMMIT_DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
struct ConnSettings {
    ping_interval: Duration,
    write_timeout: Duration,
    queue_capacity: usize,
    max_frame_bytes: usize,
}

#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    feed: NoticeFeed,
    settings: ConnSettings,
}

/// The running control plane: hub loop, persistence worker and the
/// handles the HTTP surface needs.
pub struct Controller {
    pub hub: HubHandle,
    pub feed: NoticeFeed,
    settings: ConnSettings,
    hub_task: JoinHandle<()>,
    commit_task: JoinHandle<()>,
}

impl Controller {
    pub fn start(config: &HubConfig, store: Arc<dyn ZoneStore>) -> Self {
        let feed = NoticeFeed::new();
        let (committer, commit_task) = ZoneCommitter::spawn(store.clone());
        let cache = ZoneCache::load(store.as_ref(), committer, config.max_frame_bytes);
        let registry = SessionRegistry::new(Arc::new(feed.clone()));
        let router = CommandRouter::new(Arc::new(feed.clone()), config.max_frame_bytes);
        let (hub, handle) = Hub::new(registry, cache, router, config.max_frame_bytes);
        let hub_task = tokio::spawn(hub.run());
        Self {
            hub: handle,
            feed,
            settings: ConnSettings {
                ping_interval: config.ping_interval,
                write_timeout: config.write_timeout,
                queue_capacity: config.queue_capacity.max(MIN_QUEUE_CAPACITY),
                max_frame_bytes: config.max_frame_bytes,
            },
            hub_task,
            commit_task,
        }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            feed: self.feed.clone(),
            settings: self.settings.clone(),
        };
        Router::new()
            .route("/ws", get(display_ws))
            .route("/command", post(post_command))
            .route("/state", get(get_state))
            .route("/displays", get(get_displays))
            .route("/preview", get(preview_ws))
            .route("/events", get(events_ws))
            .route("/health", get(|| async { "ok" }))
            .with_state(state)
    }

    /// Stops the hub loop, then gives queued zone commits up to `grace` to
    /// reach the store.
    pub async fn shutdown(self, grace: Duration) {
        let Self {
            hub,
            hub_task,
            commit_task,
            ..
        } = self;
        if hub.stop().await.is_ok() {
            let _ = hub_task.await;
        }
        if tokio::time::timeout(grace, commit_task).await.is_err() {
            warn!(event = "zone_commit_drain_timeout", grace_ms = grace.as_millis() as u64);
        }
    }
}

pub async fn run(config: HubConfig) -> Result<(), HubError> {
    let addr: SocketAddr = config.addr.parse().map_err(|err: std::net::AddrParseError| {
        HubError::InvalidAddr {
            addr: config.addr.clone(),
            reason: err.to_string(),
        }
    })?;
    let store: Arc<dyn ZoneStore> = if config.persist {
        Arc::new(JsonZoneStore::new(config.data_dir.clone()))
    } else {
        Arc::new(MemoryZoneStore::new())
    };
    let controller = Controller::start(&config, store);
    let listener = TcpListener::bind(addr).await?;
    info!(
        event = "hub_start",
        addr = %addr,
        data_dir = %config.data_dir.display(),
        persist = config.persist
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let served = serve(listener, controller.router(), shutdown).await;
    controller.shutdown(COMMIT_DRAIN_GRACE).await;
    info!(event = "hub_stop");
    served
}

pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<(), HubError>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

async fn display_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let max = state.settings.max_frame_bytes;
    ws.max_message_size(max.saturating_mul(2))
        .on_upgrade(move |socket| handle_display_socket(state, socket, remote))
}

async fn handle_display_socket(state: AppState, socket: WebSocket, remote: SocketAddr) {
    let (ws_sender, ws_receiver) = socket.split();
    drive_display(state.hub, state.settings, ws_sender, ws_receiver, Some(remote)).await;
}

/// Pumps one display connection until it closes, then reports exactly one
/// `Closed` event. A dead writer ends the connection even with pings off.
async fn drive_display<S, R, E>(
    hub: HubHandle,
    settings: ConnSettings,
    sink: S,
    mut stream: R,
    remote: Option<SocketAddr>,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let conn_id = hub.next_conn_id();
    let (transport, rx) = Transport::channel(conn_id, settings.queue_capacity);
    let mut write_task = tokio::spawn(writer_loop(conn_id, sink, rx, settings.write_timeout));

    if hub.opened(transport.clone(), remote).await.is_err() {
        warn!(event = "hub_unavailable", conn_id = conn_id);
        return;
    }

    let mut ping = ping_timer(settings.ping_interval);
    let mut writer_done = false;
    let reason = loop {
        tokio::select! {
            incoming = stream.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(event = "protocol_error", conn_id = conn_id, error = %err);
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break "disconnect",
                    Some(Err(err)) => {
                        warn!(event = "read_error", conn_id = conn_id, error = %err);
                        break "read_error";
                    }
                };
                if hub.frame(conn_id, text).await.is_err() {
                    break "hub_stopped";
                }
            }
            _ = &mut write_task => {
                writer_done = true;
                break "write_failed";
            }
            _ = next_ping(&mut ping) => {
                if transport.ping() == Err(DeliveryError::Closed) {
                    warn!(event = "ping_failed", conn_id = conn_id);
                    break "write_failed";
                }
            }
        }
    };

    let _ = hub.closed(conn_id, reason).await;
    drop(transport);
    if !writer_done {
        let _ = tokio::time::timeout(settings.write_timeout, write_task).await;
    }
}

async fn writer_loop<S>(
    conn_id: ConnId,
    mut sink: S,
    mut rx: tokio::sync::mpsc::Receiver<Outbound>,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        let message = match frame {
            Outbound::Text(text) => Message::Text(text.to_string()),
            Outbound::Ping => Message::Ping(Vec::new()),
        };
        match tokio::time::timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(event = "write_error", conn_id = conn_id, error = %err);
                return;
            }
            Err(_) => {
                warn!(event = "write_timeout", conn_id = conn_id);
                return;
            }
        }
    }
    let _ = sink.close().await;
}

fn ping_timer(interval: Duration) -> Option<Interval> {
    if interval.is_zero() {
        return None;
    }
    Some(tokio::time::interval_at(Instant::now() + interval, interval))
}

async fn next_ping(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn post_command(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    Json(command): Json<Command>,
) -> Response {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.hub.dispatch(command).await {
        Ok(report) => Json(report).into_response(),
        Err(HubError::Rejected(err)) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn get_state(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.hub.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn get_displays(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    match state.hub.displays().await {
        Ok(names) => Json(names).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}

async fn preview_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let rx = state.feed.subscribe_preview();
    ws.on_upgrade(move |socket| forward_feed(socket, rx, None::<Command>, "preview"))
        .into_response()
}

async fn events_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    if !addr.ip().is_loopback() {
        return StatusCode::FORBIDDEN.into_response();
    }
    let rx = state.feed.subscribe_notices();
    let initial = match state.hub.displays().await {
        Ok(names) => Some(Notice::RegistryChanged { names }),
        Err(_) => None,
    };
    ws.on_upgrade(move |socket| forward_feed(socket, rx, initial, "events"))
        .into_response()
}

/// Pushes a broadcast feed to one observer socket until either side goes away.
async fn forward_feed<T>(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<T>,
    initial: Option<T>,
    feed: &'static str,
) where
    T: Serialize + Clone + Send + 'static,
{
    if let Some(item) = initial {
        if !send_json(&mut socket, &item).await {
            return;
        }
    }
    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Ok(item) => {
                    if !send_json(&mut socket, &item).await {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(event = "observer_lagged", feed = feed, skipped = skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(event = "observer_closed", feed = feed);
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, item: &T) -> bool {
    match serde_json::to_string(item) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(err) => {
            warn!(event = "observer_encode_error", error = %err);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use signage_core::{CommandTarget, Zone};
    use tempfile::TempDir;

    fn quiet_config() -> HubConfig {
        HubConfig {
            ping_interval: Duration::ZERO,
            write_timeout: Duration::from_secs(1),
            persist: false,
            ..HubConfig::default()
        }
    }

    async fn wait_for_names(hub: &HubHandle, expected: &[&str]) -> bool {
        for _ in 0..150 {
            let names = hub.displays().await.expect("displays");
            if names == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broken_writer_closes_session_with_pings_disabled() {
        let config = quiet_config();
        let controller = Controller::start(&config, Arc::new(MemoryZoneStore::new()));
        let hello = json!({"type": "register", "name": "Lobby"}).to_string();
        // the display says hello once and then stays silent forever
        let stream = futures_util::stream::iter(vec![Ok::<_, String>(Message::Text(hello))])
            .chain(futures_util::stream::pending());
        let sink = Box::pin(futures_util::sink::unfold((), |(), _message: Message| async {
            Err::<(), _>("broken pipe")
        }));
        let conn = tokio::spawn(drive_display(
            controller.hub.clone(),
            controller.settings.clone(),
            sink,
            stream,
            None,
        ));
        assert!(wait_for_names(&controller.hub, &["Lobby"]).await);

        controller
            .hub
            .dispatch(Command::new(CommandTarget::Layout, json!({"mode": "wide"})))
            .await
            .expect("dispatch");

        assert!(wait_for_names(&controller.hub, &[]).await);
        tokio::time::timeout(Duration::from_secs(2), conn)
            .await
            .expect("connection task ends")
            .expect("join");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_flushes_queued_zone_commits() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(JsonZoneStore::new(dir.path().join("state")));
        let controller = Controller::start(&quiet_config(), store.clone());

        let banner = Command::new(CommandTarget::Banner, json!({"images": ["a.jpg"]}))
            .with_content_type("carousel");
        let report = controller.hub.dispatch(banner.clone()).await.expect("dispatch");
        assert_eq!(report.cached, Some(Zone::Banner));
        controller.shutdown(COMMIT_DRAIN_GRACE).await;

        assert!(store.zone_path(Zone::Banner).exists());
        assert_eq!(store.load().expect("load").get(&Zone::Banner), Some(&banner));
    }
}
