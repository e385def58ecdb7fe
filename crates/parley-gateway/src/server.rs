//! WebSocket gateway server.

use crate::api;
use crate::auth::CredentialVerifier;
use crate::chat::ChatService;
use crate::clock::{Clock, SystemClock};
use crate::error::GatewayError;
use crate::presence::ConnectionId;
use crate::protocol::ServerEvent;
use crate::session::{Flow, Session};
use crate::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parley_core::config::BindMode;
use parley_core::Config;
use parley_store::MessageStore;
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Origins allowed by the CORS layer.
const ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost",
    "http://127.0.0.1",
    "https://localhost",
    "https://127.0.0.1",
];

/// How long the writer gets to flush queued frames after the session ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway server state.
pub struct GatewayState {
    /// Chat operations, presence and rooms.
    pub chat: Arc<ChatService>,

    /// Credential verifier.
    pub verifier: Arc<dyn CredentialVerifier>,

    /// Configuration.
    pub config: Config,

    next_conn: AtomicU64,
    active: AtomicUsize,
}

impl GatewayState {
    pub fn new(config: Config, chat: Arc<ChatService>, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            chat,
            verifier,
            config,
            next_conn: AtomicU64::new(1),
            active: AtomicUsize::new(0),
        }
    }

    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_conn.fetch_add(1, Ordering::Relaxed))
    }

    /// Open WebSocket connections, authenticated or not.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot {
    state: Arc<GatewayState>,
}

impl ConnectionSlot {
    fn acquire(state: &Arc<GatewayState>) -> Option<Self> {
        let max = state.config.gateway.max_connections;
        state
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()?;
        Some(Self {
            state: state.clone(),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The WebSocket gateway server.
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Create a gateway using the system clock.
    pub fn new(
        config: Config,
        store: Arc<dyn MessageStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self::with_clock(config, store, verifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: Config,
        store: Arc<dyn MessageStore>,
        verifier: Arc<dyn CredentialVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let chat = Arc::new(ChatService::new(store, clock, config.chat.clone()));
        Self {
            state: Arc::new(GatewayState::new(config, chat, verifier)),
        }
    }

    pub fn state(&self) -> &Arc<GatewayState> {
        &self.state
    }

    pub fn chat(&self) -> &Arc<ChatService> {
        &self.state.chat
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let addr = self.bind_address();

        if self.state.config.gateway.bind != BindMode::Loopback {
            warn!("========================================");
            warn!("  SECURITY WARNING: Gateway binding to {}", addr);
            warn!("  The gateway is accessible from the network.");
            warn!("========================================");
        }

        let listener = TcpListener::bind(addr).await.map_err(GatewayError::Io)?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr().map_err(GatewayError::Io)?;
        info!("Starting gateway server on {}", addr);

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(GatewayError::Io)?;

        info!("Gateway stopped");
        Ok(())
    }

    /// Create the Axum router.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .merge(api::routes())
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.state.config.gateway.cors {
            router = router.layer(create_cors_layer());
        }

        router
    }

    /// Get the bind address.
    pub fn bind_address(&self) -> SocketAddr {
        let gateway = &self.state.config.gateway;
        SocketAddr::new(gateway.bind_addr(), gateway.port)
    }
}

fn create_cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = ALLOWED_ORIGINS
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Bearer credential from the `Authorization` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> std::result::Result<impl IntoResponse, StatusCode> {
    let Some(slot) = ConnectionSlot::acquire(&state) else {
        warn!(
            "Max connections ({}) reached, rejecting {}",
            state.config.gateway.max_connections, addr
        );
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let credential = bearer_token(&headers).map(str::to_string).or_else(|| {
        params
            .token
            .filter(|_| state.config.auth.allow_query_token)
    });

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, slot, credential, addr)))
}

/// Handle a WebSocket connection.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<GatewayState>,
    slot: ConnectionSlot,
    credential: Option<String>,
    remote_addr: SocketAddr,
) {
    let conn = state.next_connection_id();
    let gateway = &state.config.gateway;
    info!(conn = %conn, remote = %remote_addr, "Client connected");

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(gateway.outbound_buffer);
    let mut writer = tokio::spawn(write_frames(sink, rx, gateway.ping_interval()));

    let mut session = Session::new(conn, state.chat.clone(), state.verifier.clone(), tx);

    // Handshake: header credential, or the first frames within the deadline.
    let mut flow = match credential {
        Some(credential) => session.authenticate(&credential).await,
        None => {
            let deadline = Instant::now() + gateway.handshake_timeout();
            loop {
                match tokio::time::timeout_at(deadline, stream.next()).await {
                    Err(_) => {
                        warn!(conn = %conn, "Handshake timed out");
                        session.reject(
                            "authenticate",
                            &GatewayError::Unauthenticated("handshake timed out".into()),
                        );
                        break Flow::Close;
                    }
                    Ok(Some(Ok(Message::Text(text)))) => {
                        let flow = session.handle_text(&text).await;
                        if flow == Flow::Close || session.is_authenticated() {
                            break flow;
                        }
                    }
                    Ok(Some(Ok(Message::Binary(_)))) => {
                        warn!(conn = %conn, "Binary frame before authentication");
                        session.reject(
                            "authenticate",
                            &GatewayError::Unauthenticated("authenticate first".into()),
                        );
                        break Flow::Close;
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break Flow::Close,
                    Ok(Some(Err(e))) => {
                        debug!(conn = %conn, error = %e, "WebSocket error during handshake");
                        break Flow::Close;
                    }
                    Ok(Some(Ok(_))) => {}
                }
            }
        }
    };

    let mut rate = EventRate::new(gateway.max_events_per_second);
    while flow == Flow::Continue {
        let Some(msg) = stream.next().await else {
            break;
        };
        match msg {
            Ok(Message::Text(text)) => {
                if !rate.check() {
                    session.reject(
                        "unknown",
                        &GatewayError::InvalidInput("rate limit exceeded".into()),
                    );
                    continue;
                }
                flow = session.handle_text(&text).await;
            }
            Ok(Message::Binary(_)) => {
                session.reject(
                    "unknown",
                    &GatewayError::InvalidInput("binary frames are not supported".into()),
                );
            }
            Ok(Message::Close(_)) => {
                debug!(conn = %conn, "Client closed connection");
                break;
            }
            Err(e) => {
                debug!(conn = %conn, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // Dropping the session releases the last sender once presence and rooms
    // let go of the handle, which ends the writer after it flushes.
    session.disconnect();
    drop(session);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        debug!(conn = %conn, "Writer did not drain in time");
        writer.abort();
    }
    drop(slot);

    info!(conn = %conn, "Client disconnected");
}

/// Forward queued events to the socket and keep it alive with pings.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerEvent>,
    ping_interval: Option<Duration>,
) {
    let mut ping = ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let text = match event.to_frame() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode event: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            _ = next_ping(&mut ping) => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Per-connection inbound event limit over one-second windows.
struct EventRate {
    limit: u32,
    window_start: Instant,
    count: u32,
}

impl EventRate {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            window_start: Instant::now(),
            count: 0,
        }
    }

    fn check(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count <= self.limit
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let presence = state.chat.presence();
    Json(serde_json::json!({
        "status": "ok",
        "onlineUsers": presence.online_count(),
        "connections": state.active_connections(),
    }))
}
