//! Boundary adapter: WebSocket endpoint channel plus the HTTP API
//!
//! One listener serves both surfaces. `/ws` upgrades to the bidirectional
//! event channel; `/api/ice-servers` hands out connectivity-establishment
//! servers with freshly minted relay credentials. Connection acceptance is
//! gated by the abuse guard first and the connection limiter second, and
//! every HTTP response carries the standard security headers.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use ferry_core::turn::{ice_servers, IceServer};
use ferry_core::{Config, FieldCipher, Reject, TurnConfig};

use crate::audit::{AuditEntry, AuditLevel, AuditLog};
use crate::caps::SessionCaps;
use crate::guard::{AbuseGuard, ConnectVerdict};
use crate::hub::SignalHub;
use crate::limiter::WindowLimiter;
use crate::messages::{ClientEvent, ServerEvent};
use crate::registry::ShareRegistry;
use crate::rooms::{PeerHandle, PeerMap};
use crate::storage::ShareStore;
use crate::sweeper::Sweeper;

/// Hard ceiling on the graceful shutdown drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything the handlers share
pub struct ServerState {
    pub hub: SignalHub,
    pub peers: Arc<PeerMap>,
    pub guard: Arc<AbuseGuard>,
    pub audit: Arc<AuditLog>,
    pub store: Arc<ShareStore>,
    pub registry: Arc<ShareRegistry>,
    pub caps: Arc<SessionCaps>,
    pub conn_limiter: Arc<WindowLimiter>,
    pub upload_limiter: Arc<WindowLimiter>,
    pub join_limiter: Arc<WindowLimiter>,
    pub turn: Option<TurnConfig>,
    pub client_url: Option<String>,
}

impl ServerState {
    /// Wire up every service from deployment configuration
    pub fn from_config(
        config: &Config,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let store = if config.database_url == ":memory:" {
            ShareStore::in_memory()?
        } else {
            ShareStore::open(&config.database_url)?
        };

        let cipher = FieldCipher::from_key_material(
            config.metadata_key.as_deref(),
            config.production,
        )?;

        let store = Arc::new(store);
        let registry = Arc::new(ShareRegistry::new());
        let peers = Arc::new(PeerMap::new());
        let audit = Arc::new(AuditLog::new());
        let guard = Arc::new(AbuseGuard::new(audit.clone()));
        let caps = Arc::new(SessionCaps::new());
        let conn_limiter = Arc::new(WindowLimiter::for_connections());
        let upload_limiter = Arc::new(WindowLimiter::for_uploads());
        let join_limiter = Arc::new(WindowLimiter::for_joins());

        let hub = SignalHub::new(
            store.clone(),
            registry.clone(),
            peers.clone(),
            Arc::new(cipher),
            audit.clone(),
            guard.clone(),
            caps.clone(),
            upload_limiter.clone(),
            join_limiter.clone(),
        );

        Ok(Arc::new(Self {
            hub,
            peers,
            guard,
            audit,
            store,
            registry,
            caps,
            conn_limiter,
            upload_limiter,
            join_limiter,
            turn: config.turn.clone(),
            client_url: config.client_url.clone(),
        }))
    }
}

/// Build the HTTP router
pub fn build_router(state: Arc<ServerState>) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    if let Some(origin) = &state.client_url {
        match origin.parse::<HeaderValue>() {
            Ok(value) => cors = cors.allow_origin(value),
            Err(_) => warn!("CLIENT_URL {:?} is not a valid origin, CORS stays closed", origin),
        }
    }

    // Layers run outside-in, so the header middleware goes on last: every
    // response gets the security headers, CORS preflights included.
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/ice-servers", get(ice_handler))
        .route("/healthz", get(health_handler))
        .layer(cors)
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

/// Run the server until shutdown
pub async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = ServerState::from_config(&config)?;

    WindowLimiter::spawn_sweeper(state.conn_limiter.clone());
    WindowLimiter::spawn_sweeper(state.upload_limiter.clone());
    WindowLimiter::spawn_sweeper(state.join_limiter.clone());

    Arc::new(Sweeper::new(
        state.store.clone(),
        state.registry.clone(),
        state.guard.clone(),
        state.caps.clone(),
        state.audit.clone(),
    ))
    .spawn();

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Signal server listening on {}", addr);

    let (close_tx, close_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = close_rx.await;
        })
        .await
    });

    shutdown_signal().await;
    info!("Shutdown requested, draining connections");
    let _ = close_tx.send(());

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(joined) => joined??,
        Err(_) => warn!(
            "Connections still open after {:?}, forcing exit",
            SHUTDOWN_GRACE
        ),
    }

    info!("Signal server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let ip = addr.ip();

    let denial = match state.guard.track_connect(ip) {
        ConnectVerdict::Allowed => {
            let decision = state.conn_limiter.check(&ip.to_string());
            if decision.allowed {
                None
            } else {
                state.guard.mark_suspicious(ip, "connection-rate-limit");
                Some(Reject::RateLimited {
                    wait_secs: decision.wait_secs(),
                })
            }
        }
        ConnectVerdict::Rejected { retry_in } => Some(Reject::RateLimited {
            wait_secs: retry_in.as_secs().max(1),
        }),
        ConnectVerdict::Blocked { remaining } => Some(Reject::Blocked {
            remaining_mins: (remaining.as_secs() + 59) / 60,
        }),
    };

    if let Some(reject) = denial {
        state.audit.record(
            AuditEntry::new(AuditLevel::Warn, "connection-rejected")
                .ip(ip)
                .details(serde_json::json!({ "kind": reject.kind() })),
        );
        // Finish the handshake so the client gets one error event, then
        // close. Best effort on a connection we are refusing anyway.
        return ws
            .on_upgrade(move |socket| refuse_socket(socket, reject))
            .into_response();
    }

    ws.on_upgrade(move |socket| endpoint_session(socket, ip, state))
        .into_response()
}

async fn refuse_socket(mut socket: WebSocket, reject: Reject) {
    if let Ok(json) = ServerEvent::rejection(&reject).to_json() {
        let _ = socket.send(Message::Text(json)).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// One accepted endpoint connection, from hello to teardown
async fn endpoint_session(socket: WebSocket, ip: IpAddr, state: Arc<ServerState>) {
    let peer_id = generate_peer_id();
    debug!("New endpoint {} from {}", peer_id, ip);

    let (tx, mut rx) = mpsc::unbounded_channel();
    state.peers.connect(&peer_id, PeerHandle { tx, ip });

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let event = match outbound {
                    Some(event) => event,
                    None => break,
                };
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Outbound event serialization failed: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }

            inbound = ws_rx.next() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("WebSocket error from {}: {:?}", peer_id, e);
                        break;
                    }
                };

                match ClientEvent::from_json(&text) {
                    Ok(event) => state.hub.handle_event(&peer_id, event).await,
                    Err(e) => {
                        debug!("Unparseable event from {}: {}", peer_id, e);
                        state.peers.send(
                            &peer_id,
                            ServerEvent::rejection(&Reject::InvalidInput(
                                "Malformed event".into(),
                            )),
                        );
                    }
                }
            }
        }
    }

    // Room and registry state go first; the guard's accounting runs on a
    // fully torn-down endpoint.
    state.hub.handle_disconnect(&peer_id, ip).await;
    state.guard.track_disconnect(ip);
    debug!("Endpoint {} closed", peer_id);
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IceServersResponse {
    ice_servers: Vec<IceServer>,
}

async fn ice_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(IceServersResponse {
        ice_servers: ice_servers(state.turn.as_ref()),
    })
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "connections": state.peers.connection_count(),
            "rooms": state.peers.room_count(),
        })),
    )
}

/// Attach the standard security headers to every response
async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; style-src 'self'; object-src 'none'; frame-ancestors 'none'",
        ),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains; preload"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("camera=(), microphone=(), geolocation=(), payment=()"),
    );

    response
}

/// Opaque per-connection endpoint id
fn generate_peer_id() -> String {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("RNG failed");
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some(":memory:".to_string()),
            "METADATA_ENCRYPTION_KEY" => Some("f".repeat(64)),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn test_state_from_config() {
        let state = ServerState::from_config(&test_config()).unwrap();
        assert_eq!(state.peers.connection_count(), 0);
        assert!(state.turn.is_none());
    }

    #[test]
    fn test_peer_id_generation() {
        let a = generate_peer_id();
        let b = generate_peer_id();
        assert_eq!(a.len(), 16); // 8 bytes as hex
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_router_builds() {
        let state = ServerState::from_config(&test_config()).unwrap();
        let _router = build_router(state);
    }
}
