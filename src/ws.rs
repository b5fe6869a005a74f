//! Interactive transport ingress — WebSocket endpoint for live mailbox
//! clients, over TCP or a filesystem-backed socket.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::WsBind;
use crate::error::Result;
use crate::registry::MailboxRegistry;

/// Shared state for the relay WebSocket handlers.
#[derive(Clone)]
struct WsState {
    registry: Arc<MailboxRegistry>,
}

/// Connection parameters: `key` is the access token, `id` the mailbox
/// name. Requests missing either are rejected before the upgrade.
#[derive(Debug, Deserialize)]
struct ConnectQuery {
    key: String,
    id: String,
}

/// Build the Axum router: `/email` upgrades to a WebSocket, every other
/// path is closed without touching the registry.
pub fn relay_routes(registry: Arc<MailboxRegistry>) -> Router {
    Router::new()
        .route("/email", get(ws_handler))
        .fallback(reject_path)
        .with_state(WsState { registry })
}

async fn reject_path() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectQuery>,
    State(state): State<WsState>,
) -> impl IntoResponse {
    debug!(mailbox = %params.id, "relay client connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state.registry, params))
}

async fn handle_socket(mut socket: WebSocket, registry: Arc<MailboxRegistry>, params: ConnectQuery) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn_id = registry.next_conn_id();

    if let Err(e) = registry.register(&params.id, &params.key, conn_id, tx) {
        warn!(mailbox = %params.id, error = %e, "registration rejected");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    info!(mailbox = %params.id, "client connected");

    loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            debug!(mailbox = %params.id, "client disconnected during send");
                            break;
                        }
                    }
                    // Sender dropped: a reconnect replaced this entry.
                    None => {
                        debug!(mailbox = %params.id, "registration replaced by newer connection");
                        break;
                    }
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(mailbox = %params.id, error = %e, "relay socket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Guarded: a stale close must not wipe a newer registration.
    registry.unregister(&params.id, conn_id);
    info!(mailbox = %params.id, "client disconnected");
}

/// Bind the interactive transport and serve it until shutdown.
pub async fn serve(host: &str, bind: &WsBind, registry: Arc<MailboxRegistry>) -> Result<()> {
    let app = relay_routes(registry);
    match bind {
        WsBind::Tcp(port) => {
            let listener = tokio::net::TcpListener::bind((host, *port)).await?;
            info!(host = %host, port = %port, "relay transport listening");
            axum::serve(listener, app).await?;
        }
        #[cfg(unix)]
        WsBind::Unix(path) => {
            use std::os::unix::fs::PermissionsExt;

            if path.exists() {
                std::fs::remove_file(path)?;
            }
            let listener = tokio::net::UnixListener::bind(path)?;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o775))?;
            info!(path = %path.display(), "relay transport listening on socket");
            axum::serve(listener, app).await?;
        }
        #[cfg(not(unix))]
        WsBind::Unix(path) => {
            return Err(crate::error::ConfigError::InvalidValue {
                key: "MAILCAST_WS_BIND".to_string(),
                message: format!(
                    "filesystem socket {} unsupported on this platform",
                    path.display()
                ),
            }
            .into());
        }
    }
    Ok(())
}
