//! Live-reload transport.
//!
//! # Responsibilities
//! - Accept browser websocket connections on the reload endpoint
//! - Push `reload` to every connected browser after a route reload
//!
//! # Data Flow
//! ```text
//! Site::reload_routes → LiveReload::notify → broadcast → each socket → "reload"
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; a lagging socket just gets one more reload
//! - Incoming frames are ignored except Close

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tokio::sync::broadcast::{self, error::RecvError};

/// Text frame sent to browsers.
pub const RELOAD_MESSAGE: &str = "reload";

/// Fan-out handle for reload notifications. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LiveReload {
    tx: broadcast::Sender<()>,
}

impl LiveReload {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Tell every connected browser to reload.
    pub fn notify(&self) {
        let clients = self.tx.send(()).unwrap_or(0);
        tracing::debug!(clients, "Live reload sent");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Number of connected browsers.
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LiveReload {
    fn default() -> Self {
        Self::new()
    }
}

/// Upgrade handler for the reload endpoint.
pub async fn reload_socket(State(live): State<LiveReload>, ws: WebSocketUpgrade) -> Response {
    let rx = live.subscribe();
    ws.on_upgrade(move |socket| serve_socket(socket, rx))
}

async fn serve_socket(mut socket: WebSocket, mut rx: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            notice = rx.recv() => match notice {
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    if socket.send(Message::Text(RELOAD_MESSAGE.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("Live reload client disconnected");
}
