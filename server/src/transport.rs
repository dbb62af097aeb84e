//! WebSocket transport layer bridging socket I/O and the action queue

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Identifies one live WebSocket connection, valid from open to close.
pub type ConnectionId = u64;

/// Transport events consumed by the dispatcher.
///
/// Events for the same connection arrive in the order they were produced;
/// there is no ordering across connections.
#[derive(Debug)]
pub enum Action {
    Open { conn: ConnectionId },
    Close { conn: ConnectionId },
    Message { conn: ConnectionId, text: String },
}

/// Commands queued to a connection's writer task.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outgoing {
    Text(String),
    Close { reason: String },
}

type PeerMap = Arc<Mutex<HashMap<ConnectionId, UnboundedSender<Outgoing>>>>;

/// Cloneable sending surface of the transport.
///
/// `send` and `close` push onto the target connection's writer queue and never
/// block, so they are safe to call from the dispatcher and tick tasks while
/// holding locks.
#[derive(Clone, Default)]
pub struct Transport {
    peers: PeerMap,
    next_conn: Arc<AtomicU64>,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a text frame. Sending to a departed connection is a no-op.
    pub fn send(&self, conn: ConnectionId, text: &str) {
        self.dispatch(conn, Outgoing::Text(text.to_string()));
    }

    /// Queues a close frame carrying `reason`; the writer task sends it and
    /// stops. The connection's `Close` action follows once the reader exits.
    pub fn close(&self, conn: ConnectionId, reason: &str) {
        self.dispatch(
            conn,
            Outgoing::Close {
                reason: reason.to_string(),
            },
        );
    }

    fn dispatch(&self, conn: ConnectionId, outgoing: Outgoing) {
        let tx = self.peers.lock().unwrap().get(&conn).cloned();
        match tx {
            Some(tx) => {
                if tx.send(outgoing).is_err() {
                    debug!("dropped frame for connection {} (writer gone)", conn);
                }
            }
            None => debug!("dropped frame for unknown connection {}", conn),
        }
    }

    pub(crate) fn next_id(&self) -> ConnectionId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register(&self, conn: ConnectionId, tx: UnboundedSender<Outgoing>) {
        self.peers.lock().unwrap().insert(conn, tx);
    }

    pub(crate) fn unregister(&self, conn: ConnectionId) {
        self.peers.lock().unwrap().remove(&conn);
    }
}

/// Accepts WebSocket connections and pumps their events into the action queue.
pub async fn run(listener: TcpListener, transport: Transport, actions: UnboundedSender<Action>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    transport.clone(),
                    actions.clone(),
                ));
            }
            Err(e) => {
                warn!("failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    transport: Transport,
    actions: UnboundedSender<Action>,
) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("websocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let conn = transport.next_id();
    info!("connection {} opened from {}", conn, addr);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    transport.register(conn, tx);

    let writer = tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            let result = match outgoing {
                Outgoing::Text(text) => ws_tx.send(Message::Text(text)).await,
                Outgoing::Close { reason } => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: reason.into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
            };
            if let Err(e) = result {
                debug!("write to connection {} failed: {}", conn, e);
                break;
            }
        }
    });

    let _ = actions.send(Action::Open { conn });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                trace!("connection {} sent: {}", conn, text);
                if actions.send(Action::Message { conn, text }).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(_) => debug!("connection {} sent a non-text frame", conn),
            Err(e) => {
                debug!("read from connection {} failed: {}", conn, e);
                break;
            }
        }
    }

    transport.unregister(conn);
    let _ = actions.send(Action::Close { conn });
    writer.abort();
    info!("connection {} closed", conn);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_reaches_registered_peer() {
        let transport = Transport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = transport.next_id();
        transport.register(conn, tx);

        transport.send(conn, "hello");
        assert_eq!(rx.try_recv().unwrap(), Outgoing::Text("hello".to_string()));
    }

    #[test]
    fn test_close_queues_close_command() {
        let transport = Transport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = transport.next_id();
        transport.register(conn, tx);

        transport.close(conn, "game ended");
        assert_eq!(
            rx.try_recv().unwrap(),
            Outgoing::Close {
                reason: "game ended".to_string()
            }
        );
    }

    #[test]
    fn test_send_to_unknown_connection_is_noop() {
        let transport = Transport::new();
        transport.send(99, "hello");
        transport.close(99, "bye");
    }

    #[test]
    fn test_unregister_drops_peer() {
        let transport = Transport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = transport.next_id();
        transport.register(conn, tx);
        transport.unregister(conn);

        transport.send(conn, "hello");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let transport = Transport::new();
        let a = transport.next_id();
        let b = transport.next_id();
        assert_ne!(a, b);
    }
}
