//! Coordinating server for VR training sessions.
//!
//! This module provides a WebSocket server that:
//! - Accepts notification connections from training UIs
//! - Parses each text frame as a notification record
//! - Logs which rep and gesture is about to be recorded
//! - Answers every frame with `Keep running!`
//!
//! # Architecture
//!
//! ```text
//! Training UI ──→ ws://host:port ──→ server ──→ log / ServerEvent channel
//!                                        ↓
//!                                 "Keep running!"
//! ```

use crate::protocol::{Gesture, NotificationRecord};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use uuid::Uuid;

/// Reply sent for every received frame.
pub const ACK_MESSAGE: &str = "Keep running!";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host or address to bind to
    pub host: String,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Optional observer for parsed records
    pub events: Option<mpsc::UnboundedSender<ServerEvent>>,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            events: None,
        }
    }

    /// Forward every parsed record to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        self.events = Some(events);
        self
    }
}

/// A record received from a connected client.
#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub connection_id: Uuid,
    pub peer: SocketAddr,
    pub record: NotificationRecord,
    pub received_at: DateTime<Utc>,
}

/// Shared server state
struct ServerState {
    events: Option<mpsc::UnboundedSender<ServerEvent>>,
}

impl ServerState {
    /// Parse, log and publish one received frame.
    fn handle_message(&self, connection_id: Uuid, peer: SocketAddr, text: &str) {
        let record = match NotificationRecord::parse(text) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(%peer, message = %text, error = %e, "Ignoring malformed message");
                return;
            }
        };

        tracing::info!(%peer, "{}", describe_record(&record));

        if let Some(ref events) = self.events {
            let _ = events.send(ServerEvent {
                connection_id,
                peer,
                record,
                received_at: Utc::now(),
            });
        }
    }
}

/// Human-readable line for a received record.
pub fn describe_record(record: &NotificationRecord) -> String {
    match *record {
        NotificationRecord::ExperimentStarted { timestamp_ms } => {
            format!("EXPERIMENT START: {}", format_millis(timestamp_ms))
        }
        NotificationRecord::ExperimentEnded { timestamp_ms } => {
            format!("EXPERIMENT ENDED: {}", format_millis(timestamp_ms))
        }
        NotificationRecord::Movement {
            rep,
            movement,
            timestamp_ms,
        } => match Gesture::from_movement_number(movement) {
            Some(gesture) => format!(
                "RECORDING NOW: {rep}, {}, Description: {gesture} (starts {})",
                gesture.class_index(),
                format_millis(timestamp_ms)
            ),
            None => format!("RECORDING NOW: {rep}, unknown movement number {movement}"),
        },
    }
}

fn format_millis(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| format!("{timestamp_ms} ms"))
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<ServerState>) {
    let connection_id = Uuid::new_v4();
    let mut ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    tracing::info!(%peer, %connection_id, "Client connected");

    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => {
                state.handle_message(connection_id, peer, &text);
                if let Err(e) = ws.send(Message::Text(ACK_MESSAGE.to_string())).await {
                    tracing::warn!(%peer, error = %e, "Failed to acknowledge message");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                tracing::debug!(%peer, "Client sent close frame");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%peer, error = %e, "Connection error");
                break;
            }
        }
    }

    tracing::info!(%peer, %connection_id, "Client disconnected");
}

/// Run the notification server.
///
/// The server stops accepting connections once the returned sender fires
/// or is dropped.
pub async fn run(config: ServerConfig) -> anyhow::Result<(SocketAddr, oneshot::Sender<()>)> {
    let state = Arc::new(ServerState {
        events: config.events,
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Notification server listening on ws://{}", actual_addr);

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::info!("Server shutdown signal received");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(stream, peer, state.clone()));
                    }
                    Err(e) => tracing::error!("Accept failed: {}", e),
                }
            }
        }
    });

    Ok((actual_addr, shutdown_tx))
}
