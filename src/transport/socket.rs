//! WebSocket client transport.
//!
//! The connection is driven by a task on the current tokio runtime, so
//! opening never blocks the caller. Frames are queued to that task only
//! while the connection is open.

use super::{CloseKind, ConnectionState, StateCell, Transport, TransportError};
use crate::config::EndpointConfig;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
};
use tracing::{debug, error, info, warn};

/// One persistent WebSocket connection to the notification server.
pub struct SocketClient {
    endpoint: EndpointConfig,
    state: Arc<StateCell>,
    outbound: mpsc::UnboundedSender<String>,
}

impl SocketClient {
    /// Start connecting to `endpoint` and return immediately.
    ///
    /// Must be called from within a tokio runtime; otherwise the client is
    /// created in the `Error` state and every send is dropped.
    pub fn open(endpoint: EndpointConfig) -> Self {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(StateCell::new(ConnectionState::Connecting));
        let url = endpoint.url();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(run_connection(url, state.clone(), receiver));
            }
            Err(e) => {
                let err = TransportError::NoRuntime(e.to_string());
                error!(%url, error = %err, "Error while setting up socket");
                state.set(ConnectionState::Error);
            }
        }

        Self {
            endpoint,
            state,
            outbound,
        }
    }

    /// The endpoint this client was opened against.
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Wait until the connection leaves `Connecting`, or `timeout` passes.
    ///
    /// Returns the state observed last. Sends never need this; it exists for
    /// callers that want to know whether anything can be delivered at all.
    pub async fn wait_while_connecting(&self, timeout: Duration) -> ConnectionState {
        let mut states = self.state.subscribe();
        let settled = states.wait_for(|state| *state != ConnectionState::Connecting);
        let observed = match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(state)) => *state,
            _ => self.state.get(),
        };
        observed
    }
}

impl Transport for SocketClient {
    fn try_send(&self, text: &str) -> Result<(), TransportError> {
        let state = self.state.get();
        if !state.is_open() {
            return Err(TransportError::NotOpen(state));
        }
        self.outbound
            .send(text.to_string())
            .map_err(|_| TransportError::Disconnected)
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }
}

/// Drive one connection from handshake to close.
async fn run_connection(
    url: String,
    state: Arc<StateCell>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let err = TransportError::Connect(e.to_string());
            error!(%url, error = %err, "[error] Connection could not be established");
            state.set(ConnectionState::Error);
            return;
        }
    };

    state.set(ConnectionState::Open);
    info!(%url, "[open] Connection established");

    let (sink, stream) = ws.split();
    drive_connection(&url, &state, &mut outbound, sink, stream).await;
}

/// Pump queued frames into `sink` and log what arrives on `stream` until the
/// connection ends. Returns how many queued frames were dropped unsent.
async fn drive_connection<S, R>(
    url: &str,
    state: &StateCell,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    mut sink: S,
    mut stream: R,
) -> usize
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.clone())).await {
                        if state.get().is_terminal() {
                            warn!(%url, message = %text, error = %e, "Write after close; socket message dropped");
                        } else {
                            let err = TransportError::Write(e.to_string());
                            error!(%url, message = %text, error = %err, "[error] Socket write failed");
                            state.set(ConnectionState::Error);
                        }
                        break;
                    }
                }
                None => {
                    // Owning client was dropped.
                    state.set(ConnectionState::Closed(CloseKind::Clean));
                    if let Err(e) = sink.close().await {
                        debug!(%url, error = %e, "Close handshake failed");
                    }
                    info!(%url, "[close] Connection closed by client");
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(data))) => {
                    info!(%url, data = %data, "[message] Data received from server");
                }
                Some(Ok(Message::Binary(data))) => {
                    info!(%url, bytes = data.len(), "[message] Binary data received from server");
                }
                Some(Ok(Message::Close(frame))) => {
                    state.set(ConnectionState::Closed(CloseKind::Clean));
                    match frame {
                        Some(frame) => info!(
                            %url,
                            code = u16::from(frame.code),
                            reason = %frame.reason,
                            "[close] Connection closed cleanly"
                        ),
                        None => info!(%url, "[close] Connection closed cleanly"),
                    }
                    // Keep polling so the close reply is flushed.
                }
                Some(Ok(_)) => {}
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                    if !state.get().is_terminal() {
                        state.set(ConnectionState::Closed(CloseKind::Clean));
                    }
                    break;
                }
                Some(Err(e)) => {
                    error!(%url, error = %e, "[close] Connection died");
                    state.set(ConnectionState::Closed(CloseKind::Dropped));
                    break;
                }
                None => {
                    if !state.get().is_terminal() {
                        error!(%url, "[close] Connection died");
                        state.set(ConnectionState::Closed(CloseKind::Dropped));
                    }
                    break;
                }
            }
        }
    }

    drain_unsent(url, outbound)
}

/// Refuse further frames and log every frame still queued.
fn drain_unsent(url: &str, outbound: &mut mpsc::UnboundedReceiver<String>) -> usize {
    outbound.close();
    let mut dropped = 0;
    while let Ok(text) = outbound.try_recv() {
        warn!(%url, message = %text, "Connection gone; queued socket message dropped");
        dropped += 1;
    }
    dropped
}
