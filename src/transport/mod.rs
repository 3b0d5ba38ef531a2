//! Best-effort text delivery to the notification server.
//!
//! A transport owns exactly one outbound connection. Sends are at-most-once:
//! a frame is either handed to an open connection or dropped with a log line.
//! Nothing is buffered, retried or reconnected.

pub mod socket;

pub use socket::SocketClient;

use tokio::sync::watch;
use tracing::warn;

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Closing handshake completed
    Clean,
    /// Peer vanished without a closing handshake
    Dropped,
}

/// Lifecycle of the single connection owned by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed(CloseKind),
    Error,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// True once the connection can never become open again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed(_) | ConnectionState::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed(CloseKind::Clean) => write!(f, "closed"),
            ConnectionState::Closed(CloseKind::Dropped) => write!(f, "closed (dropped)"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Connection state shared between a transport handle and its I/O task.
///
/// Reads are synchronous; waiters subscribe and are woken on every change.
#[derive(Debug)]
pub(crate) struct StateCell(watch::Sender<ConnectionState>);

impl StateCell {
    pub(crate) fn new(state: ConnectionState) -> Self {
        let (sender, _receiver) = watch::channel(state);
        Self(sender)
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.0.borrow()
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.0.send_replace(state);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }
}

/// Transport error types.
///
/// These never leave the transport boundary as failures; [`Transport::send`]
/// turns them into log lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is not open (still connecting, closed, or failed)
    NotOpen(ConnectionState),
    /// The connection task is gone
    Disconnected,
    /// No async runtime to drive the connection
    NoRuntime(String),
    /// Connection could not be established
    Connect(String),
    /// Writing a frame failed
    Write(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::NotOpen(state) => write!(f, "connection is not open ({state})"),
            TransportError::Disconnected => write!(f, "connection task has stopped"),
            TransportError::NoRuntime(msg) => write!(f, "no async runtime: {msg}"),
            TransportError::Connect(msg) => write!(f, "connect failed: {msg}"),
            TransportError::Write(msg) => write!(f, "write failed: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// A single outbound connection that accepts text frames.
pub trait Transport: Send + Sync + 'static {
    /// Hand `text` to the connection as one frame.
    fn try_send(&self, text: &str) -> Result<(), TransportError>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Best-effort send. Failures are logged and swallowed; the return value
    /// only reports whether the frame reached the connection.
    fn send(&self, text: &str) -> bool {
        match self.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(message = %text, error = %e, "Dropping socket message");
                false
            }
        }
    }
}
