//! VR Movement Notifier - experiment event notifications for VR training.
//!
//! A training UI reports three lifecycle events to a coordinating server
//! that records sensor data for each movement:
//!
//! - experiment started
//! - movement about to start (per repetition, sent 150 ms after the call)
//! - experiment ended
//!
//! Each event becomes a pipe-delimited text frame on a single WebSocket
//! connection. Delivery is best-effort: nothing is acknowledged, buffered,
//! retried or reconnected, and failures only show up in the logs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Notifier                             │
//! │  experiment_started ─┐                                       │
//! │  movement_occurred ──┼─▶ audit guard ─▶ Transport ─▶ ws://…  │
//! │  experiment_ended ───┘   (+150 ms for movements)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use vr_movement_notifier::{EndpointConfig, Notifier};
//!
//! # async fn demo() {
//! let notifier = Notifier::new(EndpointConfig::new("127.0.0.1", 5006), false);
//! notifier.experiment_started(chrono::Utc::now().timestamp_millis());
//! notifier.movement_occurred(1, 0, chrono::Utc::now().timestamp_millis() + 1000);
//! # }
//! ```

pub mod config;
pub mod notifier;
pub mod protocol;
pub mod stats;
pub mod transport;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, EndpointConfig};
pub use notifier::{Notifier, ScheduledNotification, MOVEMENT_DELAY};
pub use protocol::{Gesture, NotificationRecord, RecordKind, RecordParseError};
pub use stats::{DeliverySnapshot, DeliveryStats};
pub use transport::{CloseKind, ConnectionState, SocketClient, Transport, TransportError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
