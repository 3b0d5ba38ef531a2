//! Experiment lifecycle notifier.
//!
//! Turns the three training lifecycle events into notification records and
//! forwards them through one owned transport:
//!
//! ```text
//! experiment_started ──────────────┐
//! experiment_ended ────────────────┼──▶ Outbox ──▶ Transport ──▶ ws://host:port
//! movement_occurred ──▶ +150 ms ───┘  (audit guard)
//! ```
//!
//! Start and end records go out synchronously with the call. Movement
//! records are fired by the dispatcher task after [`MOVEMENT_DELAY`].

mod scheduler;

pub use scheduler::ScheduledNotification;

use crate::config::{Config, EndpointConfig};
use crate::protocol::NotificationRecord;
use crate::stats::{DeliverySnapshot, DeliveryStats, SharedDeliveryStats};
use crate::transport::{SocketClient, Transport};
use scheduler::{Dispatch, MovementScheduler};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Delay between a movement call and its record leaving for the server.
pub const MOVEMENT_DELAY: Duration = Duration::from_millis(150);

/// Final stop before the wire. Every record passes the audit guard here.
struct Outbox<T> {
    transport: T,
    audit: bool,
    stats: SharedDeliveryStats,
}

impl<T: Transport> Dispatch for Outbox<T> {
    fn deliver(&self, record: &NotificationRecord) {
        if self.audit {
            self.stats.record_suppressed();
            debug!(record = %record, "Audit mode; record not sent");
            return;
        }

        if self.transport.send(&record.to_wire()) {
            self.stats.record_sent();
            info!(record = %record, "Socket message");
        } else {
            self.stats.record_dropped();
        }
    }

    fn discard(&self, _record: &NotificationRecord) {
        self.stats.record_cancelled();
    }
}

/// Reports experiment start, movements and end to the coordinating server.
pub struct Notifier<T: Transport = SocketClient> {
    outbox: Arc<Outbox<T>>,
    scheduler: MovementScheduler,
}

impl Notifier<SocketClient> {
    /// Open a connection to `endpoint` and build a notifier around it.
    ///
    /// With `audit` set, the connection is still opened but nothing is ever
    /// written to it.
    pub fn new(endpoint: EndpointConfig, audit: bool) -> Self {
        Self::with_transport(SocketClient::open(endpoint), audit)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoint.clone(), config.audit_only)
    }
}

impl<T: Transport> Notifier<T> {
    /// Build a notifier around an already opened transport.
    pub fn with_transport(transport: T, audit: bool) -> Self {
        let outbox = Arc::new(Outbox {
            transport,
            audit,
            stats: Arc::new(DeliveryStats::new()),
        });
        let scheduler = MovementScheduler::spawn(outbox.clone());

        if audit {
            info!("Notifier running in audit mode; nothing will be transmitted");
        }

        Self { outbox, scheduler }
    }

    /// Send `ExperimentHasStarted` now.
    pub fn experiment_started(&self, timestamp_ms: i64) {
        self.outbox
            .deliver(&NotificationRecord::ExperimentStarted { timestamp_ms });
    }

    /// Schedule `MovementInfo` to be sent after [`MOVEMENT_DELAY`].
    ///
    /// The timer is armed in audit mode too; it just sends nothing when it
    /// fires.
    pub fn movement_occurred(
        &self,
        rep: u32,
        movement: u32,
        timestamp_ms: i64,
    ) -> ScheduledNotification {
        let record = NotificationRecord::Movement {
            rep,
            movement,
            timestamp_ms,
        };

        self.outbox.stats.record_scheduled();
        let handle = self.scheduler.schedule(record, MOVEMENT_DELAY);
        if handle.is_cancelled() {
            self.outbox.stats.record_cancelled();
        }
        handle
    }

    /// Send `ExperimentHasEnded` now.
    pub fn experiment_ended(&self, timestamp_ms: i64) {
        self.outbox
            .deliver(&NotificationRecord::ExperimentEnded { timestamp_ms });
    }

    /// Cancel all movement records that have not fired yet.
    pub fn cancel_pending(&self) {
        self.scheduler.cancel_pending();
    }

    pub fn is_audit(&self) -> bool {
        self.outbox.audit
    }

    pub fn transport(&self) -> &T {
        &self.outbox.transport
    }

    pub fn stats(&self) -> DeliverySnapshot {
        self.outbox.stats.snapshot()
    }

    pub fn stats_summary(&self) -> String {
        self.outbox.stats.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectionState, StateCell, TransportError};
    use std::sync::Mutex;

    #[derive(Clone)]
    struct RecordingTransport {
        frames: Arc<Mutex<Vec<String>>>,
        state: Arc<StateCell>,
    }

    impl RecordingTransport {
        fn open() -> Self {
            Self {
                frames: Arc::new(Mutex::new(Vec::new())),
                state: Arc::new(StateCell::new(ConnectionState::Open)),
            }
        }

        fn frames(&self) -> Vec<String> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl Transport for RecordingTransport {
        fn try_send(&self, text: &str) -> Result<(), TransportError> {
            let state = self.state.get();
            if !state.is_open() {
                return Err(TransportError::NotOpen(state));
            }
            self.frames.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn state(&self) -> ConnectionState {
            self.state.get()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_end_are_immediate() {
        let transport = RecordingTransport::open();
        let notifier = Notifier::with_transport(transport.clone(), false);

        notifier.experiment_started(1000);
        assert_eq!(
            transport.frames(),
            vec!["ExperimentHasStarted | StartTime | 1000"]
        );

        notifier.experiment_ended(9000);
        assert_eq!(
            transport.frames(),
            vec![
                "ExperimentHasStarted | StartTime | 1000",
                "ExperimentHasEnded | EndTime | 9000"
            ]
        );
        assert_eq!(notifier.stats().sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_movement_waits_for_delay() {
        let transport = RecordingTransport::open();
        let notifier = Notifier::with_transport(transport.clone(), false);

        notifier.movement_occurred(2, 5, 2000);
        assert!(transport.frames().is_empty());

        tokio::time::sleep(Duration::from_millis(149)).await;
        assert!(transport.frames().is_empty());

        tokio::time::sleep(Duration::from_millis(3)).await;
        assert_eq!(
            transport.frames(),
            vec!["MovementInfo | Rep, Movement Number, startTimeInFuture | 2, 5, 2000"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_audit_mode_sends_nothing() {
        let transport = RecordingTransport::open();
        let notifier = Notifier::with_transport(transport.clone(), true);
        assert!(notifier.is_audit());

        notifier.experiment_started(1);
        for mov in 0..5 {
            notifier.movement_occurred(1, mov, 100 + mov as i64);
        }
        notifier.experiment_ended(2);

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(transport.frames().is_empty());
        let stats = notifier.stats();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.scheduled, 5);
        // The movement timers still fired
        assert_eq!(stats.suppressed, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_open_is_dropped_without_retry() {
        let transport = RecordingTransport::open();
        transport.state.set(ConnectionState::Connecting);
        let notifier = Notifier::with_transport(transport.clone(), false);

        notifier.experiment_started(1000);
        notifier.movement_occurred(1, 1, 1100);
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Opening later does not resurrect anything
        transport.state.set(ConnectionState::Open);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(transport.frames().is_empty());
        assert_eq!(notifier.stats().dropped, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_movements_keep_call_order() {
        let transport = RecordingTransport::open();
        let notifier = Notifier::with_transport(transport.clone(), false);

        for rep in 1..=3 {
            for mov in 0..5 {
                notifier.movement_occurred(rep, mov, 0);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let expected: Vec<String> = (1..=3)
            .flat_map(|rep| {
                (0..5).map(move |mov| {
                    format!(
                        "MovementInfo | Rep, Movement Number, startTimeInFuture | {rep}, {mov}, 0"
                    )
                })
            })
            .collect();
        assert_eq!(transport.frames(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_movement_is_not_sent() {
        let transport = RecordingTransport::open();
        let notifier = Notifier::with_transport(transport.clone(), false);

        let first = notifier.movement_occurred(1, 0, 10);
        notifier.movement_occurred(1, 1, 20);
        first.cancel();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            transport.frames(),
            vec!["MovementInfo | Rep, Movement Number, startTimeInFuture | 1, 1, 20"]
        );
        assert_eq!(notifier.stats().cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_on_teardown() {
        let transport = RecordingTransport::open();
        let notifier = Notifier::with_transport(transport.clone(), false);

        notifier.movement_occurred(1, 0, 10);
        notifier.movement_occurred(1, 1, 20);
        notifier.cancel_pending();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(transport.frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_notifier_still_fires_pending() {
        let transport = RecordingTransport::open();
        let notifier = Notifier::with_transport(transport.clone(), false);

        let handle = notifier.movement_occurred(4, 2, 77);
        drop(handle);
        drop(notifier);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            transport.frames(),
            vec!["MovementInfo | Rep, Movement Number, startTimeInFuture | 4, 2, 77"]
        );
    }
}
