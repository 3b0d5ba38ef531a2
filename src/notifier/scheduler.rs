//! Delayed dispatch of movement records.
//!
//! A single dispatcher task receives scheduled records in call order and
//! fires each one at its due time. Since every record gets the same delay,
//! due times never decrease and records leave in the order they were
//! scheduled.

use crate::protocol::NotificationRecord;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error};

/// Receiver of records whose delay has elapsed.
pub(crate) trait Dispatch: Send + Sync + 'static {
    fn deliver(&self, record: &NotificationRecord);
    fn discard(&self, record: &NotificationRecord);
}

struct PendingMovement {
    record: NotificationRecord,
    due: Instant,
    generation: u64,
    cancelled: Arc<AtomicBool>,
}

/// Handle to one scheduled movement record.
///
/// Dropping the handle leaves the record scheduled.
#[derive(Debug, Clone)]
pub struct ScheduledNotification {
    record: NotificationRecord,
    due: Instant,
    cancelled: Arc<AtomicBool>,
}

impl ScheduledNotification {
    /// Prevent the record from being sent, if it has not fired yet.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// When the record is due to fire.
    pub fn due(&self) -> Instant {
        self.due
    }

    pub fn record(&self) -> &NotificationRecord {
        &self.record
    }
}

pub(crate) struct MovementScheduler {
    queue: Option<mpsc::UnboundedSender<PendingMovement>>,
    generation: Arc<AtomicU64>,
}

impl MovementScheduler {
    /// Spawn the dispatcher task on the current runtime.
    pub(crate) fn spawn<D: Dispatch>(dispatch: Arc<D>) -> Self {
        let generation = Arc::new(AtomicU64::new(0));

        let queue = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (tx, rx) = mpsc::unbounded_channel();
                handle.spawn(run_dispatcher(rx, dispatch, generation.clone()));
                Some(tx)
            }
            Err(e) => {
                error!(error = %e, "No async runtime; movement notifications are disabled");
                None
            }
        };

        Self { queue, generation }
    }

    /// Schedule `record` to fire after `delay`.
    pub(crate) fn schedule(
        &self,
        record: NotificationRecord,
        delay: Duration,
    ) -> ScheduledNotification {
        let handle = ScheduledNotification {
            record,
            due: Instant::now() + delay,
            cancelled: Arc::new(AtomicBool::new(false)),
        };

        let pending = PendingMovement {
            record,
            due: handle.due,
            generation: self.generation.load(Ordering::SeqCst),
            cancelled: handle.cancelled.clone(),
        };

        let queued = self
            .queue
            .as_ref()
            .map(|queue| queue.send(pending).is_ok())
            .unwrap_or(false);
        if !queued {
            error!(record = %record, "Movement dispatcher unavailable; notification dropped");
            handle.cancel();
        }

        handle
    }

    /// Cancel every record scheduled so far.
    pub(crate) fn cancel_pending(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

async fn run_dispatcher<D: Dispatch>(
    mut queue: mpsc::UnboundedReceiver<PendingMovement>,
    dispatch: Arc<D>,
    generation: Arc<AtomicU64>,
) {
    while let Some(pending) = queue.recv().await {
        tokio::time::sleep_until(pending.due).await;

        let stale = pending.generation != generation.load(Ordering::SeqCst);
        if stale || pending.cancelled.load(Ordering::SeqCst) {
            debug!(record = %pending.record, "Scheduled movement cancelled");
            dispatch.discard(&pending.record);
            continue;
        }

        dispatch.deliver(&pending.record);
    }
    debug!("Movement dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        delivered: Mutex<Vec<(NotificationRecord, Instant)>>,
        discarded: Mutex<Vec<NotificationRecord>>,
    }

    impl Dispatch for Collect {
        fn deliver(&self, record: &NotificationRecord) {
            self.delivered
                .lock()
                .unwrap()
                .push((*record, Instant::now()));
        }

        fn discard(&self, record: &NotificationRecord) {
            self.discarded.lock().unwrap().push(*record);
        }
    }

    fn movement(rep: u32) -> NotificationRecord {
        NotificationRecord::Movement {
            rep,
            movement: 0,
            timestamp_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_at_due_time() {
        let collect = Arc::new(Collect::default());
        let scheduler = MovementScheduler::spawn(collect.clone());

        let start = Instant::now();
        let handle = scheduler.schedule(movement(1), Duration::from_millis(150));
        assert_eq!(handle.due(), start + Duration::from_millis(150));
        assert_eq!(handle.record(), &movement(1));

        tokio::time::sleep(Duration::from_millis(200)).await;

        let delivered = collect.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let fired_after = delivered[0].1 - start;
        assert!(fired_after >= Duration::from_millis(150));
        assert!(fired_after < Duration::from_millis(152));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_only_affects_earlier_records() {
        let collect = Arc::new(Collect::default());
        let scheduler = MovementScheduler::spawn(collect.clone());

        scheduler.schedule(movement(1), Duration::from_millis(150));
        scheduler.schedule(movement(2), Duration::from_millis(150));
        scheduler.cancel_pending();
        scheduler.schedule(movement(3), Duration::from_millis(150));

        tokio::time::sleep(Duration::from_millis(200)).await;

        let delivered: Vec<_> = collect
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| *r)
            .collect();
        assert_eq!(delivered, vec![movement(3)]);
        assert_eq!(collect.discarded.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_schedule_without_runtime_is_cancelled() {
        let collect = Arc::new(Collect::default());
        let scheduler = MovementScheduler::spawn(collect);
        let handle = scheduler.schedule(movement(1), Duration::from_millis(150));
        assert!(handle.is_cancelled());
    }
}
