use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use gpu_forecast_proto::QueueSnapshot;
use tokio::{sync::Notify, time::Instant};
use tracing::debug;

use crate::{
    resource::ResourceLock,
    ticket::{Ticket, TicketRegistry},
};

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_DIAGNOSTIC_INTERVAL: Duration = Duration::from_secs(60);

/// How long a caller may wait for its turn, and how often it reports while it does.
#[derive(Clone, Copy, Debug)]
pub struct WaitPolicy {
    pub max_wait: Duration,
    pub diagnostic_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
            diagnostic_interval: DEFAULT_DIAGNOSTIC_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    Acquired,
    TimedOut,
}

#[derive(Debug, Default)]
struct GateState {
    registry: TicketRegistry,
    resource: ResourceLock,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<GateState>,
    turn_changed: Notify,
}

/// FIFO admission to the exclusive device.
///
/// The queue and the lock sit behind one mutex so that "my ticket is at the
/// head and the device is free" and "take the device" happen as one step.
/// The mutex is only held for those reads and writes, never across an await.
#[derive(Clone, Debug, Default)]
pub struct Gate {
    shared: Arc<Shared>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a ticket at the tail of the queue.
    pub fn enqueue(&self) -> TicketGuard {
        let ticket = {
            let mut state = self.lock_state();
            let ticket = state.registry.enqueue();
            debug!(ticket = %ticket, queue_len = state.registry.len(), "ticket issued");
            ticket
        };
        TicketGuard { gate: self.clone(), ticket }
    }

    /// Wait until `guard`'s ticket is at the head of the queue and the device is
    /// free, then take the device.
    ///
    /// On timeout the queue and lock are left as they are; the guard cleans up
    /// when it is dropped.
    pub async fn await_turn(&self, guard: &TicketGuard, policy: &WaitPolicy) -> WaitOutcome {
        let ticket = guard.ticket;
        let report_every = policy.diagnostic_interval.max(Duration::from_millis(1));
        // a wait too long to represent as an instant has no deadline
        let deadline = Instant::now().checked_add(policy.max_wait);
        let mut next_report = Some(Instant::now());

        loop {
            // register interest before checking so a release in between is not missed
            let notified = self.shared.turn_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (head, holder) = {
                let mut state = self.lock_state();
                let head = state.registry.peek_head();
                if head == Some(ticket) && state.resource.try_acquire(ticket) {
                    debug!(ticket = %ticket, "device acquired");
                    return WaitOutcome::Acquired;
                }
                (head, state.resource.holder())
            };

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return WaitOutcome::TimedOut;
            }
            if next_report.is_some_and(|r| now >= r) {
                debug!(
                    ticket = %ticket,
                    holder = ?holder.map(Ticket::id),
                    head = ?head.map(Ticket::id),
                    "device is in use, waiting"
                );
                next_report = now.checked_add(report_every);
            }

            let wake_at = [deadline, next_report].into_iter().flatten().min();
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock_state();
        QueueSnapshot {
            busy: state.resource.is_busy(),
            holder: state.resource.holder().map(Ticket::id),
            waiting: state.registry.snapshot().into_iter().map(Ticket::id).collect(),
        }
    }

    /// Drop `ticket` from the queue, releasing the device only if it is the holder.
    fn retire(&self, ticket: Ticket) {
        let released = {
            let mut state = self.lock_state();
            let released = if state.resource.holder() == Some(ticket) {
                state.resource.release().is_some()
            } else {
                false
            };
            state.registry.remove(ticket);
            released
        };
        if released {
            debug!(ticket = %ticket, "device released");
        } else {
            debug!(ticket = %ticket, "ticket removed from queue");
        }
        self.shared.turn_changed.notify_waiters();
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        // every critical section leaves the state consistent, so a panic while
        // holding the lock does not invalidate it
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Ownership of one ticket. Dropping it retires the ticket: the device is
/// released if this ticket holds it, otherwise the ticket only leaves the queue.
#[derive(Debug)]
pub struct TicketGuard {
    gate: Gate,
    ticket: Ticket,
}

impl TicketGuard {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn holds_device(&self) -> bool {
        self.gate.lock_state().resource.holder() == Some(self.ticket)
    }
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        self.gate.retire(self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
    };

    fn short_policy(max_wait_ms: u64) -> WaitPolicy {
        WaitPolicy {
            max_wait: Duration::from_millis(max_wait_ms),
            diagnostic_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn first_caller_acquires_immediately() {
        let gate = Gate::new();
        let guard = gate.enqueue();

        let outcome = gate.await_turn(&guard, &short_policy(50)).await;
        assert_eq!(outcome, WaitOutcome::Acquired);
        assert!(guard.holds_device());

        let snap = gate.snapshot();
        assert!(snap.busy);
        assert_eq!(snap.holder, Some(guard.ticket().id()));

        drop(guard);
        assert_eq!(gate.snapshot(), QueueSnapshot::default());
    }

    #[tokio::test]
    async fn timeout_leaves_queue_and_lock_untouched() {
        let gate = Gate::new();
        let first = gate.enqueue();
        assert_eq!(gate.await_turn(&first, &short_policy(50)).await, WaitOutcome::Acquired);

        let second = gate.enqueue();
        let outcome = gate.await_turn(&second, &short_policy(30)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(!second.holds_device());

        let snap = gate.snapshot();
        assert_eq!(snap.holder, Some(first.ticket().id()));
        assert_eq!(snap.waiting, vec![first.ticket().id(), second.ticket().id()]);

        // cleanup of a non-holder must not free the device
        drop(second);
        let snap = gate.snapshot();
        assert!(snap.busy);
        assert_eq!(snap.waiting, vec![first.ticket().id()]);
    }

    #[tokio::test]
    async fn release_wakes_next_in_line() {
        let gate = Gate::new();
        let first = gate.enqueue();
        assert_eq!(gate.await_turn(&first, &short_policy(50)).await, WaitOutcome::Acquired);

        let second = gate.enqueue();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let outcome = gate.await_turn(&second, &short_policy(2_000)).await;
                (outcome, second.holds_device())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);

        let (outcome, held) = waiter.await.unwrap();
        assert_eq!(outcome, WaitOutcome::Acquired);
        assert!(held);
        // the spawned task dropped its guard on exit
        assert_eq!(gate.snapshot(), QueueSnapshot::default());
    }

    #[tokio::test]
    async fn head_that_leaves_unblocks_the_next_ticket() {
        let gate = Gate::new();
        let holder = gate.enqueue();
        assert_eq!(gate.await_turn(&holder, &short_policy(50)).await, WaitOutcome::Acquired);

        let abandoned = gate.enqueue();
        let third = gate.enqueue();
        drop(holder);

        // `abandoned` is now the head but never asks; removing it must let `third` in
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.await_turn(&third, &short_policy(2_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!gate.snapshot().busy);
        drop(abandoned);

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Acquired);
    }

    #[tokio::test]
    async fn unrepresentable_max_wait_means_no_deadline() {
        let policy = WaitPolicy {
            max_wait: Duration::from_secs(u64::MAX),
            diagnostic_interval: Duration::from_secs(u64::MAX),
        };
        let gate = Gate::new();
        let first = gate.enqueue();
        assert_eq!(gate.await_turn(&first, &policy).await, WaitOutcome::Acquired);

        let second = gate.enqueue();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.await_turn(&second, &policy).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(first);

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Acquired);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn count(&self, needle: &str) -> usize {
            let raw = self.0.lock().unwrap();
            String::from_utf8_lossy(&raw).lines().filter(|l| l.contains(needle)).count()
        }
    }

    #[tokio::test]
    async fn waiter_reports_once_per_interval_then_acquires() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .finish();
        // current-thread runtime: every task below logs through this subscriber
        let _default = tracing::subscriber::set_default(subscriber);

        let policy = WaitPolicy {
            max_wait: Duration::from_secs(5),
            diagnostic_interval: Duration::from_millis(25),
        };
        let gate = Gate::new();
        let holder = gate.enqueue();
        assert_eq!(gate.await_turn(&holder, &policy).await, WaitOutcome::Acquired);

        let second = gate.enqueue();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.await_turn(&second, &policy).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(logs.count("device is in use, waiting"), 1, "one line when waiting starts");

        tokio::time::sleep(Duration::from_millis(120)).await;
        let reports = logs.count("device is in use, waiting");
        assert!((3..=8).contains(&reports), "expected one report per interval, got {reports}");

        drop(holder);
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Acquired);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_hold_one_at_a_time_in_ticket_order() {
        const CALLERS: usize = 16;

        let gate = Gate::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..CALLERS {
            let guard = gate.enqueue();
            let gate = gate.clone();
            let in_flight = in_flight.clone();
            let max_in_flight = max_in_flight.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let outcome = gate.await_turn(&guard, &short_policy(10_000)).await;
                assert_eq!(outcome, WaitOutcome::Acquired);

                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);
                order.lock().unwrap().push(guard.ticket());
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        let order = order.lock().unwrap();
        assert_eq!(order.len(), CALLERS);
        assert!(order.windows(2).all(|w| w[0] < w[1]), "acquired out of order: {order:?}");
        assert_eq!(gate.snapshot(), QueueSnapshot::default());
    }
}
