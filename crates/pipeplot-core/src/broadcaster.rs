//! Single-producer fan-out with loss-free attach semantics.

use crate::config::PipelineConfig;
use crate::history::History;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::reader::{ReadOutcome, SampleSource};
use crate::sample::{Record, StreamItem, Terminal};
use crate::tee::TeeSink;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// SYNCHRONIZATION PROTOCOL
// =============================================================================
//
// One mutex covers both the history and the subscriber set. The producer
// holds it across (history push + fan-out to every queue), so that pair is
// indivisible with respect to attach:
//
// - A subscriber attaching between two dispatches sees the history exactly
//   as of its lock acquisition, then every later record through its queue.
//   No duplicates, no gap across the boundary.
// - The lock is never held across an await. Dispatch uses try_send on
//   bounded queues; a full queue drops that subscriber instead of blocking
//   the producer.
//
// Terminal state is published in two steps: the record goes into a OnceLock
// first, then the flag is stored with Release. Any reader that observes the
// flag with Acquire is therefore guaranteed to see the populated record.
// Both steps happen under the mutex so attach sees a consistent view.
//
// =============================================================================

/// Errors from broadcaster lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BroadcastError {
    /// `start` was called a second time.
    #[error("producer already started")]
    AlreadyStarted,
}

struct Handle {
    id: u64,
    tx: mpsc::Sender<StreamItem>,
}

struct Shared {
    history: History,
    subscribers: Vec<Handle>,
}

/// Receiving side of one attachment.
///
/// Dropping it (or calling [`Broadcaster::detach`] first, which sessions do
/// on cancellation) ends the subscription; the broadcaster never outlives a
/// send into a detached queue.
pub struct Subscriber {
    id: u64,
    rx: mpsc::Receiver<StreamItem>,
}

impl Subscriber {
    /// Identity used for [`Broadcaster::detach`].
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receives the next item.
    ///
    /// `None` means the sending side is gone without a terminal item: the
    /// subscriber was dropped for falling behind. A terminated stream ends
    /// with `Some(StreamItem::Terminal(_))` instead.
    pub async fn next_item(&mut self) -> Option<StreamItem> {
        self.rx.recv().await
    }
}

/// Single-writer fan-out over a bounded rolling history.
///
/// Exactly one producer task (spawned by [`start`](Self::start)) drives
/// dispatch; any number of subscribers attach and detach concurrently.
pub struct Broadcaster {
    shared: Mutex<Shared>,
    /// Ordered Release/Acquire relative to `terminal`.
    terminated: AtomicBool,
    terminal: OnceLock<Terminal>,
    started: AtomicBool,
    next_subscriber_id: AtomicU64,
    queue_capacity: usize,
    metrics: PipelineMetrics,
    /// Wakes the producer out of its read to end the ingest early.
    interrupt: Notify,
}

impl Broadcaster {
    /// Creates an idle broadcaster sized from the pipeline config.
    pub fn new(config: &PipelineConfig) -> Self {
        let capacity = config.capacity();
        Self {
            shared: Mutex::new(Shared {
                history: History::new(capacity),
                subscribers: Vec::new(),
            }),
            terminated: AtomicBool::new(false),
            terminal: OnceLock::new(),
            started: AtomicBool::new(false),
            next_subscriber_id: AtomicU64::new(0),
            // Replay of a full history into a fresh queue must always fit,
            // with room for one live record and the terminal item.
            queue_capacity: config.queue_bound.max(capacity + 2),
            metrics: PipelineMetrics::default(),
            interrupt: Notify::new(),
        }
    }

    fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the producer task draining `source`.
    ///
    /// Returns the task handle; the task runs until the source reports end
    /// of input or a fatal error. A second call is an error.
    pub fn start<S>(
        self: &Arc<Self>,
        source: S,
        tee: Option<Box<dyn TeeSink>>,
    ) -> Result<JoinHandle<()>, BroadcastError>
    where
        S: SampleSource + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BroadcastError::AlreadyStarted);
        }

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.run(source, tee).await;
        }))
    }

    async fn run<S: SampleSource>(&self, mut source: S, mut tee: Option<Box<dyn TeeSink>>) {
        info!("ingest producer running");
        loop {
            let outcome = tokio::select! {
                outcome = source.next_record() => outcome,
                () = self.interrupt.notified() => {
                    info!("ingest interrupted");
                    self.finish(Terminal::clean());
                    return;
                }
            };

            match outcome {
                ReadOutcome::Parsed(record) => self.dispatch(record, tee.as_deref_mut()),
                ReadOutcome::Ignored => self.metrics.add_row_ignored(),
                ReadOutcome::EndOfInput => {
                    info!("input ended cleanly");
                    self.finish(Terminal::clean());
                    return;
                }
                ReadOutcome::Fatal(e) => {
                    warn!(error = %e, "input failed, terminating stream");
                    self.finish(Terminal::failed(e.to_string()));
                    return;
                }
            }
        }
    }

    /// Retains one record and fans it out. Producer-only.
    fn dispatch(&self, record: Record, tee: Option<&mut (dyn TeeSink + '_)>) {
        if let (Some(sink), Record::Sample(sample)) = (tee, &record) {
            if let Err(e) = sink.write_row(sample) {
                self.metrics.add_tee_error();
                debug!(error = %e, "tee write failed, continuing");
            }
        }

        self.metrics.add_record_dispatched();
        let mut shared = self.lock_shared();
        shared.history.push(record.clone());
        let metrics = &self.metrics;
        shared.subscribers.retain(|sub| {
            match sub.tx.try_send(StreamItem::Record(record.clone())) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics.add_subscriber_dropped();
                    warn!(subscriber = sub.id, "queue full, dropping slow subscriber");
                    false
                }
                // Receiver already dropped without detach; just forget it.
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Publishes terminal state and delivers it to every live subscriber.
    /// Producer-only; called at most once.
    fn finish(&self, terminal: Terminal) {
        let mut shared = self.lock_shared();

        let _ = self.terminal.set(terminal.clone());
        self.terminated.store(true, Ordering::Release);

        for sub in shared.subscribers.drain(..) {
            if sub.tx.try_send(StreamItem::Terminal(terminal.clone())).is_err() {
                warn!(subscriber = sub.id, "queue unavailable at termination");
            }
        }
        drop(shared);

        let snapshot = self.metrics.snapshot();
        info!(
            dispatched = snapshot.records_dispatched,
            ignored = snapshot.rows_ignored,
            dropped = snapshot.subscribers_dropped,
            "ingest finished"
        );
    }

    /// Registers a new subscriber.
    ///
    /// The returned queue already contains the retained history in order;
    /// every record dispatched after this call follows it with no gap and
    /// no duplicate. On an already-terminated stream the history is
    /// followed by exactly one terminal item instead of a registration.
    pub fn attach(&self) -> Subscriber {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.add_subscriber_attached();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        let mut shared = self.lock_shared();
        debug_assert!(self.queue_capacity > shared.history.len());
        for record in shared.history.iter() {
            // Cannot fail: the queue is fresh and sized past the history.
            let _ = tx.try_send(StreamItem::Record(record.clone()));
        }

        let replayed = shared.history.len();
        if self.terminated.load(Ordering::Acquire) {
            let terminal = self.terminal.get().cloned().unwrap_or_default();
            let _ = tx.try_send(StreamItem::Terminal(terminal));
        } else {
            shared.subscribers.push(Handle { id, tx });
        }
        drop(shared);

        debug!(subscriber = id, replayed, "subscriber attached");
        Subscriber { id, rx }
    }

    /// Removes a subscriber; no send occurs on its queue after return.
    ///
    /// Unknown ids are fine: the producer may already have dropped the
    /// subscriber for slowness, or termination may have drained the set.
    pub fn detach(&self, id: u64) {
        let mut shared = self.lock_shared();
        shared.subscribers.retain(|sub| sub.id != id);
    }

    /// Non-blocking terminal state: `None` while the stream is live.
    pub fn terminal_state(&self) -> Option<Terminal> {
        if self.terminated.load(Ordering::Acquire) {
            // The record is published before the flag; observing the flag
            // guarantees it is present.
            self.terminal.get().cloned()
        } else {
            None
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock_shared().subscribers.len()
    }

    /// Current pipeline counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Ends the ingest early with a clean terminal state.
    ///
    /// The producer stops at its next suspension point; history and
    /// terminal state stay served. Subscribers see a normal clean end.
    /// Idempotent, and a no-op once the stream has terminated.
    pub fn interrupt(&self) {
        self.interrupt.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;

    fn test_config(window: usize, queue_bound: usize) -> PipelineConfig {
        PipelineConfig {
            window_size: window,
            queue_bound,
            ..PipelineConfig::default()
        }
    }

    fn sample(x: f64) -> Record {
        Record::Sample(Sample::new(x, vec![x + 0.5]))
    }

    fn recv_now(sub: &mut Subscriber) -> Option<StreamItem> {
        sub.rx.try_recv().ok()
    }

    #[test]
    fn test_attach_replays_history_then_live() {
        let broadcaster = Broadcaster::new(&test_config(10, 100));
        broadcaster.dispatch(sample(1.0), None);
        broadcaster.dispatch(sample(2.0), None);

        let mut sub = broadcaster.attach();
        broadcaster.dispatch(sample(3.0), None);

        for expected in [1.0, 2.0, 3.0] {
            match recv_now(&mut sub) {
                Some(StreamItem::Record(Record::Sample(s))) => assert_eq!(s.x, expected),
                other => panic!("expected sample {expected}, got {other:?}"),
            }
        }
        assert!(recv_now(&mut sub).is_none());
    }

    #[test]
    fn test_attach_sees_only_window() {
        let broadcaster = Broadcaster::new(&test_config(3, 100));
        for i in 0..10 {
            broadcaster.dispatch(sample(f64::from(i)), None);
        }

        let mut sub = broadcaster.attach();
        let mut xs = Vec::new();
        while let Some(StreamItem::Record(Record::Sample(s))) = recv_now(&mut sub) {
            xs.push(s.x);
        }
        assert_eq!(xs, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_terminal_delivered_to_live_subscribers() {
        let broadcaster = Broadcaster::new(&test_config(10, 100));
        let mut sub = broadcaster.attach();

        broadcaster.dispatch(sample(1.0), None);
        broadcaster.finish(Terminal::failed("boom"));

        assert!(matches!(
            recv_now(&mut sub),
            Some(StreamItem::Record(Record::Sample(_)))
        ));
        match recv_now(&mut sub) {
            Some(StreamItem::Terminal(t)) => {
                assert!(t.error);
                assert_eq!(t.message, "boom");
            }
            other => panic!("expected terminal, got {other:?}"),
        }
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_attach_after_termination_synthesizes_terminal() {
        let broadcaster = Broadcaster::new(&test_config(10, 100));
        broadcaster.dispatch(sample(1.0), None);
        broadcaster.finish(Terminal::clean());

        let mut sub = broadcaster.attach();
        assert!(matches!(
            recv_now(&mut sub),
            Some(StreamItem::Record(Record::Sample(_)))
        ));
        match recv_now(&mut sub) {
            Some(StreamItem::Terminal(t)) => assert!(!t.error),
            other => panic!("expected terminal, got {other:?}"),
        }
        // History-only dispatch: the subscriber was never registered.
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_terminal_state_is_queryable() {
        let broadcaster = Broadcaster::new(&test_config(10, 100));
        assert!(broadcaster.terminal_state().is_none());

        broadcaster.finish(Terminal::failed("io error"));
        let terminal = broadcaster.terminal_state().unwrap();
        assert!(terminal.error);
        assert_eq!(terminal.message, "io error");
    }

    #[test]
    fn test_slow_subscriber_is_dropped_not_blocked() {
        // window 1 and bound 1 give the smallest legal queue: 3 slots.
        let broadcaster = Broadcaster::new(&test_config(1, 1));
        let mut sub = broadcaster.attach();
        assert_eq!(broadcaster.subscriber_count(), 1);

        for i in 0..3 {
            broadcaster.dispatch(sample(f64::from(i)), None);
        }
        assert_eq!(broadcaster.subscriber_count(), 1);

        // Fourth dispatch finds the queue full and evicts the subscriber.
        broadcaster.dispatch(sample(3.0), None);
        assert_eq!(broadcaster.subscriber_count(), 0);

        // The already-queued items are still readable; no terminal follows.
        let mut received = 0;
        while recv_now(&mut sub).is_some() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[test]
    fn test_detach_stops_delivery() {
        let broadcaster = Broadcaster::new(&test_config(10, 100));
        let mut sub = broadcaster.attach();

        broadcaster.dispatch(sample(1.0), None);
        broadcaster.detach(sub.id());
        broadcaster.dispatch(sample(2.0), None);

        assert!(matches!(
            recv_now(&mut sub),
            Some(StreamItem::Record(Record::Sample(s))) if s.x == 1.0
        ));
        assert!(recv_now(&mut sub).is_none());

        // Detaching twice (or an unknown id) is a no-op.
        broadcaster.detach(sub.id());
        broadcaster.detach(9_999);
    }

    #[test]
    fn test_tee_runs_before_broadcast_and_failures_are_local() {
        struct FailingTee;
        impl TeeSink for FailingTee {
            fn write_row(&mut self, _sample: &Sample) -> std::io::Result<()> {
                Err(std::io::Error::other("sink gone"))
            }
        }

        let broadcaster = Broadcaster::new(&test_config(10, 100));
        let mut sub = broadcaster.attach();
        let mut tee: Box<dyn TeeSink> = Box::new(FailingTee);

        broadcaster.dispatch(sample(1.0), Some(tee.as_mut()));

        // The broadcast path is unaffected by the sink failure.
        assert!(matches!(
            recv_now(&mut sub),
            Some(StreamItem::Record(Record::Sample(_)))
        ));
    }

    #[tokio::test]
    async fn test_start_is_single_shot() {
        struct EmptySource;
        impl SampleSource for EmptySource {
            async fn next_record(&mut self) -> ReadOutcome {
                ReadOutcome::EndOfInput
            }
        }

        let broadcaster = Arc::new(Broadcaster::new(&test_config(10, 100)));
        let handle = broadcaster.start(EmptySource, None).unwrap();
        assert_eq!(
            broadcaster.start(EmptySource, None).unwrap_err(),
            BroadcastError::AlreadyStarted
        );

        handle.await.unwrap();
        assert_eq!(broadcaster.terminal_state(), Some(Terminal::clean()));
    }
}
