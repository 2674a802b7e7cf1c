//! Per-strategy ordered event queue
//!
//! Any number of producers may enqueue; at most one drain task runs per
//! mailbox, so the processor sees one strategy's events strictly in enqueue
//! order and never concurrently.

use alloy::primitives::Address;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::clients::EventProcessor;
use crate::domain::MailboxEvent;

struct MailboxState {
    queue: VecDeque<MailboxEvent>,
    processing: bool,
    closed: bool,
    last_activity: Instant,
}

/// Observability snapshot of one mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxSnapshot {
    pub strategy: Address,
    pub pending: usize,
    pub processing: bool,
    pub processed: u64,
    pub failed: u64,
}

pub struct Mailbox {
    strategy: Address,
    processor: Arc<dyn EventProcessor>,
    state: Mutex<MailboxState>,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl Mailbox {
    pub fn new(strategy: Address, processor: Arc<dyn EventProcessor>) -> Arc<Self> {
        Arc::new(Self {
            strategy,
            processor,
            state: Mutex::new(MailboxState {
                queue: VecDeque::new(),
                processing: false,
                closed: false,
                last_activity: Instant::now(),
            }),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn strategy(&self) -> Address {
        self.strategy
    }

    fn state(&self) -> MutexGuard<'_, MailboxState> {
        // A poisoned lock only means a panic happened while holding it; the
        // queue itself is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an event and start draining if idle. Never blocks on delivery.
    ///
    /// Must be called from within a Tokio runtime. Returns the event back if
    /// the mailbox has been closed by idle reaping.
    pub fn enqueue(self: &Arc<Self>, event: MailboxEvent) -> Result<(), MailboxEvent> {
        let start_drain = {
            let mut state = self.state();
            if state.closed {
                return Err(event);
            }
            state.queue.push_back(event);
            state.last_activity = Instant::now();
            if state.processing {
                false
            } else {
                state.processing = true;
                true
            }
        };

        if start_drain {
            let mailbox = Arc::clone(self);
            tokio::spawn(async move { mailbox.drain().await });
        }
        Ok(())
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let event = {
                let mut state = self.state();
                match state.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        state.processing = false;
                        state.last_activity = Instant::now();
                        return;
                    }
                }
            };

            let kind = event.kind();
            let effect_id = event.effect_id();
            let delivery = AssertUnwindSafe(self.processor.process(self.strategy, event))
                .catch_unwind()
                .await;

            match delivery {
                Ok(Ok(())) => {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    debug!(strategy = %self.strategy, kind, "Mailbox event processed");
                }
                Ok(Err(e)) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        strategy = %self.strategy,
                        kind,
                        effect_id = ?effect_id,
                        error = %e,
                        "Mailbox event failed, continuing with next event"
                    );
                }
                Err(_) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        strategy = %self.strategy,
                        kind,
                        effect_id = ?effect_id,
                        "Mailbox processor panicked, continuing with next event"
                    );
                }
            }
        }
    }

    /// Events queued and not yet started.
    pub fn pending_count(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_processing(&self) -> bool {
        self.state().processing
    }

    pub fn has_pending_work(&self) -> bool {
        let state = self.state();
        state.processing || !state.queue.is_empty()
    }

    /// Close the mailbox if it has been idle for at least `max_idle`.
    pub(crate) fn close_if_idle(&self, max_idle: Duration) -> bool {
        let mut state = self.state();
        let idle = !state.processing
            && state.queue.is_empty()
            && state.last_activity.elapsed() >= max_idle;
        if idle {
            state.closed = true;
        }
        idle
    }

    /// Refuse further events. Returns whether queued or in-flight work is
    /// still being drained.
    pub(crate) fn close(&self) -> bool {
        let mut state = self.state();
        state.closed = true;
        state.processing || !state.queue.is_empty()
    }

    pub(crate) fn reopen(&self) {
        let mut state = self.state();
        state.closed = false;
        state.last_activity = Instant::now();
    }

    pub fn snapshot(&self) -> MailboxSnapshot {
        let (pending, processing) = {
            let state = self.state();
            (state.queue.len(), state.processing)
        };
        MailboxSnapshot {
            strategy: self.strategy,
            pending,
            processing,
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::processor_fn;
    use crate::domain::{EffectResult, MailboxEvent};
    use crate::error::OrchestratorError;
    use alloy::primitives::B256;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn result_event(n: u8) -> MailboxEvent {
        MailboxEvent::effect_result(EffectResult::failed(B256::repeat_byte(n), "x"))
    }

    async fn wait_idle(mailbox: &Arc<Mailbox>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while mailbox.has_pending_work() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("mailbox did not drain");
    }

    #[tokio::test]
    async fn test_fifo_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let processor = processor_fn(move |_, event: MailboxEvent| {
            let tx = tx.clone();
            async move {
                tx.send(event.effect_id()).ok();
                Ok(())
            }
        });
        let mailbox = Mailbox::new(Address::ZERO, processor);

        for n in 0..50u8 {
            mailbox.enqueue(result_event(n)).unwrap();
        }
        wait_idle(&mailbox).await;

        for n in 0..50u8 {
            assert_eq!(rx.recv().await.unwrap(), Some(B256::repeat_byte(n)));
        }
        assert_eq!(mailbox.snapshot().processed, 50);
    }

    #[tokio::test]
    async fn test_failed_event_does_not_stall_queue() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let processor = processor_fn(move |_, event: MailboxEvent| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if event.effect_id() == Some(B256::repeat_byte(1)) {
                    return Err(OrchestratorError::Internal("bad event".into()));
                }
                if event.effect_id() == Some(B256::repeat_byte(2)) {
                    panic!("processor bug");
                }
                Ok(())
            }
        });
        let mailbox = Mailbox::new(Address::ZERO, processor);

        for n in 0..4u8 {
            mailbox.enqueue(result_event(n)).unwrap();
        }
        wait_idle(&mailbox).await;

        assert_eq!(seen.load(Ordering::SeqCst), 4);
        let snapshot = mailbox.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.failed, 2);
        assert!(!snapshot.processing);
    }

    #[tokio::test]
    async fn test_never_processes_concurrently() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (a, m) = (Arc::clone(&active), Arc::clone(&max_seen));
        let processor = processor_fn(move |_, _event| {
            let (active, max_seen) = (Arc::clone(&a), Arc::clone(&m));
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let mailbox = Mailbox::new(Address::ZERO, processor);

        let mut producers = Vec::new();
        for p in 0..4u8 {
            let mailbox = Arc::clone(&mailbox);
            producers.push(tokio::spawn(async move {
                for n in 0..5u8 {
                    mailbox.enqueue(result_event(p * 10 + n)).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        wait_idle(&mailbox).await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(mailbox.snapshot().processed, 20);
    }

    #[tokio::test]
    async fn test_closed_mailbox_returns_event() {
        let mailbox = Mailbox::new(Address::ZERO, processor_fn(|_, _| async { Ok(()) }));
        assert!(mailbox.close_if_idle(Duration::ZERO));
        assert!(mailbox.enqueue(result_event(9)).is_err());
    }

    #[tokio::test]
    async fn test_close_reports_busy_and_reopen_accepts_again() {
        let mailbox = Mailbox::new(
            Address::ZERO,
            processor_fn(|_, _| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(())
            }),
        );
        mailbox.enqueue(result_event(1)).unwrap();

        assert!(mailbox.close());
        assert!(mailbox.enqueue(result_event(2)).is_err());

        mailbox.reopen();
        mailbox.enqueue(result_event(3)).unwrap();
        wait_idle(&mailbox).await;
        assert_eq!(mailbox.snapshot().processed, 2);
        assert!(!mailbox.close());
    }
}
