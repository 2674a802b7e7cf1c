//! Effect executors
//!
//! Each executor loops: take the next action from the shared intake, resolve
//! its handler, run it, and hand the result to the originating strategy's
//! mailbox. Executors share nothing but the intake and the registry.

use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::intake::ActionIntake;
use super::registry::HandlerRegistry;
use crate::coordination::{GracefulShutdown, ShutdownSignal, ShutdownToken};
use crate::domain::{EffectResult, MailboxEvent, QueuedAction};
use crate::error::OrchestratorError;
use crate::mailbox::MailboxManager;

#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicU64,
}

/// Executor pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorStats {
    pub workers: usize,
    pub queued: usize,
    pub in_flight: u64,
    pub executed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Run one action to a result. Never panics and never returns an error:
/// unknown types, invalid payloads, handler errors and handler panics all
/// become a failed [`EffectResult`].
pub async fn execute_action(registry: &HandlerRegistry, action: &QueuedAction) -> EffectResult {
    let Some(handler) = registry.resolve(&action.action_type) else {
        let err = OrchestratorError::UnknownActionType(action.action_type.to_string());
        warn!(effect_id = %action.effect_id, action_type = %action.action_type, "Unknown action type");
        return EffectResult::failed(action.effect_id, err.to_string());
    };

    if let Err(e) = handler.validate(&action.payload) {
        warn!(effect_id = %action.effect_id, error = %e, "Effect payload rejected");
        return EffectResult::failed(action.effect_id, e.to_string());
    }

    match AssertUnwindSafe(handler.execute(action)).catch_unwind().await {
        Ok(Ok(outcome)) => EffectResult::succeeded(action.effect_id, outcome),
        Ok(Err(e)) => {
            warn!(effect_id = %action.effect_id, action_type = %action.action_type, error = %e, "Effect failed");
            EffectResult::failed(action.effect_id, e.to_string())
        }
        Err(_) => {
            error!(effect_id = %action.effect_id, action_type = %action.action_type, "Effect handler panicked");
            EffectResult::failed(action.effect_id, "handler panicked")
        }
    }
}

struct Executor {
    id: usize,
    intake: Arc<ActionIntake>,
    registry: Arc<HandlerRegistry>,
    mailboxes: Arc<MailboxManager>,
    counters: Arc<Counters>,
}

impl Executor {
    async fn run(self, mut token: ShutdownToken) {
        debug!(executor = self.id, "Executor started");

        let signal = loop {
            tokio::select! {
                biased;
                next = self.intake.next() => match next {
                    Some(action) => self.handle(action).await,
                    None => break None,
                },
                signal = token.wait_for_shutdown() => break Some(signal),
            }
        };

        // Producers are refused once shutdown is requested, so what is left
        // in the intake is finite. Every queued action still gets a result.
        if let Some(signal) = signal {
            let mut finished = 0usize;
            while let Some(action) = self.intake.try_next().await {
                match signal {
                    ShutdownSignal::Graceful => self.handle(action).await,
                    ShutdownSignal::Urgent => self.abandon(action),
                }
                finished += 1;
            }
            if finished > 0 {
                info!(executor = self.id, finished, %signal, "Queued actions settled during shutdown");
            }
        }
        debug!(executor = self.id, "Executor stopped");
    }

    /// Report an action that will never run as failed.
    fn abandon(&self, action: QueuedAction) {
        warn!(effect_id = %action.effect_id, strategy = %action.strategy_address, "Action dropped by urgent shutdown");
        self.counters.executed.fetch_add(1, Ordering::Relaxed);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let result = EffectResult::failed(action.effect_id, "orchestrator shut down before execution");
        self.mailboxes
            .dispatch_to_strategy(action.strategy_address, MailboxEvent::effect_result(result));
    }

    async fn handle(&self, action: QueuedAction) {
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        debug!(
            executor = self.id,
            effect_id = %action.effect_id,
            strategy = %action.strategy_address,
            action_type = %action.action_type,
            "Executing effect"
        );

        let result = execute_action(&self.registry, &action).await;

        self.counters.executed.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }

        self.mailboxes
            .dispatch_to_strategy(action.strategy_address, MailboxEvent::effect_result(result));
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs a fixed number of executors over one intake.
pub struct ExecutorPool {
    workers: usize,
    intake: Arc<ActionIntake>,
    registry: Arc<HandlerRegistry>,
    mailboxes: Arc<MailboxManager>,
    counters: Arc<Counters>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutorPool {
    pub fn new(
        workers: usize,
        intake: Arc<ActionIntake>,
        registry: Arc<HandlerRegistry>,
        mailboxes: Arc<MailboxManager>,
    ) -> Self {
        Self {
            workers: workers.max(1),
            intake,
            registry,
            mailboxes,
            counters: Arc::new(Counters::default()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the executors. Once shutdown is requested they settle whatever
    /// is still queued and exit: a graceful shutdown executes it, an urgent
    /// one reports it as failed.
    pub fn start(&self, shutdown: &GracefulShutdown) {
        let mut handles = self.handles.lock().unwrap_or_else(|p| p.into_inner());
        if !handles.is_empty() {
            warn!("Executor pool already started");
            return;
        }

        for id in 0..self.workers {
            let executor = Executor {
                id,
                intake: Arc::clone(&self.intake),
                registry: Arc::clone(&self.registry),
                mailboxes: Arc::clone(&self.mailboxes),
                counters: Arc::clone(&self.counters),
            };
            handles.push(tokio::spawn(executor.run(shutdown.token())));
        }
        info!(
            workers = self.workers,
            handlers = ?self.registry.action_types(),
            "Executor pool started"
        );
    }

    pub fn intake(&self) -> &Arc<ActionIntake> {
        &self.intake
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            workers: self.workers,
            queued: self.intake.pending(),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
            executed: self.counters.executed.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Actions being executed right now.
    pub fn has_in_flight(&self) -> bool {
        self.counters.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn has_pending_work(&self) -> bool {
        self.has_in_flight() || self.intake.pending() > 0
    }

    /// Wait for every executor task to exit. After a shutdown request this
    /// returns only once the intake is empty and nothing is in flight.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Executor task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::processor_fn;
    use crate::domain::{ActionType, EffectOutcome};
    use crate::effects::EffectHandler;
    use crate::error::Result;
    use alloy::primitives::{Address, B256};
    use async_trait::async_trait;
    use serde_json::{json, Value as JsonValue};
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl EffectHandler for Echo {
        fn validate(&self, payload: &JsonValue) -> Result<()> {
            if payload.get("bad").is_some() {
                return Err(OrchestratorError::InvalidPayload("bad field".into()));
            }
            Ok(())
        }

        async fn execute(&self, action: &QueuedAction) -> Result<EffectOutcome> {
            if action.payload.get("panic").is_some() {
                panic!("handler bug");
            }
            Ok(EffectOutcome {
                tx_hash: None,
                result_data: action.payload.clone(),
            })
        }
    }

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register(ActionType::CollectFees, Arc::new(Echo));
        registry
    }

    fn action(n: u8, action_type: ActionType, payload: JsonValue) -> QueuedAction {
        QueuedAction::new(B256::repeat_byte(n), Address::repeat_byte(0x51), action_type, payload)
    }

    #[tokio::test]
    async fn test_unknown_action_type_fails_result() {
        let result = execute_action(
            &registry(),
            &action(1, ActionType::parse("rebalance_everything"), json!({})),
        )
        .await;
        assert!(!result.success);
        assert!(result
            .error_message
            .unwrap()
            .contains("rebalance_everything"));
    }

    #[tokio::test]
    async fn test_invalid_payload_and_panic_fail_result() {
        let registry = registry();
        let invalid = execute_action(&registry, &action(1, ActionType::CollectFees, json!({"bad": 1}))).await;
        assert!(!invalid.success);

        let panicked = execute_action(&registry, &action(2, ActionType::CollectFees, json!({"panic": 1}))).await;
        assert!(!panicked.success);
        assert_eq!(panicked.error_message.as_deref(), Some("handler panicked"));

        let ok = execute_action(&registry, &action(3, ActionType::CollectFees, json!({"x": 1}))).await;
        assert!(ok.success);
        assert_eq!(ok.result_data, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_pool_delivers_results_to_strategy_mailbox() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mailboxes = Arc::new(MailboxManager::new(processor_fn(move |strategy, event| {
            let tx = tx.clone();
            async move {
                tx.send((strategy, event)).ok();
                Ok(())
            }
        })));
        let intake = Arc::new(ActionIntake::new(16));
        let pool = ExecutorPool::new(3, Arc::clone(&intake), Arc::new(registry()), mailboxes);
        let shutdown = GracefulShutdown::with_defaults();
        pool.start(&shutdown);

        intake.submit(action(1, ActionType::CollectFees, json!({}))).await.unwrap();
        intake.submit(action(2, ActionType::Withdraw, json!({}))).await.unwrap();

        let mut results = Vec::new();
        for _ in 0..2 {
            let (strategy, event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(strategy, Address::repeat_byte(0x51));
            match event {
                MailboxEvent::EffectResult { payload } => results.push((payload.effect_id, payload.success)),
                other => panic!("unexpected event {other:?}"),
            }
        }
        results.sort();
        assert_eq!(
            results,
            vec![(B256::repeat_byte(1), true), (B256::repeat_byte(2), false)]
        );

        let stats = pool.stats();
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.failed, 1);

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        tokio::time::timeout(Duration::from_secs(5), pool.join()).await.unwrap();
        assert!(!pool.has_pending_work());
    }

    struct Slow;

    #[async_trait]
    impl EffectHandler for Slow {
        fn validate(&self, _payload: &JsonValue) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _action: &QueuedAction) -> Result<EffectOutcome> {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(EffectOutcome::default())
        }
    }

    fn slow_pool(
        shutdown: &GracefulShutdown,
    ) -> (ExecutorPool, Arc<ActionIntake>, tokio::sync::mpsc::UnboundedReceiver<EffectResult>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mailboxes = Arc::new(MailboxManager::new(processor_fn(move |_, event| {
            let tx = tx.clone();
            async move {
                if let MailboxEvent::EffectResult { payload } = event {
                    tx.send(payload).ok();
                }
                Ok(())
            }
        })));
        let mut registry = HandlerRegistry::new();
        registry.register(ActionType::CollectFees, Arc::new(Slow));
        let intake = Arc::new(ActionIntake::new(16));
        let pool = ExecutorPool::new(1, Arc::clone(&intake), Arc::new(registry), mailboxes);
        pool.start(shutdown);
        (pool, intake, rx)
    }

    #[tokio::test]
    async fn test_graceful_shutdown_executes_queued_actions() {
        let shutdown = GracefulShutdown::with_defaults();
        let (pool, intake, mut rx) = slow_pool(&shutdown);
        for n in 0..4u8 {
            intake.submit(action(n, ActionType::CollectFees, json!({}))).await.unwrap();
        }

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        tokio::time::timeout(Duration::from_secs(5), pool.join()).await.unwrap();
        assert!(!pool.has_pending_work());
        assert_eq!(pool.stats().succeeded, 4);

        let mut ids = Vec::new();
        for _ in 0..4 {
            let result = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            assert!(result.success);
            ids.push(result.effect_id);
        }
        ids.sort();
        assert_eq!(ids, (0..4u8).map(B256::repeat_byte).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_urgent_shutdown_fails_queued_actions() {
        let shutdown = GracefulShutdown::with_defaults();
        let (pool, intake, mut rx) = slow_pool(&shutdown);
        for n in 0..4u8 {
            intake.submit(action(n, ActionType::CollectFees, json!({}))).await.unwrap();
        }

        shutdown.request_shutdown(ShutdownSignal::Urgent);
        tokio::time::timeout(Duration::from_secs(5), pool.join()).await.unwrap();
        assert!(!pool.has_pending_work());

        let mut delivered = 0;
        while let Ok(Some(result)) = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
            delivered += 1;
            if !result.success {
                assert_eq!(
                    result.error_message.as_deref(),
                    Some("orchestrator shut down before execution")
                );
            }
        }
        assert_eq!(delivered, 4);
        assert_eq!(pool.stats().executed, 4);
    }
}
