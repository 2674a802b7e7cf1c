//! Orchestrator wiring: builds every component over the collaborator ports,
//! starts the background loops and runs the graceful shutdown sequence.

use alloy::primitives::Address;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapters::LedgerEventProcessor;
use crate::clients::{ChainClients, EventProcessor, IntentStore, LedgerClient, TransactionSigner};
use crate::config::AppConfig;
use crate::coordination::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownSignal, ShutdownToken,
};
use crate::dispatch::EventDispatcher;
use crate::domain::{ActionType, DetectedDeposit, FundingRequest, FundingResult, QueuedAction};
use crate::effects::{default_registry, ActionIntake, EffectHandler, ExecutorPool};
use crate::error::{OrchestratorError, Result};
use crate::funding::{ComplianceGate, DepositWatcher, FundingManager};
use crate::mailbox::{MailboxManager, SubscriptionBook};
use crate::services::{HealthServer, HealthState};
use crate::signing::{NonceManager, TransactionSubmitter};
use crate::sync::StoreSynchronizer;

const DEPOSIT_CHANNEL_CAPACITY: usize = 256;

/// Tunables the runtime needs, independent of where they were loaded from.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub chain_ids: Vec<u64>,
    pub executor_workers: usize,
    pub intake_capacity: usize,
    pub reap_interval: Duration,
    pub max_idle: Duration,
    pub max_delivery_failures: u32,
    pub deposit_dedupe_window: u64,
    pub ledger_gas_limit: u64,
    pub callback_gas_limit: u64,
    pub shutdown: ShutdownConfig,
    pub health_port: Option<u16>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            chain_ids: Vec::new(),
            executor_workers: 4,
            intake_capacity: 1024,
            reap_interval: Duration::from_secs(300),
            max_idle: Duration::from_secs(3600),
            max_delivery_failures: 3,
            deposit_dedupe_window: 50_000,
            ledger_gas_limit: 5_000_000,
            callback_gas_limit: 1_000_000,
            shutdown: ShutdownConfig::default(),
            health_port: None,
        }
    }
}

impl From<&AppConfig> for RuntimeSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            chain_ids: config.chain_ids(),
            executor_workers: config.executor.workers,
            intake_capacity: config.executor.intake_capacity,
            reap_interval: Duration::from_secs(config.mailbox.reap_interval_secs),
            max_idle: Duration::from_secs(config.mailbox.max_idle_secs),
            max_delivery_failures: config.subscriptions.max_delivery_failures,
            deposit_dedupe_window: config.deposits.dedupe_window_blocks,
            ledger_gas_limit: config.ledger.gas_limit,
            callback_gas_limit: config.ledger.callback_gas_limit,
            shutdown: ShutdownConfig::from(&config.shutdown),
            health_port: config.health_port,
        }
    }
}

/// The external systems the orchestrator talks to.
pub struct Collaborators {
    pub ledger: Arc<dyn LedgerClient>,
    pub chains: ChainClients,
    pub signer: Arc<dyn TransactionSigner>,
    pub intents: Arc<dyn IntentStore>,
    /// Overrides ledger callback delivery, mostly for tests and embedding.
    pub processor: Option<Arc<dyn EventProcessor>>,
    /// Handlers registered on top of the built-in contract-call handlers.
    pub extra_handlers: Vec<(ActionType, Arc<dyn EffectHandler>)>,
}

impl Collaborators {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        chains: ChainClients,
        signer: Arc<dyn TransactionSigner>,
        intents: Arc<dyn IntentStore>,
    ) -> Self {
        Self {
            ledger,
            chains,
            signer,
            intents,
            processor: None,
            extra_handlers: Vec::new(),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn EventProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn with_handler(mut self, action_type: ActionType, handler: Arc<dyn EffectHandler>) -> Self {
        self.extra_handlers.push((action_type, handler));
        self
    }
}

pub struct Orchestrator {
    settings: RuntimeSettings,
    shutdown: Arc<GracefulShutdown>,
    synchronizer: Arc<StoreSynchronizer>,
    subscriptions: Arc<SubscriptionBook>,
    mailboxes: Arc<MailboxManager>,
    dispatcher: Arc<EventDispatcher>,
    nonces: Arc<NonceManager>,
    funding: Arc<FundingManager>,
    deposits: Arc<DepositWatcher>,
    deposit_tx: mpsc::Sender<DetectedDeposit>,
    deposit_rx: Mutex<Option<mpsc::Receiver<DetectedDeposit>>>,
    executors: Arc<ExecutorPool>,
    health: Arc<HealthState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(settings: RuntimeSettings, collaborators: Collaborators) -> Self {
        let Collaborators {
            ledger,
            chains,
            signer,
            intents,
            processor,
            extra_handlers,
        } = collaborators;

        let shutdown = Arc::new(GracefulShutdown::new(settings.shutdown.clone()));
        let synchronizer = Arc::new(StoreSynchronizer::new(Arc::clone(&ledger), settings.ledger_gas_limit));
        let subscriptions = Arc::new(SubscriptionBook::new(settings.max_delivery_failures));

        let processor = processor.unwrap_or_else(|| {
            Arc::new(LedgerEventProcessor::new(
                Arc::clone(&ledger),
                Arc::clone(&subscriptions),
                settings.callback_gas_limit,
            ))
        });
        let mailboxes = Arc::new(MailboxManager::new(processor));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&synchronizer),
            Arc::clone(&subscriptions),
            Arc::clone(&mailboxes),
        ));

        let nonces = Arc::new(NonceManager::new(signer.address(), chains.clone()));
        let submitter = Arc::new(TransactionSubmitter::new(Arc::clone(&nonces), chains.clone(), signer));
        let compliance = Arc::new(ComplianceGate::new(intents));

        let mut registry = default_registry(Arc::clone(&compliance), Arc::clone(&submitter));
        for (action_type, handler) in extra_handlers {
            if registry.register(action_type.clone(), handler).is_some() {
                warn!(action_type = %action_type, "Built-in effect handler replaced");
            }
        }
        let executors = Arc::new(ExecutorPool::new(
            settings.executor_workers,
            Arc::new(ActionIntake::new(settings.intake_capacity)),
            Arc::new(registry),
            Arc::clone(&mailboxes),
        ));

        let funding = Arc::new(FundingManager::new(
            chains,
            Arc::clone(&synchronizer),
            compliance,
            submitter,
            ledger,
            settings.callback_gas_limit,
        ));
        let deposits = Arc::new(DepositWatcher::new(
            Arc::clone(&synchronizer),
            Arc::clone(&mailboxes),
            settings.deposit_dedupe_window,
        ));
        let (deposit_tx, deposit_rx) = mpsc::channel(DEPOSIT_CHANNEL_CAPACITY);

        let health = Arc::new(HealthState::new(
            Arc::clone(&mailboxes),
            Arc::clone(&executors),
            Arc::clone(&nonces),
            Arc::clone(&synchronizer),
            settings.chain_ids.clone(),
        ));

        Self {
            settings,
            shutdown,
            synchronizer,
            subscriptions,
            mailboxes,
            dispatcher,
            nonces,
            funding,
            deposits,
            deposit_tx,
            deposit_rx: Mutex::new(Some(deposit_rx)),
            executors,
            health,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Resolve stores, load nonces and spawn the background loops.
    ///
    /// A chain whose nonce cannot be loaded stays uninitialized and is
    /// reported by the health surface; startup fails only if the stores
    /// cannot be resolved or no configured chain could be initialized.
    pub async fn start(&self) -> Result<()> {
        let stores = self.synchronizer.initialize().await?;
        debug!(?stores, "Mirror stores resolved");

        let mut ready = 0usize;
        for &chain_id in &self.settings.chain_ids {
            match self.nonces.initialize_chain(chain_id).await {
                Ok(nonce) => {
                    ready += 1;
                    info!(chain_id, nonce, "Chain ready");
                }
                Err(e) => error!(chain_id, error = %e, "Chain initialization failed"),
            }
        }
        if !self.settings.chain_ids.is_empty() && ready == 0 {
            return Err(OrchestratorError::Validation("no configured chain could be initialized".into()));
        }

        self.executors.start(&self.shutdown);

        let deposit_rx = self
            .deposit_rx
            .lock()
            .map_err(|_| OrchestratorError::Internal("deposit receiver lock poisoned".into()))?
            .take();
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        match deposit_rx {
            Some(rx) => tasks.push(tokio::spawn(Arc::clone(&self.deposits).run(rx, self.shutdown.token()))),
            None => warn!("Orchestrator already started"),
        }

        tasks.push(tokio::spawn(reap_loop(
            Arc::clone(&self.mailboxes),
            self.settings.reap_interval,
            self.settings.max_idle,
            self.shutdown.token(),
        )));

        if let Some(port) = self.settings.health_port {
            let server = HealthServer::new(Arc::clone(&self.health), port);
            let token = self.shutdown.token();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = server.run(token).await {
                    error!(error = %e, "Health server failed");
                }
            }));
        }

        info!(
            chains = ?self.nonces.initialized_chains(),
            workers = self.settings.executor_workers,
            "Orchestrator started"
        );
        Ok(())
    }

    /// Block until a shutdown signal arrives, then drain and stop.
    pub async fn run_until_shutdown(&self) -> bool {
        install_signal_handlers(Arc::clone(&self.shutdown)).await;
        let signal = self.shutdown.token().wait_for_shutdown().await;
        self.drain_and_stop(signal).await
    }

    /// Request shutdown and run the drain sequence. Returns whether all work
    /// drained before the timeout.
    pub async fn shutdown(&self, signal: ShutdownSignal) -> bool {
        self.shutdown.request_shutdown(signal);
        self.drain_and_stop(signal).await
    }

    async fn drain_and_stop(&self, signal: ShutdownSignal) -> bool {
        self.health.set_shutting_down();
        info!(%signal, stats = %self.mailboxes.get_stats(), "Draining orchestrator");

        let executors = Arc::clone(&self.executors);
        let drain_executors = Arc::clone(&self.executors);
        let mailboxes = Arc::clone(&self.mailboxes);
        let poll = self.shutdown.config().poll_interval();
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            guard.drain(..).collect()
        };

        self.shutdown
            .execute(
                move || {
                    Box::pin(async move {
                        debug!(queued = executors.stats().queued, "New actions refused, settling queued ones");
                    })
                },
                move |timeout| {
                    Box::pin(async move {
                        tokio::time::timeout(timeout, drain_executors.join()).await.is_ok()
                            && !drain_executors.has_pending_work()
                    })
                },
                move |timeout| Box::pin(async move { mailboxes.wait_until_idle(timeout, poll).await }),
                move || {
                    Box::pin(async move {
                        for task in tasks {
                            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                                warn!("Background task did not stop in time");
                            }
                        }
                    })
                },
            )
            .await
    }

    /// Queue an action for the executor pool.
    pub async fn submit_action(&self, action: QueuedAction) -> Result<()> {
        if self.shutdown.is_shutdown_requested() {
            return Err(OrchestratorError::Validation("orchestrator is shutting down".into()));
        }
        self.executors.intake().submit(action).await
    }

    pub async fn handle_funding_request(&self, request: FundingRequest) -> FundingResult {
        self.funding.handle_request(request).await
    }

    /// Channel fed by whatever detects transfers into the shared wallet.
    pub fn deposit_sender(&self) -> mpsc::Sender<DetectedDeposit> {
        self.deposit_tx.clone()
    }

    /// Attribute deposits from `owner` to `strategy`.
    pub fn register_strategy_owner(&self, owner: Address, strategy: Address) {
        self.deposits.register_owner(owner, strategy);
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionBook> {
        &self.subscriptions
    }

    pub fn mailboxes(&self) -> &Arc<MailboxManager> {
        &self.mailboxes
    }

    pub fn nonces(&self) -> &Arc<NonceManager> {
        &self.nonces
    }

    pub fn synchronizer(&self) -> &Arc<StoreSynchronizer> {
        &self.synchronizer
    }

    pub fn executors(&self) -> &Arc<ExecutorPool> {
        &self.executors
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    pub fn shutdown_handle(&self) -> Arc<GracefulShutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Pending mailbox events, queued actions or in-flight effects.
    pub fn has_pending_work(&self) -> bool {
        self.mailboxes.has_pending_work() || self.executors.has_pending_work()
    }
}

async fn reap_loop(
    mailboxes: Arc<MailboxManager>,
    interval: Duration,
    max_idle: Duration,
    mut token: ShutdownToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = token.wait_for_shutdown() => break,
            _ = ticker.tick() => {
                let reaped = mailboxes.reap_idle(max_idle);
                if reaped > 0 {
                    info!(reaped, remaining = mailboxes.mailbox_count(), "Reaped idle mailboxes");
                }
            }
        }
    }
    debug!("Mailbox reaper stopped");
}
