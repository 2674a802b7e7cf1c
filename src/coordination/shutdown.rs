//! Graceful Shutdown Handler
//!
//! Stops intake, drains executors and mailboxes within a bounded time, then
//! stops the remaining background services.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown - skip draining
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for executors and mailboxes to go idle (default: 60s)
    pub drain_timeout_secs: u64,
    /// Poll interval when waiting for pending work (default: 500ms)
    pub poll_interval_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 60,
            poll_interval_ms: 500,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// Executors stop taking new actions
    StoppingIntake,
    /// Waiting for in-flight effects
    DrainingExecutors,
    /// Waiting for mailboxes to go idle
    DrainingMailboxes,
    /// Health server and background loops
    StoppingServices,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingIntake => write!(f, "stopping_intake"),
            ShutdownPhase::DrainingExecutors => write!(f, "draining_executors"),
            ShutdownPhase::DrainingMailboxes => write!(f, "draining_mailboxes"),
            ShutdownPhase::StoppingServices => write!(f, "stopping_services"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

pub type ShutdownStep<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    urgent: AtomicBool,
    phase: watch::Sender<ShutdownPhase>,
    phase_rx: watch::Receiver<ShutdownPhase>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase_tx, phase_rx) = watch::channel(ShutdownPhase::Running);
        let (signal_tx, _) = broadcast::channel(8);

        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            urgent: AtomicBool::new(false),
            phase: phase_tx,
            phase_rx,
            signal_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.config
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase_rx.clone()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if signal == ShutdownSignal::Urgent {
            self.urgent.store(true, Ordering::SeqCst);
        }
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        let _ = self.signal_tx.send(signal);
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        let _ = self.phase.send(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Run the shutdown sequence. Each drain step reports whether it reached
    /// idle; both share one drain deadline. Returns `false` if draining timed
    /// out or was skipped by an urgent signal.
    pub async fn execute<F1, F2, F3, F4>(
        &self,
        stop_intake: F1,
        drain_executors: F2,
        drain_mailboxes: F3,
        stop_services: F4,
    ) -> bool
    where
        F1: FnOnce() -> ShutdownStep<()>,
        F2: FnOnce(Duration) -> ShutdownStep<bool>,
        F3: FnOnce(Duration) -> ShutdownStep<bool>,
        F4: FnOnce() -> ShutdownStep<()>,
    {
        let start = std::time::Instant::now();
        let deadline = self.config.drain_timeout();
        info!("Starting graceful shutdown (drain timeout: {}s)", self.config.drain_timeout_secs);

        self.set_phase(ShutdownPhase::StoppingIntake);
        stop_intake().await;
        debug!("Executors stopped taking new actions");

        let mut drained = !self.urgent.load(Ordering::SeqCst);
        if drained {
            self.set_phase(ShutdownPhase::DrainingExecutors);
            drained = drain_executors(deadline).await;
            if !drained {
                warn!("Effects still in flight after drain timeout");
            }

            self.set_phase(ShutdownPhase::DrainingMailboxes);
            let remaining = deadline.saturating_sub(start.elapsed());
            if drain_mailboxes(remaining).await {
                debug!("All mailboxes idle");
            } else {
                warn!("Mailboxes still busy after drain timeout, proceeding anyway");
                drained = false;
            }
        } else {
            warn!("Urgent shutdown, skipping drain");
        }

        self.set_phase(ShutdownPhase::StoppingServices);
        stop_services().await;

        self.set_phase(ShutdownPhase::Complete);
        if drained {
            info!("Graceful shutdown completed in {:?}", start.elapsed());
        } else {
            error!("Shutdown completed with undrained work after {:?}", start.elapsed());
        }
        drained
    }

    /// Token for tasks that need to observe shutdown.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            shutdown_requested: self.is_shutdown_requested(),
            signal_rx: self.signal_tx.subscribe(),
            phase_rx: self.phase_rx.clone(),
        }
    }
}

/// Token for checking shutdown status in async tasks
pub struct ShutdownToken {
    shutdown_requested: bool,
    signal_rx: broadcast::Receiver<ShutdownSignal>,
    phase_rx: watch::Receiver<ShutdownPhase>,
}

impl ShutdownToken {
    /// Check if shutdown was requested at token creation time
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&mut self) -> ShutdownSignal {
        if self.shutdown_requested {
            return ShutdownSignal::Graceful;
        }
        match self.signal_rx.recv().await {
            Ok(signal) => signal,
            Err(_) => ShutdownSignal::Urgent,
        }
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }
}

/// Request shutdown on SIGTERM / SIGINT (graceful) and SIGQUIT (urgent).
pub async fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let handlers = [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ];
        for (kind, name, shutdown_signal) in handlers {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to install {} handler: {}", name, e);
                    continue;
                }
            };
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                stream.recv().await;
                info!("Received {}", name);
                shutdown.request_shutdown(shutdown_signal);
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}
