//! Health check HTTP server
//!
//! Liveness and readiness probes for process supervision plus a Prometheus
//! text endpoint over mailbox, executor and nonce state.

use crate::coordination::ShutdownToken;
use crate::effects::ExecutorPool;
use crate::mailbox::MailboxManager;
use crate::signing::NonceManager;
use crate::sync::StoreSynchronizer;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    fn new(name: &str, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
        }
    }
}

/// Overall system health response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub components: Vec<ComponentHealth>,
    pub mailboxes: crate::mailbox::MailboxStats,
    pub executors: crate::effects::ExecutorStats,
    pub initialized_chains: Vec<u64>,
}

/// Shared state for the health server
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    mailboxes: Arc<MailboxManager>,
    executors: Arc<ExecutorPool>,
    nonces: Arc<NonceManager>,
    synchronizer: Arc<StoreSynchronizer>,
    /// Chains configured at startup; any missing from the nonce manager degrades health.
    expected_chains: Vec<u64>,
    shutting_down: AtomicBool,
}

impl HealthState {
    pub fn new(
        mailboxes: Arc<MailboxManager>,
        executors: Arc<ExecutorPool>,
        nonces: Arc<NonceManager>,
        synchronizer: Arc<StoreSynchronizer>,
        expected_chains: Vec<u64>,
    ) -> Self {
        Self {
            started_at: Utc::now(),
            mailboxes,
            executors,
            nonces,
            synchronizer,
            expected_chains,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn get_health(&self) -> HealthResponse {
        let mut components = Vec::new();

        let sync_status = if self.synchronizer.is_initialized() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        components.push(ComponentHealth::new(
            "store_synchronizer",
            sync_status,
            (!sync_status.is_healthy()).then(|| "Store addresses not resolved".to_string()),
        ));

        let mut initialized_chains = self.nonces.initialized_chains();
        initialized_chains.sort_unstable();
        let missing: Vec<u64> = self
            .expected_chains
            .iter()
            .copied()
            .filter(|chain_id| !initialized_chains.contains(chain_id))
            .collect();
        let nonce_status = if missing.is_empty() {
            HealthStatus::Healthy
        } else if missing.len() < self.expected_chains.len() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        components.push(ComponentHealth::new(
            "nonce_manager",
            nonce_status,
            (!missing.is_empty()).then(|| format!("Chains not initialized: {:?}", missing)),
        ));

        let shutdown_status = if self.shutting_down.load(Ordering::SeqCst) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };
        components.push(ComponentHealth::new(
            "lifecycle",
            shutdown_status,
            (!shutdown_status.is_healthy()).then(|| "Shutting down".to_string()),
        ));

        let status = components
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

        HealthResponse {
            status,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            components,
            mailboxes: self.mailboxes.get_stats(),
            executors: self.executors.stats(),
            initialized_chains,
        }
    }
}

/// Build the probe router.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Serve until shutdown is requested.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> crate::Result<()> {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.wait_for_shutdown().await;
            })
            .await
            .map_err(|e| crate::OrchestratorError::Internal(format!("Health server error: {}", e)))?;

        info!("Health server stopped");
        Ok(())
    }

    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health();
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness: the process is up.
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness: stores resolved, at least one chain usable, not draining.
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    match state.get_health().status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health();
    let health_status = match health.status {
        HealthStatus::Healthy => 1,
        HealthStatus::Degraded => 0,
        HealthStatus::Unhealthy => -1,
    };
    let m = &health.mailboxes;
    let e = &health.executors;

    let metrics = format!(
        r#"# HELP orch_up Health status (1=healthy, 0=degraded, -1=unhealthy)
# TYPE orch_up gauge
orch_up {}

# HELP orch_uptime_seconds Uptime in seconds
# TYPE orch_uptime_seconds counter
orch_uptime_seconds {}

# HELP orch_mailboxes Live strategy mailboxes
# TYPE orch_mailboxes gauge
orch_mailboxes {}

# HELP orch_mailbox_pending_events Events waiting in mailboxes
# TYPE orch_mailbox_pending_events gauge
orch_mailbox_pending_events {}

# HELP orch_mailbox_processing Mailboxes currently draining
# TYPE orch_mailbox_processing gauge
orch_mailbox_processing {}

# HELP orch_mailbox_processed_total Events processed successfully
# TYPE orch_mailbox_processed_total counter
orch_mailbox_processed_total {}

# HELP orch_mailbox_failed_total Events whose processing failed
# TYPE orch_mailbox_failed_total counter
orch_mailbox_failed_total {}

# HELP orch_effects_queued Actions waiting for an executor
# TYPE orch_effects_queued gauge
orch_effects_queued {}

# HELP orch_effects_in_flight Actions being executed
# TYPE orch_effects_in_flight gauge
orch_effects_in_flight {}

# HELP orch_effects_succeeded_total Effects that succeeded
# TYPE orch_effects_succeeded_total counter
orch_effects_succeeded_total {}

# HELP orch_effects_failed_total Effects that failed
# TYPE orch_effects_failed_total counter
orch_effects_failed_total {}

# HELP orch_initialized_chains Chains with an initialized nonce
# TYPE orch_initialized_chains gauge
orch_initialized_chains {}
"#,
        health_status,
        health.uptime_seconds,
        m.mailboxes,
        m.pending,
        m.processing,
        m.processed,
        m.failed,
        e.queued,
        e.in_flight,
        e.succeeded,
        e.failed,
        health.initialized_chains.len(),
    );

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        metrics,
    )
}
