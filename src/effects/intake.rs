use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::domain::QueuedAction;
use crate::error::{OrchestratorError, Result};

/// Shared bounded queue of effect requests. Executors compete for items;
/// each item is taken by exactly one executor.
pub struct ActionIntake {
    tx: mpsc::Sender<QueuedAction>,
    rx: Arc<Mutex<mpsc::Receiver<QueuedAction>>>,
    capacity: usize,
}

impl ActionIntake {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            capacity,
        }
    }

    /// Enqueue, waiting for room when the intake is full.
    pub async fn submit(&self, action: QueuedAction) -> Result<()> {
        self.tx
            .send(action)
            .await
            .map_err(|_| OrchestratorError::Internal("action intake closed".to_string()))
    }

    /// Enqueue without waiting. Fails when the intake is full.
    pub fn try_submit(&self, action: QueuedAction) -> Result<()> {
        self.tx.try_send(action).map_err(|e| match e {
            mpsc::error::TrySendError::Full(action) => {
                warn!(effect_id = %action.effect_id, "Action intake full");
                OrchestratorError::Internal(format!(
                    "action intake full ({} queued)",
                    self.capacity
                ))
            }
            mpsc::error::TrySendError::Closed(_) => {
                OrchestratorError::Internal("action intake closed".to_string())
            }
        })
    }

    /// Next queued action. Cancel-safe: dropping the future loses nothing.
    pub(crate) async fn next(&self) -> Option<QueuedAction> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Next queued action if one is ready, without waiting for producers.
    pub(crate) async fn try_next(&self) -> Option<QueuedAction> {
        let mut rx = self.rx.lock().await;
        rx.try_recv().ok()
    }

    /// Actions queued and not yet taken by an executor.
    pub fn pending(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
