//! Strategy intents loaded from a JSON file.
//!
//! The file holds an array of signed intents. Signatures are checked by the
//! compliance gate on every use, not at load.

use alloy::primitives::Address;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::clients::IntentStore;
use crate::domain::StrategyIntent;
use crate::error::{OrchestratorError, Result};

pub struct FileIntentStore {
    path: PathBuf,
    intents: RwLock<HashMap<Address, StrategyIntent>>,
}

impl FileIntentStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            intents: RwLock::new(HashMap::new()),
        };
        store.reload()?;
        Ok(store)
    }

    /// Re-read the file, replacing every intent. Returns the number loaded.
    pub fn reload(&self) -> Result<usize> {
        let raw = std::fs::read_to_string(&self.path)?;
        let parsed: Vec<StrategyIntent> = serde_json::from_str(&raw)?;

        let mut intents = HashMap::with_capacity(parsed.len());
        for intent in parsed {
            if intents.insert(intent.strategy_address, intent).is_some() {
                warn!(path = %self.path.display(), "Duplicate intent entry, keeping the last");
            }
        }

        let count = intents.len();
        *self
            .intents
            .write()
            .map_err(|_| OrchestratorError::Internal("intent store lock poisoned".into()))? = intents;
        info!(path = %self.path.display(), count, "Loaded strategy intents");
        Ok(count)
    }

    pub fn intents(&self) -> Vec<StrategyIntent> {
        self.intents
            .read()
            .map(|intents| intents.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl IntentStore for FileIntentStore {
    async fn get_intent(&self, strategy: Address) -> Result<Option<StrategyIntent>> {
        let intents = self
            .intents
            .read()
            .map_err(|_| OrchestratorError::Internal("intent store lock poisoned".into()))?;
        Ok(intents.get(&strategy).cloned())
    }
}
