use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{ActionType, EffectOutcome, QueuedAction};
use crate::error::Result;

/// Carries out one kind of effect.
#[async_trait]
pub trait EffectHandler: Send + Sync {
    /// Reject malformed payloads before any side effect.
    fn validate(&self, payload: &JsonValue) -> Result<()>;

    async fn execute(&self, action: &QueuedAction) -> Result<EffectOutcome>;
}

/// Action type → handler. Built at startup, read-only afterwards.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ActionType, Arc<dyn EffectHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the previously registered handler, if any.
    pub fn register(
        &mut self,
        action_type: ActionType,
        handler: Arc<dyn EffectHandler>,
    ) -> Option<Arc<dyn EffectHandler>> {
        self.handlers.insert(action_type, handler)
    }

    pub fn resolve(&self, action_type: &ActionType) -> Option<Arc<dyn EffectHandler>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn action_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().map(|t| t.to_string()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
