//! crates/bookwise_core/src/settings.rs
//!
//! Loads and saves each user's `ChatSettings` through a `KeyValueStore`.

use crate::domain::{ChatSettings, ConversationMode};
use crate::ports::{KeyValueStore, PortError, PortResult};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub const MODEL_KEY: &str = "bookwise-ai-model";
pub const MODE_KEY: &str = "bookwise-conversation-mode";

/// Models offered when the deployment does not configure its own list.
pub const DEFAULT_MODELS: [&str; 3] = [
    "gemini-1.5-flash-latest",
    "gemini-1.5-pro-latest",
    "gemini-2.0-flash",
];

#[derive(Clone)]
pub struct SettingsRepository {
    store: Arc<dyn KeyValueStore>,
    available_models: Vec<String>,
}

impl SettingsRepository {
    /// Creates a repository. An empty model list falls back to `DEFAULT_MODELS`.
    pub fn new(store: Arc<dyn KeyValueStore>, available_models: Vec<String>) -> Self {
        let available_models = if available_models.is_empty() {
            DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
        } else {
            available_models
        };
        Self {
            store,
            available_models,
        }
    }

    pub fn available_models(&self) -> &[String] {
        &self.available_models
    }

    pub fn defaults(&self) -> ChatSettings {
        ChatSettings {
            model: self.available_models[0].clone(),
            conversation_mode: ConversationMode::Chat,
        }
    }

    /// Reads the owner's settings. Missing, unreadable or no-longer-offered
    /// values fall back to the defaults.
    pub async fn load(&self, owner: Uuid) -> ChatSettings {
        let defaults = self.defaults();

        let model = match self.store.get(&key(owner, MODEL_KEY)).await {
            Ok(Some(saved)) if self.is_available(&saved) => saved,
            Ok(_) => defaults.model,
            Err(e) => {
                warn!(%owner, error = %e, "Could not read model setting");
                defaults.model
            }
        };

        let conversation_mode = match self.store.get(&key(owner, MODE_KEY)).await {
            Ok(Some(saved)) => saved.parse().unwrap_or(defaults.conversation_mode),
            Ok(None) => defaults.conversation_mode,
            Err(e) => {
                warn!(%owner, error = %e, "Could not read conversation mode setting");
                defaults.conversation_mode
            }
        };

        ChatSettings {
            model,
            conversation_mode,
        }
    }

    pub async fn save(&self, owner: Uuid, settings: &ChatSettings) -> PortResult<()> {
        if !self.is_available(&settings.model) {
            return Err(PortError::Validation(format!(
                "model '{}' is not one of the available models",
                settings.model
            )));
        }
        self.store
            .set(&key(owner, MODEL_KEY), &settings.model)
            .await?;
        self.store
            .set(&key(owner, MODE_KEY), settings.conversation_mode.as_str())
            .await
    }

    fn is_available(&self, model: &str) -> bool {
        self.available_models.iter().any(|m| m == model)
    }
}

fn key(owner: Uuid, name: &str) -> String {
    format!("{owner}:{name}")
}
