use async_trait::async_trait;
use eyre::{Result, eyre};
use std::sync::Arc;

use lumen_core::api::RelayClient;
use lumen_core::chat::{ChatStreamClient, ChatStreamConfig};
use lumen_core::lifecycle::ModelLifecycleController;
use lumen_core::preferences::{FilePreferenceStore, PreferenceStore};
use lumen_core::state::StateStore;

pub mod chat;
pub mod models;
pub mod select;
pub mod serve;

#[async_trait]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Everything a client-side command needs, wired against the relay.
pub struct ClientContext {
    pub store: StateStore,
    pub lifecycle: ModelLifecycleController,
    pub chat: ChatStreamClient,
}

impl ClientContext {
    /// Build from the preferences file, with `relay` overriding its relay URL.
    ///
    /// The store is hydrated from the remembered selection and then refreshed
    /// from the relay.
    pub async fn connect(relay: Option<&str>, min_update_interval_ms: Option<u64>) -> Result<Self> {
        let preferences = Arc::new(FilePreferenceStore::open_default()?);
        let mut stored = preferences.load();
        if let Some(ms) = min_update_interval_ms {
            stored.min_update_interval_ms = Some(ms);
        }

        let relay_url = relay.unwrap_or_else(|| stored.relay_url()).to_string();
        let api = Arc::new(
            RelayClient::new(&relay_url).map_err(|e| eyre!("Invalid relay URL: {}", e))?,
        );

        let store = StateStore::default();
        store.hydrate(&stored.models);

        let lifecycle = ModelLifecycleController::new(store.clone(), api.clone(), preferences);
        lifecycle
            .initialize()
            .await
            .map_err(|e| eyre!("Failed to reach relay at {}: {}", relay_url, e))?;

        let chat = ChatStreamClient::with_config(store.clone(), api, ChatStreamConfig::from(&stored));

        Ok(Self {
            store,
            lifecycle,
            chat,
        })
    }
}
