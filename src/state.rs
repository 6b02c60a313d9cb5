use std::sync::Arc;

use crate::config::Config;
use crate::credentials::{SettingsProvider, StoreSettingsProvider};
use crate::powerbi::PowerBiClient;
use crate::store::RecordStore;
use crate::sync::SyncEngine;

/// Shared handles passed to every handler and CLI command.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub settings: Arc<dyn SettingsProvider>,
    pub powerbi: Arc<PowerBiClient>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RecordStore>) -> anyhow::Result<Self> {
        let powerbi = Arc::new(PowerBiClient::new(&config.powerbi)?);
        let settings: Arc<dyn SettingsProvider> =
            Arc::new(StoreSettingsProvider::new(store.clone()));
        Ok(Self {
            config,
            store,
            settings,
            powerbi,
        })
    }

    pub fn sync_engine(&self) -> SyncEngine {
        SyncEngine::new(self.store.clone(), self.powerbi.clone())
    }
}
