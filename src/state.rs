use std::sync::Arc;
use tokio::sync::Mutex;

use crate::api::RelayRun;
use crate::config::RelayConfig;
use crate::hub::Hub;
use crate::upstream::{HttpBackend, InferenceBackend, UpstreamResult};

/// Shared application state, constructed once at startup
pub struct AppState {
    pub hub: Arc<Hub>,
    pub backend: Arc<dyn InferenceBackend>,
    pub config: RelayConfig,
    /// Prediction stream currently being relayed, if any
    pub active_run: Mutex<Option<RelayRun>>,
}

impl AppState {
    pub fn new(config: RelayConfig, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            hub: Arc::new(Hub::new(config.subscriber_queue)),
            backend,
            config,
            active_run: Mutex::new(None),
        }
    }

    /// State talking to the inference service over HTTP
    pub fn from_config(config: RelayConfig) -> UpstreamResult<Self> {
        let backend = HttpBackend::from_config(&config)?;
        Ok(Self::new(config, Arc::new(backend)))
    }
}
