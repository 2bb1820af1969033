use std::sync::Arc;

use crate::backend::ScanBackend;
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::registry::DeviceRegistry;

/// The shared application state.
///
/// Handed to every handler through Axum's `State` extractor. Cloning is cheap;
/// all fields are shared handles.
#[derive(Clone)]
pub struct AppState {
    /// The device catalog and backend connection.
    pub registry: Arc<DeviceRegistry>,
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// Process counters for scans and devices.
    pub metrics: Metrics,
}

impl AppState {
    /// Creates the state around a backend. The registry still has to be
    /// initialized and refreshed before devices show up.
    pub fn new(backend: Arc<dyn ScanBackend>, config: AppConfig) -> Self {
        let metrics = Metrics::new();
        let registry = DeviceRegistry::new(backend, config.capture.clone(), metrics.clone());
        Self { registry: Arc::new(registry), config: Arc::new(config), metrics }
    }
}
