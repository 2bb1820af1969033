//! Catalog of the devices reported by the backend.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task;
use tracing::info;

use crate::backend::{BackendError, ScanBackend};
use crate::config::CaptureConfig;
use crate::device::{Device, DeviceStatus};
use crate::error::{DeviceError, DeviceResult};
use crate::metrics::Metrics;

/// Owns the backend connection and the current generation of devices.
///
/// One instance is built at startup and shared through `AppState`.
pub struct DeviceRegistry {
    backend: Arc<dyn ScanBackend>,
    capture: CaptureConfig,
    metrics: Metrics,
    version: RwLock<String>,
    devices: RwLock<Vec<Arc<Device>>>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn ScanBackend>, capture: CaptureConfig, metrics: Metrics) -> Self {
        Self {
            backend,
            capture,
            metrics,
            version: RwLock::new(String::new()),
            devices: RwLock::new(Vec::new()),
        }
    }

    /// Resets the backend connection and records its version string.
    ///
    /// A reset invalidates every open session, so enabled devices are
    /// disabled first. Refused with `DeviceBusy` while any device is scanning.
    pub async fn initialize(&self) -> DeviceResult<String> {
        let devices = self.devices().await;
        for device in &devices {
            let status = device.status().await;
            if status == DeviceStatus::Scanning {
                return Err(DeviceError::DeviceBusy { name: device.name().to_string(), status });
            }
        }
        for device in &devices {
            device.reset().await?;
        }

        let backend = self.backend.clone();
        let version = task::spawn_blocking(move || {
            backend.exit();
            backend.init()
        })
        .await
        .map_err(|e| DeviceError::BackendFault(BackendError::Other(e.to_string())))??;

        info!("Backend initialized: {}", version);
        *self.version.write().await = version.clone();
        Ok(version)
    }

    pub async fn version(&self) -> String {
        self.version.read().await.clone()
    }

    /// Replaces the device collection with a fresh enumeration.
    ///
    /// Devices of the previous generation are released; one that is still
    /// scanning keeps running detached and closes its session when done.
    pub async fn refresh_devices(&self) -> DeviceResult<Vec<Arc<Device>>> {
        let backend = self.backend.clone();
        let found = task::spawn_blocking(move || backend.devices())
            .await
            .map_err(|e| DeviceError::BackendFault(BackendError::Other(e.to_string())))??;

        let fresh: Vec<Arc<Device>> = found
            .into_iter()
            .map(|info| Arc::new(Device::new(info, self.backend.clone(), self.capture.clone(), self.metrics.clone())))
            .collect();

        let retired = {
            let mut devices = self.devices.write().await;
            std::mem::replace(&mut *devices, fresh.clone())
        };
        for old in retired {
            old.release().await;
        }

        info!("Device list refreshed: {} device(s)", fresh.len());
        Ok(fresh)
    }

    pub async fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().await.clone()
    }

    pub async fn get_device(&self, name: &str) -> DeviceResult<Arc<Device>> {
        self.devices
            .read()
            .await
            .iter()
            .find(|d| d.name() == name)
            .cloned()
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string()))
    }
}
