//! Startup configuration assembled from flags and environment.

use std::path::PathBuf;

use vigil_core::{ConfigError, InferenceConfig};
use vigil_proxy::ProxyConfig;
use vigil_storage::{SharedStorage, StorageError};

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Interception server port.
    pub port: u16,
    /// Inference endpoint settings.
    pub inference: InferenceConfig,
    /// Shared-storage override; `None` uses the platform data directory.
    pub storage_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Builds and validates a configuration. Any error here aborts startup.
    pub fn new(
        port: u16,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        storage_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }

        let inference = InferenceConfig::default()
            .with_endpoint(endpoint)
            .with_model(model);
        inference.validate()?;

        Ok(Self {
            port,
            inference,
            storage_dir,
        })
    }

    /// Interception server settings.
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig::default().with_port(self.port)
    }

    /// Opens shared storage, creating the directory if needed.
    pub fn open_storage(&self) -> Result<SharedStorage, StorageError> {
        match &self.storage_dir {
            Some(dir) => SharedStorage::create(dir),
            None => SharedStorage::open_default(),
        }
    }
}
