use crate::config::AppConfig;
use std::sync::Arc;

/// Shared, read-only view over a loaded `AppConfig`.
#[derive(Debug, Clone)]
pub struct AppConfigProvider(Arc<AppConfig>);

impl AppConfigProvider {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(config))
    }

    pub fn from_arc(config: Arc<AppConfig>) -> Self {
        Self(config)
    }

    pub fn inner(&self) -> &AppConfig {
        &self.0
    }

    /// Raw section of the named component, if configured.
    pub fn component_config(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.components.get(name)
    }
}
