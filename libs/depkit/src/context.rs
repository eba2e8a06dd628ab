use depkit_bootstrap::AppConfigProvider;

/// Source of per-component configuration sections.
pub trait ConfigProvider: Send + Sync {
    /// Raw config section of a component, keyed by its registered name.
    fn get_component_config(&self, name: &str) -> Option<&serde_json::Value>;
}

/// Provider with no sections; components see `Deps::config()` defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyConfigProvider;

impl ConfigProvider for EmptyConfigProvider {
    fn get_component_config(&self, _name: &str) -> Option<&serde_json::Value> {
        None
    }
}

impl ConfigProvider for AppConfigProvider {
    fn get_component_config(&self, name: &str) -> Option<&serde_json::Value> {
        self.inner().components.get(name)
    }
}

impl ConfigProvider for std::collections::HashMap<String, serde_json::Value> {
    fn get_component_config(&self, name: &str) -> Option<&serde_json::Value> {
        self.get(name)
    }
}
