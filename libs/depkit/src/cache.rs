//! Lazy, single-flight instantiation of singletons, plugins and actions.
//!
//! Each registry entry owns a [`Slot`]. The first caller to reach a slot runs
//! the routine; concurrent callers await the same pending initialisation and
//! observe the same instance.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::context::ConfigProvider;
use crate::deps::Deps;
use crate::error::{BrokerError, Kind};
use crate::registry::ComponentRegistry;
use crate::value::{ActionFn, Transform, Value};

/// Memoised instance of one component.
///
/// The mutex only guards swapping the cell on teardown; it is never held
/// across an await.
pub(crate) struct Slot<T> {
    cell: Mutex<Arc<OnceCell<T>>>,
}

impl<T: Clone> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            cell: Mutex::new(Arc::new(OnceCell::new())),
        }
    }

    fn current(&self) -> Arc<OnceCell<T>> {
        Arc::clone(&self.cell.lock())
    }

    /// Run `init` unless an instance exists or is being produced. A failed
    /// init leaves the slot empty.
    pub(crate) async fn get_or_start<F, Fut>(&self, init: F) -> Result<T, BrokerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let cell = self.current();
        cell.get_or_try_init(init).await.cloned()
    }

    pub(crate) fn get(&self) -> Option<T> {
        self.current().get().cloned()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.current().initialized()
    }

    /// Clear the slot and hand back its instance. Only one caller ever
    /// receives a given instance.
    pub(crate) fn take(&self) -> Option<T> {
        let mut guard = self.cell.lock();
        if !guard.initialized() {
            return None;
        }
        let old = std::mem::replace(&mut *guard, Arc::new(OnceCell::new()));
        old.get().cloned()
    }
}

fn required_singleton<'m>(
    owner: &str,
    name: &str,
    started: &'m BTreeMap<String, Value>,
) -> Result<&'m Value, BrokerError> {
    started.get(name).ok_or_else(|| BrokerError::NotFound {
        kind: Kind::Singleton,
        name: format!("{name} (required by '{owner}')"),
    })
}

/// Start `order` (already topologically sorted) and return every instance by name.
pub(crate) async fn start_singletons(
    registry: &ComponentRegistry,
    order: &[String],
    config: &dyn ConfigProvider,
) -> Result<BTreeMap<String, Value>, BrokerError> {
    let mut started = BTreeMap::new();

    for name in order {
        let entry = registry.singleton(name)?;
        let value = entry
            .slot
            .get_or_start(|| async {
                let mut deps = Deps::new(name.as_str());
                for dep in &entry.def.singletons {
                    deps.insert_singleton(dep.as_str(), required_singleton(name, dep, &started)?.clone());
                }
                deps.set_config(config.get_component_config(name).cloned());

                tracing::debug!(singleton = %name, "Starting singleton");
                entry
                    .def
                    .component
                    .start(&deps)
                    .await
                    .map_err(|source| BrokerError::Start {
                        singleton: name.clone(),
                        source,
                    })
            })
            .await?;
        started.insert(name.clone(), value);
    }

    Ok(started)
}

/// Start the named plugins; their singletons must already be in `singletons`.
pub(crate) async fn start_plugins<'n, I>(
    registry: &ComponentRegistry,
    names: I,
    singletons: &BTreeMap<String, Value>,
    config: &dyn ConfigProvider,
) -> Result<BTreeMap<String, Transform>, BrokerError>
where
    I: IntoIterator<Item = &'n str>,
{
    let mut started = BTreeMap::new();

    for name in names {
        let entry = registry.plugin(name)?;
        let transform = entry
            .slot
            .get_or_start(|| async {
                let mut deps = Deps::new(name);
                for dep in &entry.def.singletons {
                    deps.insert_singleton(dep.as_str(), required_singleton(name, dep, singletons)?.clone());
                }
                deps.set_config(config.get_component_config(name).cloned());

                tracing::debug!(plugin = name, "Starting plugin");
                entry
                    .def
                    .component
                    .start(&deps)
                    .await
                    .map_err(|source| BrokerError::Plugin {
                        plugin: name.to_string(),
                        source,
                    })
            })
            .await?;
        started.insert(name.to_string(), transform);
    }

    Ok(started)
}

/// Compose `order` (already topologically sorted), keyed by full action name.
pub(crate) async fn start_actions(
    registry: &ComponentRegistry,
    order: &[String],
    singletons: &BTreeMap<String, Value>,
    config: &dyn ConfigProvider,
) -> Result<BTreeMap<String, ActionFn>, BrokerError> {
    let mut composed = BTreeMap::new();

    for name in order {
        let entry = registry.action(name)?;
        let f = entry
            .slot
            .get_or_start(|| async {
                let def = &entry.def;

                let mut deps = Deps::new(name.as_str());
                for dep in &def.actions {
                    let f = composed.get(dep).cloned().ok_or_else(|| {
                        BrokerError::not_found(Kind::Action, format!("{dep} (required by '{name}')"))
                    })?;
                    deps.insert_action(dep.as_str(), f);
                }
                for dep in &def.singletons {
                    deps.insert_singleton(dep.as_str(), required_singleton(name, dep, singletons)?.clone());
                }
                deps.set_config(config.get_component_config(name).cloned());

                let plugins =
                    start_plugins(registry, def.required_plugins(), singletons, config).await?;

                tracing::debug!(action = %name, "Composing action");
                let value = def
                    .composer
                    .compose(&deps)
                    .await
                    .map_err(|source| BrokerError::Compose {
                        action: name.clone(),
                        source,
                    })?;
                let mut f = value.into_action().ok_or_else(|| BrokerError::ContractViolation {
                    action: name.clone(),
                })?;

                for (plugin, params) in &def.plugins {
                    let transform = plugins
                        .get(plugin)
                        .ok_or_else(|| BrokerError::not_found(Kind::Plugin, plugin.as_str()))?;
                    f = transform
                        .apply(f, params)
                        .map_err(|source| BrokerError::Plugin {
                            plugin: plugin.clone(),
                            source,
                        })?;
                }
                Ok(f)
            })
            .await?;
        composed.insert(name.clone(), f);
    }

    Ok(composed)
}
