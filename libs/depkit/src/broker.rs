//! Broker - drives service start/stop over the shared component registry.
//!
//! Singletons are reference-counted implicitly: before each singleton is
//! taken down, the set still needed is recomputed from the resolved
//! dependencies of the other starting or running services.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{start_actions, start_singletons};
use crate::context::{ConfigProvider, EmptyConfigProvider};
use crate::deps::{logical_name, Deps};
use crate::error::{BrokerError, Kind};
use crate::mock::{self, MockOverrides};
use crate::registry::{
    BrokerConfig, ComponentRegistry, RegistryBuilder, ResolvedDependencies, ServiceEntry,
    ServiceState, SingletonEntry,
};
use crate::value::{ActionFn, Value};

/// Snapshot of a service declaration and its runtime state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub singletons: Vec<String>,
    pub actions: Vec<String>,
    /// Full `service#action` names.
    pub local_actions: Vec<String>,
    pub state: ServiceState,
    /// Present once a start resolved them.
    pub dependencies: Option<ResolvedDependencies>,
}

pub struct Broker {
    registry: Arc<ComponentRegistry>,
    config: Arc<dyn ConfigProvider>,
    /// Serialises stop-time in-use checks against dependency recording.
    teardown: Mutex<()>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("registry", &self.registry)
            .field("running", &self.running_services())
            .finish()
    }
}

fn check_name(kind: Kind, name: &str) -> Result<(), BrokerError> {
    if name.trim().is_empty() {
        return Err(BrokerError::InvalidName {
            kind,
            name: name.to_string(),
            reason: "name must not be empty",
        });
    }
    Ok(())
}

impl Broker {
    pub fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            config: Arc::new(EmptyConfigProvider),
            teardown: Mutex::new(()),
        }
    }

    /// Validate `config` and build a broker over it.
    pub fn from_config(config: BrokerConfig) -> Result<Self, BrokerError> {
        Ok(Self::new(RegistryBuilder::from_config(config).build()?))
    }

    /// Source of per-component config sections exposed through `Deps::config`.
    pub fn with_config_provider(mut self, config: Arc<dyn ConfigProvider>) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Start a service and everything it transitively requires.
    ///
    /// No-op when the service is already running. A start or stop already in
    /// flight for the same service is awaited first. On failure the service
    /// is left stopped; components started before the failure stay started.
    pub async fn start_service(&self, name: &str) -> Result<(), BrokerError> {
        check_name(Kind::Service, name)?;
        let entry = self.registry.service(name)?;

        if let Err(state) = claim(entry, ServiceState::Stopped, ServiceState::Starting).await {
            tracing::debug!(service = name, state = ?state, "Service already running");
            return Ok(());
        }
        let mut transition = Transition::new(entry, ServiceState::Stopped);

        match self.run_start(name, entry).await {
            Ok(()) => {
                transition.outcome = ServiceState::Running;
                tracing::info!(service = name, "Service started");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(service = name, error = %err, "Service failed to start");
                Err(err)
            }
        }
    }

    async fn run_start(&self, name: &str, entry: &ServiceEntry) -> Result<(), BrokerError> {
        let def = &entry.def;

        // Resolution is synchronous and happens before any routine runs.
        let singletons = self.registry.resolve_singletons(name, &def.singletons)?;
        let mut roots = def.actions.clone();
        roots.extend(entry.local_actions.iter().cloned());
        let actions = self.registry.resolve_actions(name, &roots, &singletons)?;

        tracing::info!(
            service = name,
            singletons = ?singletons,
            actions = ?actions,
            "Service dependency order resolved (topo)"
        );
        {
            let _teardown = self.teardown.lock();
            entry.runtime.lock().dependencies = Some(ResolvedDependencies {
                singletons: singletons.clone(),
                actions: actions.clone(),
            });
        }

        let config = self.config.as_ref();
        let started = start_singletons(&self.registry, &singletons, config).await?;
        let composed = start_actions(&self.registry, &actions, &started, config).await?;
        let locals = local_bag(&entry.local_actions, &composed)?;

        let mut deps = Deps::new(name);
        for s in &def.singletons {
            let value = started
                .get(s)
                .cloned()
                .ok_or_else(|| BrokerError::not_found(Kind::Singleton, s.as_str()))?;
            deps.insert_singleton(s.as_str(), value);
        }
        for a in &def.actions {
            let f = composed
                .get(a)
                .cloned()
                .ok_or_else(|| BrokerError::not_found(Kind::Action, a.as_str()))?;
            deps.insert_action(logical_name(a), f);
        }
        for (local, f) in locals {
            deps.insert_local_action(local, f);
        }
        deps.set_config(config.get_component_config(name).cloned());

        def.handler
            .start(&deps)
            .await
            .map_err(|source| BrokerError::ServiceStart {
                service: name.to_string(),
                source,
            })
    }

    /// Stop a service and tear down the singletons no other running service
    /// still needs. No-op when the service is not running; a start in flight
    /// is awaited and then stopped.
    pub async fn stop_service(&self, name: &str) -> Result<(), BrokerError> {
        check_name(Kind::Service, name)?;
        let entry = self.registry.service(name)?;

        if let Err(state) = claim(entry, ServiceState::Running, ServiceState::Stopping).await {
            tracing::debug!(service = name, state = ?state, "Service not running");
            return Ok(());
        }
        let _transition = Transition::new(entry, ServiceState::Stopped);
        let dependencies = entry.runtime.lock().dependencies.clone().unwrap_or_default();

        if let Err(err) = entry.def.handler.stop().await {
            tracing::warn!(service = name, error = %err, "Service stop handler failed");
        }

        for singleton in dependencies.singletons.iter().rev() {
            let Some((s, instance)) = self.release_singleton(name, singleton) else {
                continue;
            };
            tracing::debug!(service = name, singleton = %singleton, "Stopping singleton");
            if let Err(err) = s.def.component.stop(instance).await {
                tracing::warn!(singleton = %singleton, error = %err, "Failed to stop singleton");
            }
        }

        tracing::info!(service = name, "Service stopped");
        Ok(())
    }

    /// Take `singleton` out of its slot unless another service still lists it.
    ///
    /// The in-use check and the take happen under the teardown lock, which a
    /// starting service also holds while it records its dependencies.
    fn release_singleton(
        &self,
        stopping: &str,
        singleton: &str,
    ) -> Option<(&SingletonEntry, Value)> {
        let _teardown = self.teardown.lock();
        if self.singletons_in_use(stopping).contains(singleton) {
            tracing::debug!(service = stopping, singleton, "Singleton still in use");
            return None;
        }
        let entry = self.registry.singleton(singleton).ok()?;
        let instance = entry.slot.take()?;
        Some((entry, instance))
    }

    /// Union of the resolved singletons of every other starting or running
    /// service. Callers hold the teardown lock.
    fn singletons_in_use(&self, except: &str) -> HashSet<String> {
        let mut in_use = HashSet::new();
        for (name, entry) in self.registry.services() {
            if name == except {
                continue;
            }
            let rt = entry.runtime.lock();
            if !matches!(rt.state, ServiceState::Starting | ServiceState::Running) {
                continue;
            }
            if let Some(deps) = &rt.dependencies {
                in_use.extend(deps.singletons.iter().cloned());
            }
        }
        in_use
    }

    pub fn get_service_by_name(&self, name: &str) -> Result<ServiceInfo, BrokerError> {
        let entry = self.registry.service(name)?;
        let rt = entry.runtime.lock();
        Ok(ServiceInfo {
            name: name.to_string(),
            singletons: entry.def.singletons.clone(),
            actions: entry.def.actions.clone(),
            local_actions: entry.local_actions.clone(),
            state: rt.state,
            dependencies: rt.dependencies.clone(),
        })
    }

    /// True from the moment a start begins until its matching stop completes.
    pub fn is_service_running(&self, name: &str) -> bool {
        self.registry
            .service(name)
            .map(|e| e.runtime.lock().state != ServiceState::Stopped)
            .unwrap_or(false)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.registry.service_names().map(str::to_string).collect()
    }

    pub fn running_services(&self) -> Vec<String> {
        self.registry
            .services()
            .filter(|(_, e)| e.runtime.lock().state != ServiceState::Stopped)
            .map(|(n, _)| n.to_string())
            .collect()
    }

    pub fn is_singleton_started(&self, name: &str) -> bool {
        self.registry
            .singleton(name)
            .map(|e| e.slot.is_started())
            .unwrap_or(false)
    }

    /// Current instance of a started singleton.
    pub fn singleton_instance(&self, name: &str) -> Option<Value> {
        self.registry.singleton(name).ok().and_then(|e| e.slot.get())
    }

    /// Compose `name` against `overrides` without touching the shared cache.
    pub async fn mock_action(
        &self,
        name: &str,
        overrides: MockOverrides,
    ) -> Result<ActionFn, BrokerError> {
        mock::mock_action(&self.registry, self.config.as_ref(), name, overrides).await
    }
}

/// Wait out any transitional state, then move `from -> to`. Returns the
/// settled state when it is not `from`.
async fn claim(
    entry: &ServiceEntry,
    from: ServiceState,
    to: ServiceState,
) -> Result<(), ServiceState> {
    loop {
        // Registered before the state check so a settle in between is not missed.
        let settled = entry.settled.notified();
        {
            let mut rt = entry.runtime.lock();
            if !rt.state.is_transitional() {
                if rt.state != from {
                    return Err(rt.state);
                }
                rt.state = to;
                if to == ServiceState::Starting {
                    rt.dependencies = None;
                }
                return Ok(());
            }
        }
        settled.await;
    }
}

/// Settles a transitional state to `outcome` when dropped, including when the
/// owning future is cancelled.
struct Transition<'a> {
    entry: &'a ServiceEntry,
    outcome: ServiceState,
}

impl<'a> Transition<'a> {
    fn new(entry: &'a ServiceEntry, outcome: ServiceState) -> Self {
        Self { entry, outcome }
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        self.entry.runtime.lock().state = self.outcome;
        self.entry.settled.notify_waiters();
    }
}

fn local_bag(
    locals: &[String],
    composed: &BTreeMap<String, ActionFn>,
) -> Result<Vec<(String, ActionFn)>, BrokerError> {
    locals
        .iter()
        .map(|full| {
            composed
                .get(full)
                .cloned()
                .map(|f| (logical_name(full).to_string(), f))
                .ok_or_else(|| BrokerError::not_found(Kind::Action, full.as_str()))
        })
        .collect()
}
