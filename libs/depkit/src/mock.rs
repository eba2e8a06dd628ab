//! Compose a single action against substituted dependencies.
//!
//! The registry is forked with fresh slots and the overridden components
//! turned into constant leaves, then the regular resolver and instantiation
//! path runs on the fork. The shared cache is never touched.
//!
//! Singletons the fork had to start are stopped, in reverse order, once the
//! last clone of the returned action is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::cache::{start_actions, start_singletons};
use crate::context::ConfigProvider;
use crate::contracts::ActionDef;
use crate::error::{BrokerError, Kind};
use crate::registry::ComponentRegistry;
use crate::value::{ActionFn, Args, Transform, Value};

/// Replacement values for an action's declared dependencies.
#[derive(Clone, Default, Debug)]
pub struct MockOverrides {
    pub actions: HashMap<String, ActionFn>,
    pub singletons: HashMap<String, Value>,
    pub plugins: HashMap<String, Transform>,
}

impl MockOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, name: impl Into<String>, f: ActionFn) -> Self {
        self.actions.insert(name.into(), f);
        self
    }

    /// Shorthand for overriding an action with an async closure.
    pub fn action_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.action(name, ActionFn::new(f))
    }

    pub fn singleton(mut self, name: impl Into<String>, value: Value) -> Self {
        self.singletons.insert(name.into(), value);
        self
    }

    pub fn plugin(mut self, name: impl Into<String>, transform: Transform) -> Self {
        self.plugins.insert(name.into(), transform);
        self
    }

    /// Every key must name a direct dependency the action declares.
    fn validate(&self, action: &str, def: &ActionDef) -> Result<(), BrokerError> {
        let unknown = |kind: Kind, name: &str| BrokerError::UnknownOverride {
            action: action.to_string(),
            kind,
            name: name.to_string(),
        };

        let mut actions: Vec<&String> = self.actions.keys().collect();
        actions.sort();
        if let Some(name) = actions.into_iter().find(|n| !def.actions.contains(n)) {
            return Err(unknown(Kind::Action, name.as_str()));
        }

        let mut singletons: Vec<&String> = self.singletons.keys().collect();
        singletons.sort();
        if let Some(name) = singletons.into_iter().find(|n| !def.singletons.contains(n)) {
            return Err(unknown(Kind::Singleton, name.as_str()));
        }

        let mut plugins: Vec<&String> = self.plugins.keys().collect();
        plugins.sort();
        if let Some(name) = plugins
            .into_iter()
            .find(|n| !def.required_plugins().any(|p| p == n.as_str()))
        {
            return Err(unknown(Kind::Plugin, name.as_str()));
        }

        Ok(())
    }
}

pub(crate) async fn mock_action(
    registry: &ComponentRegistry,
    config: &dyn ConfigProvider,
    name: &str,
    overrides: MockOverrides,
) -> Result<ActionFn, BrokerError> {
    if name.trim().is_empty() {
        return Err(BrokerError::InvalidName {
            kind: Kind::Action,
            name: name.to_string(),
            reason: "name must not be empty",
        });
    }
    let def = &registry.action(name)?.def;
    overrides.validate(name, def)?;

    let scratch = Arc::new(registry.fork(&overrides));
    let roots = vec![name.to_string()];
    let requester = format!("mock:{name}");

    // Same resolution as a service start: singletons first, then actions
    // checked against them.
    let reachable = scratch.resolve_actions_unchecked(&requester, &roots)?;
    let singleton_roots = scratch.singletons_required_by(&reachable)?;
    let singletons = scratch.resolve_singletons(&requester, &singleton_roots)?;
    let actions = scratch.resolve_actions(&requester, &roots, &singletons)?;

    tracing::debug!(action = name, ?singletons, ?actions, "Mock dependencies resolved");

    let teardown = Arc::new(ScratchTeardown {
        action: name.to_string(),
        registry: Arc::clone(&scratch),
        order: singletons
            .iter()
            .filter(|s| !overrides.singletons.contains_key(s.as_str()))
            .cloned()
            .collect(),
    });

    let started = start_singletons(&scratch, &singletons, config).await?;
    let mut composed = start_actions(&scratch, &actions, &started, config).await?;

    let f = composed
        .remove(name)
        .ok_or_else(|| BrokerError::not_found(Kind::Action, name))?;

    Ok(ActionFn::new(move |args| {
        let teardown = Arc::clone(&teardown);
        let f = f.clone();
        async move {
            let _teardown = teardown;
            f.call(args).await
        }
    }))
}

/// Owns the forked registry of one mocked action.
struct ScratchTeardown {
    action: String,
    registry: Arc<ComponentRegistry>,
    /// Resolved order of the singletons the fork starts itself.
    order: Vec<String>,
}

impl Drop for ScratchTeardown {
    fn drop(&mut self) {
        let order = std::mem::take(&mut self.order);
        if order.iter().all(|s| !self.is_started(s)) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(action = %self.action, ?order, "No runtime to stop mock singletons");
            return;
        };

        let registry = Arc::clone(&self.registry);
        let action = std::mem::take(&mut self.action);
        handle.spawn(async move {
            for name in order.iter().rev() {
                let Ok(entry) = registry.singleton(name) else {
                    continue;
                };
                let Some(instance) = entry.slot.take() else {
                    continue;
                };
                tracing::debug!(action = %action, singleton = %name, "Stopping mock singleton");
                if let Err(err) = entry.def.component.stop(instance).await {
                    tracing::warn!(singleton = %name, error = %err, "Failed to stop mock singleton");
                }
            }
        });
    }
}

impl ScratchTeardown {
    fn is_started(&self, singleton: &str) -> bool {
        self.registry
            .singleton(singleton)
            .map(|e| e.slot.is_started())
            .unwrap_or(false)
    }
}
