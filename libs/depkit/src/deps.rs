//! Dependency bag handed to component routines.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde::de::DeserializeOwned;

use crate::value::{ActionFn, Value};

/// Separator between a service name and one of its local actions.
pub const LOCAL_SEPARATOR: char = '#';

/// Separator grouping action names into namespaces (`users.create`).
pub const PATH_SEPARATOR: char = '.';

/// Strip the `service#` prefix of a local action name.
pub fn logical_name(name: &str) -> &str {
    name.split_once(LOCAL_SEPARATOR)
        .map_or(name, |(_, local)| local)
}

/// Explicit mapping from logical name to injected value.
///
/// Only the dependencies the consumer declared are present; asking for
/// anything else is an error rather than a silent `None`.
#[derive(Clone, Default)]
pub struct Deps {
    owner: String,
    singletons: BTreeMap<String, Value>,
    actions: BTreeMap<String, ActionFn>,
    local_actions: BTreeMap<String, ActionFn>,
    config: Option<serde_json::Value>,
}

impl std::fmt::Debug for Deps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deps")
            .field("owner", &self.owner)
            .field("singletons", &self.singletons.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("local_actions", &self.local_actions.keys().collect::<Vec<_>>())
            .field("has_config", &self.config.is_some())
            .finish()
    }
}

impl Deps {
    pub(crate) fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }

    pub(crate) fn insert_singleton(&mut self, name: impl Into<String>, value: Value) {
        self.singletons.insert(name.into(), value);
    }

    pub(crate) fn insert_action(&mut self, name: impl Into<String>, f: ActionFn) {
        self.actions.insert(name.into(), f);
    }

    pub(crate) fn insert_local_action(&mut self, name: impl Into<String>, f: ActionFn) {
        self.local_actions.insert(name.into(), f);
    }

    pub(crate) fn set_config(&mut self, config: Option<serde_json::Value>) {
        self.config = config;
    }

    /// Name of the component receiving this bag.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn singleton(&self, name: &str) -> anyhow::Result<&Value> {
        self.singletons
            .get(name)
            .ok_or_else(|| anyhow!("'{}' did not declare singleton '{}'", self.owner, name))
    }

    /// Typed access to a data singleton.
    pub fn singleton_as<T: Any + Send + Sync>(&self, name: &str) -> anyhow::Result<Arc<T>> {
        self.singleton(name)?
            .get::<T>()
            .with_context(|| format!("singleton '{name}' injected into '{}'", self.owner))
    }

    pub fn action(&self, name: &str) -> anyhow::Result<&ActionFn> {
        self.actions
            .get(name)
            .ok_or_else(|| anyhow!("'{}' did not declare action '{}'", self.owner, name))
    }

    /// Actions grouped under a dotted namespace, keyed by the remainder of
    /// their name: `users` yields `create` for `users.create`.
    pub fn actions_in(&self, namespace: &str) -> BTreeMap<&str, &ActionFn> {
        self.actions
            .iter()
            .filter_map(|(name, f)| {
                name.strip_prefix(namespace)
                    .and_then(|rest| rest.strip_prefix(PATH_SEPARATOR))
                    .map(|rest| (rest, f))
            })
            .collect()
    }

    /// Local action of the owning service, by its unprefixed name.
    pub fn local_action(&self, name: &str) -> anyhow::Result<&ActionFn> {
        self.local_actions
            .get(name)
            .ok_or_else(|| anyhow!("service '{}' has no local action '{}'", self.owner, name))
    }

    pub fn singleton_names(&self) -> impl Iterator<Item = &str> {
        self.singletons.keys().map(String::as_str)
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn local_action_names(&self) -> impl Iterator<Item = &str> {
        self.local_actions.keys().map(String::as_str)
    }

    pub fn raw_config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }

    /// Typed config section of the owner. A missing section yields `T::default()`.
    pub fn config<T: DeserializeOwned + Default>(&self) -> anyhow::Result<T> {
        match &self.config {
            Some(raw) => serde_json::from_value(raw.clone())
                .with_context(|| format!("invalid config section for '{}'", self.owner)),
            None => Ok(T::default()),
        }
    }
}
