// depkit/src/registry.rs
use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::cache::Slot;
use crate::contracts::{ActionDef, Fixed, PluginDef, ServiceDef, SingletonDef};
use crate::deps::LOCAL_SEPARATOR;
use crate::error::{BrokerError, Kind};
use crate::mock::MockOverrides;
use crate::resolver::resolve_order;
use crate::value::{ActionFn, Transform, Value};

pub(crate) struct SingletonEntry {
    pub(crate) def: SingletonDef,
    pub(crate) slot: Slot<Value>,
}

pub(crate) struct ActionEntry {
    pub(crate) def: ActionDef,
    pub(crate) slot: Slot<ActionFn>,
}

pub(crate) struct PluginEntry {
    pub(crate) def: PluginDef,
    pub(crate) slot: Slot<Transform>,
}

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    /// Set when a start begins, before any routine runs.
    Starting,
    Running,
    /// Stop handler or teardown in progress.
    Stopping,
}

impl ServiceState {
    /// `Starting` and `Stopping` settle on their own; callers wait them out.
    pub fn is_transitional(self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Stopping)
    }
}

/// Orders resolved at start, kept for stop-time accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDependencies {
    pub singletons: Vec<String>,
    pub actions: Vec<String>,
}

#[derive(Debug)]
pub(crate) struct ServiceRuntime {
    pub(crate) state: ServiceState,
    pub(crate) dependencies: Option<ResolvedDependencies>,
}

pub(crate) struct ServiceEntry {
    pub(crate) def: ServiceDef,
    /// Full `service#action` names of the local actions.
    pub(crate) local_actions: Vec<String>,
    pub(crate) runtime: Mutex<ServiceRuntime>,
    /// Signalled whenever `runtime.state` leaves a transitional state.
    pub(crate) settled: Notify,
}

/// Validated set of component definitions with their runtime slots.
pub struct ComponentRegistry {
    singletons: BTreeMap<String, SingletonEntry>,
    actions: BTreeMap<String, ActionEntry>,
    plugins: BTreeMap<String, PluginEntry>,
    services: BTreeMap<String, ServiceEntry>,
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("singletons", &self.singletons.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ComponentRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub(crate) fn singleton(&self, name: &str) -> Result<&SingletonEntry, BrokerError> {
        self.singletons
            .get(name)
            .ok_or_else(|| BrokerError::not_found(Kind::Singleton, name))
    }

    pub(crate) fn action(&self, name: &str) -> Result<&ActionEntry, BrokerError> {
        self.actions
            .get(name)
            .ok_or_else(|| BrokerError::not_found(Kind::Action, name))
    }

    pub(crate) fn plugin(&self, name: &str) -> Result<&PluginEntry, BrokerError> {
        self.plugins
            .get(name)
            .ok_or_else(|| BrokerError::not_found(Kind::Plugin, name))
    }

    pub(crate) fn service(&self, name: &str) -> Result<&ServiceEntry, BrokerError> {
        self.services
            .get(name)
            .ok_or_else(|| BrokerError::not_found(Kind::Service, name))
    }

    pub(crate) fn services(&self) -> impl Iterator<Item = (&str, &ServiceEntry)> {
        self.services.iter().map(|(n, e)| (n.as_str(), e))
    }

    pub fn singleton_names(&self) -> impl Iterator<Item = &str> {
        self.singletons.keys().map(String::as_str)
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Order `roots` and their transitive singletons, dependencies first.
    pub fn resolve_singletons(
        &self,
        requester: &str,
        roots: &[String],
    ) -> Result<Vec<String>, BrokerError> {
        resolve_order(
            Kind::Singleton,
            requester,
            roots,
            |n| self.singletons.get(n).map(|e| e.def.singletons.as_slice()),
            |_| Ok(()),
        )
    }

    /// Order `roots` and their transitive actions, dependencies first.
    ///
    /// Every singleton a discovered action (or one of its plugins) requires
    /// must be part of `resolved_singletons`.
    pub fn resolve_actions(
        &self,
        requester: &str,
        roots: &[String],
        resolved_singletons: &[String],
    ) -> Result<Vec<String>, BrokerError> {
        let available: HashSet<&str> = resolved_singletons.iter().map(String::as_str).collect();

        resolve_order(
            Kind::Action,
            requester,
            roots,
            |n| self.actions.get(n).map(|e| e.def.actions.as_slice()),
            |action| {
                let def = &self.action(action)?.def;
                let mut required: Vec<&str> = def.singletons.iter().map(String::as_str).collect();
                for plugin in def.required_plugins() {
                    required.extend(self.plugin(plugin)?.def.singletons.iter().map(String::as_str));
                }
                match required.into_iter().find(|s| !available.contains(s)) {
                    Some(missing) => Err(BrokerError::UnresolvedDependency {
                        service: requester.to_string(),
                        action: action.to_string(),
                        singleton: missing.to_string(),
                    }),
                    None => Ok(()),
                }
            },
        )
    }

    /// Action order without the singleton pre-check.
    pub(crate) fn resolve_actions_unchecked(
        &self,
        requester: &str,
        roots: &[String],
    ) -> Result<Vec<String>, BrokerError> {
        resolve_order(
            Kind::Action,
            requester,
            roots,
            |n| self.actions.get(n).map(|e| e.def.actions.as_slice()),
            |_| Ok(()),
        )
    }

    /// Singletons declared by `actions` and their plugins, first occurrence order.
    pub(crate) fn singletons_required_by(
        &self,
        actions: &[String],
    ) -> Result<Vec<String>, BrokerError> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |name: &String| {
            if !out.contains(name) {
                out.push(name.clone());
            }
        };
        for action in actions {
            let def = &self.action(action)?.def;
            def.singletons.iter().for_each(&mut push);
            for plugin in def.required_plugins() {
                self.plugin(plugin)?.def.singletons.iter().for_each(&mut push);
            }
        }
        Ok(out)
    }

    /// Copy of the definitions with fresh slots, no services, and overridden
    /// components replaced by dependency-free constants.
    pub(crate) fn fork(&self, overrides: &MockOverrides) -> ComponentRegistry {
        let singletons = self
            .singletons
            .iter()
            .map(|(name, e)| {
                let def = match overrides.singletons.get(name) {
                    Some(v) => SingletonDef::new(Fixed(v.clone())),
                    None => e.def.clone(),
                };
                (name.clone(), SingletonEntry { def, slot: Slot::new() })
            })
            .collect();

        let actions = self
            .actions
            .iter()
            .map(|(name, e)| {
                let def = match overrides.actions.get(name) {
                    Some(f) => ActionDef::new(Fixed(Value::Action(f.clone()))),
                    None => e.def.clone(),
                };
                (name.clone(), ActionEntry { def, slot: Slot::new() })
            })
            .collect();

        let plugins = self
            .plugins
            .iter()
            .map(|(name, e)| {
                let def = match overrides.plugins.get(name) {
                    Some(t) => PluginDef::transform(t.clone()),
                    None => e.def.clone(),
                };
                (name.clone(), PluginEntry { def, slot: Slot::new() })
            })
            .collect();

        ComponentRegistry {
            singletons,
            actions,
            plugins,
            services: BTreeMap::new(),
        }
    }
}

/// The function type submitted via `inventory::submit!`.
pub struct Registrator(pub fn(&mut RegistryBuilder));

inventory::collect!(Registrator);

/// Declarative construction input: four optional name → definition maps.
#[derive(Clone, Default)]
pub struct BrokerConfig {
    pub singletons: HashMap<String, SingletonDef>,
    pub actions: HashMap<String, ActionDef>,
    pub plugins: HashMap<String, PluginDef>,
    pub services: HashMap<String, ServiceDef>,
}

/// Builder that collects definitions; uniqueness and references are
/// enforced at build time.
#[derive(Default)]
pub struct RegistryBuilder {
    singletons: BTreeMap<String, SingletonDef>,
    actions: BTreeMap<String, ActionDef>,
    plugins: BTreeMap<String, PluginDef>,
    services: BTreeMap<String, ServiceDef>,
    errors: Vec<String>,
}

fn insert_unique<T>(
    map: &mut BTreeMap<String, T>,
    errors: &mut Vec<String>,
    kind: Kind,
    name: String,
    def: T,
) {
    if map.contains_key(&name) {
        errors.push(format!("{kind} '{name}' is already registered"));
        return;
    }
    map.insert(name, def);
}

fn check_refs(
    kind: Kind,
    component: &str,
    depends_on_kind: Kind,
    names: &[String],
    known: &dyn Fn(&str) -> bool,
) -> Result<(), BrokerError> {
    match names.iter().find(|n| !known(n.as_str())) {
        Some(missing) => Err(BrokerError::UnknownDependency {
            kind,
            component: component.to_string(),
            depends_on_kind,
            depends_on: missing.clone(),
        }),
        None => Ok(()),
    }
}

fn validate_name(kind: Kind, name: &str) -> Result<(), BrokerError> {
    let reason = if name.trim().is_empty() {
        "name must not be empty"
    } else if name.contains(LOCAL_SEPARATOR) {
        "'#' is reserved for service-local actions"
    } else {
        return Ok(());
    };
    Err(BrokerError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    })
}

impl RegistryBuilder {
    /// Start from every `Registrator` linked into the binary.
    pub fn discover() -> Self {
        let mut b = RegistryBuilder::default();
        for r in ::inventory::iter::<Registrator> {
            r.0(&mut b);
        }
        b
    }

    pub fn from_config(config: BrokerConfig) -> Self {
        let mut b = RegistryBuilder::default();
        b.merge_config(config);
        b
    }

    pub fn merge_config(&mut self, config: BrokerConfig) -> &mut Self {
        // sorted so duplicate reports are stable
        for (name, def) in config.singletons.into_iter().collect::<BTreeMap<_, _>>() {
            self.register_singleton(name, def);
        }
        for (name, def) in config.actions.into_iter().collect::<BTreeMap<_, _>>() {
            self.register_action(name, def);
        }
        for (name, def) in config.plugins.into_iter().collect::<BTreeMap<_, _>>() {
            self.register_plugin(name, def);
        }
        for (name, def) in config.services.into_iter().collect::<BTreeMap<_, _>>() {
            self.register_service(name, def);
        }
        self
    }

    pub fn register_singleton(&mut self, name: impl Into<String>, def: SingletonDef) -> &mut Self {
        insert_unique(&mut self.singletons, &mut self.errors, Kind::Singleton, name.into(), def);
        self
    }

    pub fn register_action(&mut self, name: impl Into<String>, def: ActionDef) -> &mut Self {
        insert_unique(&mut self.actions, &mut self.errors, Kind::Action, name.into(), def);
        self
    }

    pub fn register_plugin(&mut self, name: impl Into<String>, def: PluginDef) -> &mut Self {
        insert_unique(&mut self.plugins, &mut self.errors, Kind::Plugin, name.into(), def);
        self
    }

    pub fn register_service(&mut self, name: impl Into<String>, def: ServiceDef) -> &mut Self {
        insert_unique(&mut self.services, &mut self.errors, Kind::Service, name.into(), def);
        self
    }

    /// Finalize: check names, expand local actions, verify every reference.
    pub fn build(self) -> Result<ComponentRegistry, BrokerError> {
        let RegistryBuilder {
            singletons,
            mut actions,
            plugins,
            services,
            mut errors,
        } = self;

        // 1) names
        for name in singletons.keys() {
            validate_name(Kind::Singleton, name)?;
        }
        for name in actions.keys() {
            validate_name(Kind::Action, name)?;
        }
        for name in plugins.keys() {
            validate_name(Kind::Plugin, name)?;
        }
        for (name, def) in &services {
            validate_name(Kind::Service, name)?;
            for (local, _) in &def.local_actions {
                validate_name(Kind::Action, local)?;
            }
        }

        // 2) register local actions under `service#action`
        let mut locals_by_service: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (service, def) in &services {
            let locals = locals_by_service.entry(service.clone()).or_default();
            for (local, action) in &def.local_actions {
                let full = format!("{service}{LOCAL_SEPARATOR}{local}");
                if locals.contains(&full) {
                    errors.push(format!("local action '{full}' is already registered"));
                    continue;
                }
                locals.push(full.clone());
                actions.insert(full, action.clone());
            }
        }

        if !errors.is_empty() {
            return Err(BrokerError::InvalidConfiguration { errors });
        }

        // 3) every reference points at a known definition
        let is_singleton = |n: &str| singletons.contains_key(n);
        let is_action = |n: &str| actions.contains_key(n);
        let is_plugin = |n: &str| plugins.contains_key(n);

        for (name, def) in &singletons {
            check_refs(Kind::Singleton, name, Kind::Singleton, &def.singletons, &is_singleton)?;
        }
        for (name, def) in &actions {
            check_refs(Kind::Action, name, Kind::Action, &def.actions, &is_action)?;
            check_refs(Kind::Action, name, Kind::Singleton, &def.singletons, &is_singleton)?;
            let plugin_names: Vec<String> = def.required_plugins().map(str::to_string).collect();
            check_refs(Kind::Action, name, Kind::Plugin, &plugin_names, &is_plugin)?;
        }
        for (name, def) in &plugins {
            check_refs(Kind::Plugin, name, Kind::Singleton, &def.singletons, &is_singleton)?;
        }
        for (name, def) in &services {
            check_refs(Kind::Service, name, Kind::Singleton, &def.singletons, &is_singleton)?;
            check_refs(Kind::Service, name, Kind::Action, &def.actions, &is_action)?;
        }

        let registry = ComponentRegistry {
            singletons: singletons
                .into_iter()
                .map(|(n, def)| (n, SingletonEntry { def, slot: Slot::new() }))
                .collect(),
            actions: actions
                .into_iter()
                .map(|(n, def)| (n, ActionEntry { def, slot: Slot::new() }))
                .collect(),
            plugins: plugins
                .into_iter()
                .map(|(n, def)| (n, PluginEntry { def, slot: Slot::new() }))
                .collect(),
            services: services
                .into_iter()
                .map(|(n, def)| {
                    let local_actions = locals_by_service.remove(&n).unwrap_or_default();
                    let entry = ServiceEntry {
                        def,
                        local_actions,
                        runtime: Mutex::new(ServiceRuntime {
                            state: ServiceState::Stopped,
                            dependencies: None,
                        }),
                        settled: Notify::new(),
                    };
                    (n, entry)
                })
                .collect(),
        };

        tracing::info!(
            singletons = registry.singletons.len(),
            actions = registry.actions.len(),
            plugins = registry.plugins.len(),
            services = ?registry.services.keys().collect::<Vec<_>>(),
            "Component registry built"
        );

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn singleton() -> SingletonDef {
        SingletonDef::from_fn(|_| async { Ok(Value::unit()) })
    }

    fn action() -> ActionDef {
        ActionDef::from_fn(|_| async { Ok(Value::action(|_| async { Ok(Value::unit()) })) })
    }

    fn service() -> ServiceDef {
        ServiceDef::from_fn(|_| async { Ok(()) })
    }

    #[test]
    fn duplicate_names_reported_in_configuration_errors() {
        let mut b = RegistryBuilder::default();
        b.register_singleton("a", singleton());
        b.register_singleton("a", singleton());
        b.register_action("a", action());

        match b.build().unwrap_err() {
            BrokerError::InvalidConfiguration { errors } => {
                assert_eq!(errors.len(), 1, "same name in another kind is fine: {errors:?}");
                assert!(errors[0].contains("singleton 'a' is already registered"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_reference_names_the_offending_kind() {
        let mut b = RegistryBuilder::default();
        b.register_action("send", action().singletons(["mailer"]));

        let err = b.build().unwrap_err();
        assert_eq!(
            err.to_string(),
            "action 'send' depends on unknown singleton 'mailer'"
        );
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        let mut b = RegistryBuilder::default();
        b.register_action("send", action().plugin("retry", serde_json::json!({ "times": 3 })));

        match b.build().unwrap_err() {
            BrokerError::UnknownDependency {
                depends_on_kind,
                depends_on,
                ..
            } => {
                assert_eq!(depends_on_kind, Kind::Plugin);
                assert_eq!(depends_on, "retry");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn reserved_separator_is_rejected() {
        let mut b = RegistryBuilder::default();
        b.register_action("billing#charge", action());
        assert!(matches!(
            b.build().unwrap_err(),
            BrokerError::InvalidName { kind: Kind::Action, .. }
        ));

        let mut b = RegistryBuilder::default();
        b.register_service(" ", service());
        assert!(matches!(
            b.build().unwrap_err(),
            BrokerError::InvalidName { kind: Kind::Service, .. }
        ));
    }

    #[test]
    fn local_actions_are_namespaced_and_referencable() {
        let mut b = RegistryBuilder::default();
        b.register_action("audit", action());
        b.register_service(
            "billing",
            service()
                .actions(["audit"])
                .local_action("charge", action().actions(["billing#refund"]))
                .local_action("refund", action()),
        );

        let reg = b.build().unwrap();
        let names: Vec<_> = reg.action_names().collect();
        assert_eq!(names, vec!["audit", "billing#charge", "billing#refund"]);
        assert_eq!(
            reg.service("billing").unwrap().local_actions,
            vec!["billing#charge", "billing#refund"]
        );
    }

    #[test]
    fn duplicate_local_action_is_rejected() {
        let mut b = RegistryBuilder::default();
        b.register_service(
            "billing",
            service()
                .local_action("charge", action())
                .local_action("charge", action()),
        );
        assert!(matches!(
            b.build().unwrap_err(),
            BrokerError::InvalidConfiguration { .. }
        ));
    }

    #[test]
    fn from_config_registers_every_kind() {
        let mut config = BrokerConfig::default();
        config.singletons.insert("db".into(), singleton());
        config.actions.insert("query".into(), action().singletons(["db"]));
        config.plugins.insert("trace".into(), PluginDef::transform(Transform::identity()));
        config.services.insert("api".into(), service().singletons(["db"]).actions(["query"]));

        let reg = RegistryBuilder::from_config(config).build().unwrap();
        assert_eq!(reg.singleton_names().collect::<Vec<_>>(), vec!["db"]);
        assert!(reg.plugin("trace").is_ok());
        assert_eq!(reg.service_names().collect::<Vec<_>>(), vec!["api"]);
    }

    #[test]
    fn action_singletons_must_be_resolved_for_the_service() {
        let mut b = RegistryBuilder::default();
        b.register_singleton("db", singleton());
        b.register_singleton("cache", singleton());
        b.register_action("leaf", action().singletons(["cache"]));
        b.register_action("top", action().actions(["leaf"]).singletons(["db"]));
        let reg = b.build().unwrap();

        let err = reg
            .resolve_actions("api", &["top".to_string()], &["db".to_string()])
            .unwrap_err();
        match err {
            BrokerError::UnresolvedDependency {
                service,
                action,
                singleton,
            } => {
                assert_eq!(service, "api");
                assert_eq!(action, "leaf");
                assert_eq!(singleton, "cache");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let order = reg
            .resolve_actions(
                "api",
                &["top".to_string()],
                &["db".to_string(), "cache".to_string()],
            )
            .unwrap();
        assert_eq!(order, vec!["leaf", "top"]);
    }

    #[test]
    fn plugin_singletons_take_part_in_the_check() {
        let mut b = RegistryBuilder::default();
        b.register_singleton("clock", singleton());
        b.register_plugin("timed", PluginDef::transform(Transform::identity()).requires(["clock"]));
        b.register_action("work", action().plugin("timed", serde_json::Value::Null));
        let reg = b.build().unwrap();

        let err = reg.resolve_actions("svc", &["work".to_string()], &[]).unwrap_err();
        assert!(matches!(err, BrokerError::UnresolvedDependency { singleton, .. } if singleton == "clock"));
    }
}
