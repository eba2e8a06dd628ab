//! Component contracts and their declarations.
//!
//! A definition pairs a routine with the names it depends on. Routines are
//! either already-constructed components implementing one of the traits
//! below, or plain async closures wrapped by the `from_fn` constructors.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::deps::Deps;
use crate::value::{Transform, Value};

/// Process-scoped shared component, started at most once per lifetime.
#[async_trait]
pub trait Singleton: Send + Sync + 'static {
    async fn start(&self, deps: &Deps) -> anyhow::Result<Value>;

    /// Tear down a previously started instance.
    async fn stop(&self, _instance: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Composes an action once; the returned value must be callable.
#[async_trait]
pub trait Composer: Send + Sync + 'static {
    async fn compose(&self, deps: &Deps) -> anyhow::Result<Value>;
}

/// Singleton-like component exposing a transformation over composed actions.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    async fn start(&self, deps: &Deps) -> anyhow::Result<Transform>;
}

/// Top-level unit with its own start/stop lifecycle.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    async fn start(&self, deps: &Deps) -> anyhow::Result<()>;

    /// Receives no dependency bag.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/* ----------------------------- closure adapters ---------------------------- */

type StartFn<T> = dyn Fn(Deps) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync;
type StopFn = dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;
type HandlerStopFn = dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

fn boxed_start<T, F, Fut>(f: F) -> Arc<StartFn<T>>
where
    T: 'static,
    F: Fn(Deps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Arc::new(move |deps| f(deps).boxed())
}

struct FnSingleton {
    start: Arc<StartFn<Value>>,
    stop: Option<Arc<StopFn>>,
}

#[async_trait]
impl Singleton for FnSingleton {
    async fn start(&self, deps: &Deps) -> anyhow::Result<Value> {
        (self.start)(deps.clone()).await
    }

    async fn stop(&self, instance: Value) -> anyhow::Result<()> {
        match &self.stop {
            Some(stop) => stop(instance).await,
            None => Ok(()),
        }
    }
}

struct FnComposer(Arc<StartFn<Value>>);

#[async_trait]
impl Composer for FnComposer {
    async fn compose(&self, deps: &Deps) -> anyhow::Result<Value> {
        (self.0)(deps.clone()).await
    }
}

struct FnPlugin(Arc<StartFn<Transform>>);

#[async_trait]
impl Plugin for FnPlugin {
    async fn start(&self, deps: &Deps) -> anyhow::Result<Transform> {
        (self.0)(deps.clone()).await
    }
}

struct FnService {
    start: Arc<StartFn<()>>,
    stop: Option<Arc<HandlerStopFn>>,
}

#[async_trait]
impl ServiceHandler for FnService {
    async fn start(&self, deps: &Deps) -> anyhow::Result<()> {
        (self.start)(deps.clone()).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        match &self.stop {
            Some(stop) => stop().await,
            None => Ok(()),
        }
    }
}

/// Constant leaf used by the mock path to stand in for overridden components.
pub(crate) struct Fixed<T>(pub(crate) T);

#[async_trait]
impl Singleton for Fixed<Value> {
    async fn start(&self, _deps: &Deps) -> anyhow::Result<Value> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl Composer for Fixed<Value> {
    async fn compose(&self, _deps: &Deps) -> anyhow::Result<Value> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl Plugin for Fixed<Transform> {
    async fn start(&self, _deps: &Deps) -> anyhow::Result<Transform> {
        Ok(self.0.clone())
    }
}

fn names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

/* ------------------------------- definitions ------------------------------- */

#[derive(Clone)]
pub struct SingletonDef {
    pub(crate) singletons: Vec<String>,
    pub(crate) component: Arc<dyn Singleton>,
}

impl SingletonDef {
    pub fn new(component: impl Singleton) -> Self {
        Self::from_arc(Arc::new(component))
    }

    pub fn from_arc(component: Arc<dyn Singleton>) -> Self {
        Self {
            singletons: Vec::new(),
            component,
        }
    }

    pub fn from_fn<F, Fut>(start: F) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(FnSingleton {
            start: boxed_start(start),
            stop: None,
        })
    }

    /// Closure-based singleton with a teardown routine.
    pub fn from_fns<F, Fut, S, SFut>(start: F, stop: S) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
        S: Fn(Value) -> SFut + Send + Sync + 'static,
        SFut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(FnSingleton {
            start: boxed_start(start),
            stop: Some(Arc::new(move |instance| stop(instance).boxed())),
        })
    }

    pub fn requires<I, S>(mut self, singletons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.singletons = names(singletons);
        self
    }

    pub fn singletons(&self) -> &[String] {
        &self.singletons
    }
}

#[derive(Clone)]
pub struct ActionDef {
    pub(crate) actions: Vec<String>,
    pub(crate) singletons: Vec<String>,
    /// Required plugins with their default parameters, in application order.
    pub(crate) plugins: Vec<(String, serde_json::Value)>,
    pub(crate) composer: Arc<dyn Composer>,
}

impl ActionDef {
    pub fn new(composer: impl Composer) -> Self {
        Self::from_arc(Arc::new(composer))
    }

    pub fn from_arc(composer: Arc<dyn Composer>) -> Self {
        Self {
            actions: Vec::new(),
            singletons: Vec::new(),
            plugins: Vec::new(),
            composer,
        }
    }

    pub fn from_fn<F, Fut>(compose: F) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::new(FnComposer(boxed_start(compose)))
    }

    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = names(actions);
        self
    }

    pub fn singletons<I, S>(mut self, singletons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.singletons = names(singletons);
        self
    }

    /// Require a plugin, applied with `params` after composition.
    pub fn plugin(mut self, name: impl Into<String>, params: serde_json::Value) -> Self {
        self.plugins.push((name.into(), params));
        self
    }

    pub fn required_actions(&self) -> &[String] {
        &self.actions
    }

    pub fn required_singletons(&self) -> &[String] {
        &self.singletons
    }

    pub fn required_plugins(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(|(name, _)| name.as_str())
    }
}

#[derive(Clone)]
pub struct PluginDef {
    pub(crate) singletons: Vec<String>,
    pub(crate) component: Arc<dyn Plugin>,
}

impl PluginDef {
    pub fn new(component: impl Plugin) -> Self {
        Self::from_arc(Arc::new(component))
    }

    pub fn from_arc(component: Arc<dyn Plugin>) -> Self {
        Self {
            singletons: Vec::new(),
            component,
        }
    }

    pub fn from_fn<F, Fut>(start: F) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Transform>> + Send + 'static,
    {
        Self::new(FnPlugin(boxed_start(start)))
    }

    /// Plugin whose transform needs no injected dependencies.
    pub fn transform(transform: Transform) -> Self {
        Self::new(Fixed(transform))
    }

    pub fn requires<I, S>(mut self, singletons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.singletons = names(singletons);
        self
    }
}

#[derive(Clone)]
pub struct ServiceDef {
    pub(crate) singletons: Vec<String>,
    pub(crate) actions: Vec<String>,
    /// Local actions keyed by their unprefixed name.
    pub(crate) local_actions: Vec<(String, ActionDef)>,
    pub(crate) handler: Arc<dyn ServiceHandler>,
}

impl ServiceDef {
    pub fn new(handler: impl ServiceHandler) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    pub fn from_arc(handler: Arc<dyn ServiceHandler>) -> Self {
        Self {
            singletons: Vec::new(),
            actions: Vec::new(),
            local_actions: Vec::new(),
            handler,
        }
    }

    pub fn from_fn<F, Fut>(start: F) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(FnService {
            start: boxed_start(start),
            stop: None,
        })
    }

    pub fn from_fns<F, Fut, S, SFut>(start: F, stop: S) -> Self
    where
        F: Fn(Deps) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
        S: Fn() -> SFut + Send + Sync + 'static,
        SFut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(FnService {
            start: boxed_start(start),
            stop: Some(Arc::new(move || stop().boxed())),
        })
    }

    pub fn singletons<I, S>(mut self, singletons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.singletons = names(singletons);
        self
    }

    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = names(actions);
        self
    }

    /// Own an action scoped to this service, registered as `service#name`.
    pub fn local_action(mut self, name: impl Into<String>, def: ActionDef) -> Self {
        self.local_actions.push((name.into(), def));
        self
    }
}
