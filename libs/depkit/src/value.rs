//! Dynamic values carried through dependency bags.
//!
//! Singletons produce [`Value::Data`], actions compose into [`Value::Action`],
//! plugins produce a [`Transform`] that rewrites an action's composed function.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

/// Type-erased shared payload.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Positional arguments passed to an [`ActionFn`].
pub type Args = Vec<Value>;

type ActionCall = dyn Fn(Args) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync;
type TransformCall = dyn Fn(ActionFn, &serde_json::Value) -> anyhow::Result<ActionFn> + Send + Sync;

/// A value produced by a component routine.
#[derive(Clone)]
pub enum Value {
    /// Passive data, e.g. a connection pool or a counter.
    Data(AnyValue),
    /// A reusable composed function.
    Action(ActionFn),
}

impl Value {
    pub fn data<T: Any + Send + Sync>(value: T) -> Self {
        Value::Data(Arc::new(value))
    }

    /// Wrap an async closure as a callable value.
    pub fn action<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Value::Action(ActionFn::new(f))
    }

    pub fn unit() -> Self {
        Value::data(())
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Action(_))
    }

    /// Downcast a data value. Returns `None` for actions or on type mismatch.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Data(data) => Arc::clone(data).downcast::<T>().ok(),
            Value::Action(_) => None,
        }
    }

    /// Same as [`Value::downcast`] but with an error naming the expected type.
    pub fn get<T: Any + Send + Sync>(&self) -> anyhow::Result<Arc<T>> {
        self.downcast::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "expected a data value of type `{}`, found {:?}",
                std::any::type_name::<T>(),
                self
            )
        })
    }

    pub fn as_action(&self) -> Option<&ActionFn> {
        match self {
            Value::Action(f) => Some(f),
            Value::Data(_) => None,
        }
    }

    pub fn into_action(self) -> Option<ActionFn> {
        match self {
            Value::Action(f) => Some(f),
            Value::Data(_) => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Data(_) => f.write_str("Value::Data(..)"),
            Value::Action(_) => f.write_str("Value::Action(..)"),
        }
    }
}

impl From<ActionFn> for Value {
    fn from(f: ActionFn) -> Self {
        Value::Action(f)
    }
}

/// Composed action: cheap to clone, invoked any number of times.
#[derive(Clone)]
pub struct ActionFn(Arc<ActionCall>);

impl ActionFn {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self(Arc::new(move |args| f(args).boxed()))
    }

    pub async fn call(&self, args: Args) -> anyhow::Result<Value> {
        (self.0)(args).await
    }

    /// Call and downcast the returned data value.
    pub async fn call_as<T: Any + Send + Sync>(&self, args: Args) -> anyhow::Result<Arc<T>> {
        self.call(args).await?.get::<T>()
    }
}

impl fmt::Debug for ActionFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActionFn(..)")
    }
}

/// Plugin product: rewrites a composed action using the parameters the
/// action declared for this plugin.
#[derive(Clone)]
pub struct Transform(Arc<TransformCall>);

impl Transform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ActionFn, &serde_json::Value) -> anyhow::Result<ActionFn> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A transform that returns the action unchanged.
    pub fn identity() -> Self {
        Self::new(|action, _| Ok(action))
    }

    pub fn apply(&self, action: ActionFn, params: &serde_json::Value) -> anyhow::Result<ActionFn> {
        (self.0)(action, params)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform(..)")
    }
}
