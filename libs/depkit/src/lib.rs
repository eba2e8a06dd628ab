//! # DepKit - Dependency-Injection Runtime
//!
//! Declare named components, let the broker resolve and start them.
//!
//! ## Features
//!
//! - **Declarative**: singletons, actions, plugins and services declare the
//!   names they depend on; routines are traits or plain async closures
//! - **Resolved per request**: every start rebuilds the dependency graph,
//!   reports cycles with their full chain and orders dependencies first
//! - **Single-flight**: each singleton starts at most once, concurrent
//!   callers await the same instance
//! - **Shared lifecycle**: stopping a service tears down only the singletons
//!   no other running service still needs
//! - **Mockable**: compose any action against substituted dependencies
//!
//! ## Example
//!
//! ```rust,ignore
//! use depkit::{ActionDef, Broker, RegistryBuilder, ServiceDef, SingletonDef, Value};
//!
//! let mut b = RegistryBuilder::default();
//! b.register_singleton("s1", SingletonDef::from_fn(|_| async { Ok(Value::data(1_i64)) }));
//! b.register_action(
//!     "plusTwo",
//!     ActionDef::from_fn(|deps| async move {
//!         let s1 = deps.singleton_as::<i64>("s1")?;
//!         Ok(Value::action(move |_| {
//!             let s1 = s1.clone();
//!             async move { Ok(Value::data(*s1 + 2)) }
//!         }))
//!     })
//!     .singletons(["s1"]),
//! );
//! b.register_service(
//!     "api",
//!     ServiceDef::from_fn(|deps| async move {
//!         let three = deps.action("plusTwo")?.call_as::<i64>(vec![]).await?;
//!         assert_eq!(*three, 3);
//!         Ok(())
//!     })
//!     .singletons(["s1"])
//!     .actions(["plusTwo"]),
//! );
//!
//! let broker = Broker::new(b.build()?);
//! broker.start_service("api").await?;
//! broker.stop_service("api").await?;
//! ```

pub use anyhow::Result;
pub use async_trait::async_trait;

// Re-export inventory for static registration
pub use inventory;

pub mod broker;
pub mod context;
pub mod contracts;
pub mod deps;
pub mod error;
pub mod mock;
pub mod registry;
pub mod runtime;
pub mod value;

mod cache;
mod resolver;

pub use broker::{Broker, ServiceInfo};
pub use context::{ConfigProvider, EmptyConfigProvider};
pub use contracts::{
    ActionDef, Composer, Plugin, PluginDef, ServiceDef, ServiceHandler, Singleton, SingletonDef,
};
pub use deps::{logical_name, Deps};
pub use error::{BrokerError, Kind};
pub use mock::MockOverrides;
pub use registry::{
    BrokerConfig, ComponentRegistry, Registrator, RegistryBuilder, ResolvedDependencies,
    ServiceState,
};
pub use runtime::{run, run_with_config, RunOptions, ShutdownOptions};
pub use value::{ActionFn, AnyValue, Args, Transform, Value};
