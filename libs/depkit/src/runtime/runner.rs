//! DepKit runtime runner.
//!
//! Phase order: **start services (in the given order) → wait → stop (reverse)**.
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future. The broker itself has no timeouts; the runner
//! bounds each service start when `start_timeout` is set.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use depkit_bootstrap::{init_logging_unified, AppConfig, AppConfigProvider};
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::registry::ComponentRegistry;

/// How the runtime should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Options for running a broker.
pub struct RunOptions {
    /// Services to start, in order.
    pub services: Vec<String>,
    /// Shutdown strategy.
    pub shutdown: ShutdownOptions,
    /// Upper bound for each `start_service` call.
    pub start_timeout: Option<Duration>,
}

async fn start_bounded(
    broker: &Broker,
    service: &str,
    timeout: Option<Duration>,
) -> Result<(), BrokerError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, broker.start_service(service))
            .await
            .map_err(|_| BrokerError::StartTimeout {
                service: service.to_string(),
                timeout: limit,
            })?,
        None => broker.start_service(service).await,
    }
}

async fn stop_all(broker: &Broker, services: &[String]) {
    for service in services.iter().rev() {
        if let Err(err) = broker.stop_service(service).await {
            tracing::warn!(service = %service, error = %err, "Failed to stop service");
        }
    }
}

/// Full cycle: start → wait → stop.
///
/// If a service fails to start, it and the services started before it are
/// stopped before the error is returned.
pub async fn run(broker: Arc<Broker>, opts: RunOptions) -> anyhow::Result<()> {
    // 1. Prepare cancellation token based on shutdown options
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };

    // 2. Spawn shutdown waiter (Signals / Future)
    match opts.shutdown {
        ShutdownOptions::Signals => {
            let c = cancel.clone();
            tokio::spawn(async move {
                match depkit_bootstrap::wait_for_shutdown().await {
                    Ok(()) => {
                        tracing::info!("shutdown: signal received");
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            "shutdown: primary waiter failed; falling back to ctrl_c()"
                        );
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
                c.cancel();
            });
        }
        ShutdownOptions::Future(waiter) => {
            let c = cancel.clone();
            tokio::spawn(async move {
                waiter.await;
                tracing::info!("shutdown: external future completed");
                c.cancel();
            });
        }
        ShutdownOptions::Token(_) => {
            tracing::info!("shutdown: external token will control lifecycle");
        }
    }

    // 3. Start phase
    tracing::info!(services = ?opts.services, "Phase: start");
    for (i, service) in opts.services.iter().enumerate() {
        if let Err(err) = start_bounded(&broker, service, opts.start_timeout).await {
            tracing::error!(service = %service, error = %err, "Start phase aborted");
            stop_all(&broker, &opts.services[..=i]).await;
            return Err(err.into());
        }
    }

    // 4. Wait for cancellation
    cancel.cancelled().await;

    // 5. Stop phase
    tracing::info!("Phase: stop");
    stop_all(&broker, &opts.services).await;

    Ok(())
}

/// Host entry point: install logging from `config`, expose its component
/// sections to routines, then [`run`] the configured services.
pub async fn run_with_config(
    registry: ComponentRegistry,
    config: AppConfig,
    shutdown: ShutdownOptions,
) -> anyhow::Result<()> {
    if let Some(logging) = &config.logging {
        init_logging_unified(logging, config.home_dir());
    }

    let opts = RunOptions {
        services: config.runtime.services.clone(),
        shutdown,
        start_timeout: config.runtime.start_timeout(),
    };
    tracing::info!(
        home_dir = %config.runtime.home_dir,
        services = ?opts.services,
        "Runtime configured"
    );

    let provider = Arc::new(AppConfigProvider::new(config));
    let broker = Arc::new(Broker::new(registry).with_config_provider(provider));
    run(broker, opts).await
}
