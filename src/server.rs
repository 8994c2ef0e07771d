//! Node bootstrap, run loop and configuration reload.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use chainkeeper_config::{
    Config, ConfigError, ConfigLoader, ConfigValidator, LoggingConfig, ValidationWarning,
};
use chainkeeper_coordination::{CoordinationStore, LeaderElection, MemoryStore, RedisStore};
use chainkeeper_scheduler::{
    JobRegistry, RunCoordinator, ScheduleKind, Scheduler, SystemClock, Watchdog,
};
use chainkeeper_web3::{
    ChainEvent, ClientFactory, EndpointKind, EndpointPool, EventCallback, EventSubscriber,
    JsonRpcClientFactory, SubscriptionTarget,
};

use crate::adapters::{
    endpoint_configs, job_definitions, redis_topology, subscriber_settings,
};
use crate::handlers::{BUILTIN_HANDLERS, builtin_handlers};
use crate::signal::{NodeSignal, SignalHandler};

/// Initialize tracing with console and file output.
///
/// `RUST_LOG` takes precedence over `logging.level`. Files rotate daily.
pub(crate) fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn Error>> {
    let log_dir = PathBuf::from(ConfigLoader::expand_path(&logging.dir));
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&logging.file_prefix)
        .filename_suffix("log")
        .max_log_files(logging.max_files)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The writer stops flushing once its guard drops.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

/// Load a config file and run every validation the node depends on.
pub(crate) fn load_validated(path: &Path) -> Result<(Config, Vec<ValidationWarning>), ConfigError> {
    let config = ConfigLoader::load(path)?;
    let mut result = ConfigValidator::validate(&config)?;
    ConfigValidator::validate_handlers(&config, BUILTIN_HANDLERS, &mut result);
    let warnings = result.into_result()?;
    Ok((config, warnings))
}

pub(crate) fn log_warnings(warnings: &[ValidationWarning]) {
    for warning in warnings {
        warn!("Config warning at {}: {}", warning.path, warning.message);
    }
}

async fn connect_store(
    config: &Config,
    memory_store: bool,
) -> Result<Arc<dyn CoordinationStore>, Box<dyn Error>> {
    if memory_store {
        warn!("Using the in-process store; jobs are not coordinated with other nodes");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let coordination = &config.coordination;
    let store = RedisStore::connect(
        &coordination.urls(),
        redis_topology(coordination.mode),
        coordination.key_prefix.clone(),
    )
    .await?;
    Ok(Arc::new(store))
}

/// Long-lived components of a running node.
pub(crate) struct Node {
    pub(crate) leader: Arc<LeaderElection>,
    pub(crate) coordinator: Arc<RunCoordinator>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) watchdog: Arc<Watchdog>,
    pub(crate) pool: Arc<EndpointPool>,
    pub(crate) subscriber: Arc<EventSubscriber>,
}

impl Node {
    pub(crate) fn build(
        config: &Config,
        store: Arc<dyn CoordinationStore>,
        node_id: &str,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<Self, Box<dyn Error>> {
        let leader = Arc::new(LeaderElection::new(
            store.clone(),
            node_id,
            config.leader.heartbeat_interval_ms,
            config.leader.ttl_secs,
        ));

        let pool = Arc::new(EndpointPool::new(
            endpoint_configs(config),
            factory,
            config.web3.health_check_interval_ms,
        )?);
        let subscriber = EventSubscriber::new(pool.clone(), subscriber_settings(&config.subscriptions));

        let clock = Arc::new(SystemClock);
        let coordinator = Arc::new(RunCoordinator::new(
            store,
            clock.clone(),
            node_id,
            config.coordination.lock_max_ttl_secs,
        ));
        let registry = JobRegistry::from_definitions(job_definitions(config))?;
        let handlers = Arc::new(builtin_handlers(pool.clone()));
        let scheduler = Scheduler::new(registry, handlers, coordinator.clone(), clock);

        let watchdog = Arc::new(Watchdog::new(
            scheduler.clone(),
            config.scheduler.watchdog_interval_ms,
            config.scheduler.grace_period_ms,
        ));

        Ok(Self {
            leader,
            coordinator,
            scheduler,
            watchdog,
            pool,
            subscriber,
        })
    }

    /// Start every background loop and arm the configured jobs.
    pub(crate) async fn start(&self, config: &Config, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.leader.clone().spawn(cancel.clone()),
            self.pool.clone().spawn(cancel.clone()),
            self.subscriber.clone().spawn(cancel.clone()),
        ];

        self.open_subscriptions(config).await;
        let armed = self.scheduler.start_all().await;
        info!("{} job(s) armed", armed);

        handles.push(self.watchdog.clone().spawn(cancel));
        handles
    }

    /// Open every configured contract subscription not already open.
    async fn open_subscriptions(&self, config: &Config) {
        for sub in &config.subscriptions.contracts {
            let target = SubscriptionTarget::Contract {
                address: sub.address.clone(),
                event: sub.event.clone(),
            };
            if self.subscriber.subscription_ids(&sub.network).contains(&target.id()) {
                continue;
            }

            let trace_id = format!("{}-{}", sub.network, target.id());
            let label = trace_id.clone();
            let callback: EventCallback = Arc::new(move |event: ChainEvent| {
                info!(
                    "{} event at block {:?} (removed: {})",
                    label, event.block_number, event.removed
                );
            });

            match self
                .subscriber
                .subscribe_contract_event(
                    &sub.network,
                    &sub.address,
                    &sub.event,
                    None,
                    sub.timeout_ms,
                    callback,
                )
                .await
            {
                Ok(true) => info!("Subscribed to {}", trace_id),
                Ok(false) => {}
                Err(e) => error!("Failed to subscribe to {}: {}", trace_id, e),
            }
        }
    }

    /// Re-read the config file and apply it. An invalid file is ignored.
    pub(crate) async fn reload(&self, path: &Path) -> bool {
        let (config, warnings) = match load_validated(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("Config reload rejected, keeping current settings: {}", e);
                return false;
            }
        };
        log_warnings(&warnings);
        self.apply(&config).await;
        info!("Configuration reloaded from {}", path.display());
        true
    }

    async fn apply(&self, config: &Config) {
        self.leader
            .update_timings(config.leader.heartbeat_interval_ms, config.leader.ttl_secs);
        self.coordinator
            .set_lock_max_ttl_secs(config.coordination.lock_max_ttl_secs);
        self.watchdog.update_timings(
            config.scheduler.watchdog_interval_ms,
            config.scheduler.grace_period_ms,
        );
        self.pool.update_interval(config.web3.health_check_interval_ms);
        self.subscriber
            .update_settings(subscriber_settings(&config.subscriptions));

        match self.pool.replace_endpoints(endpoint_configs(config)) {
            Ok(()) => {
                // Streams still hold clients of the previous endpoint list.
                for network in self.subscriber.networks() {
                    if let Err(e) = self.subscriber.resubscribe(&network).await {
                        warn!("Resubscribe of {} after reload failed: {}", network, e);
                    }
                }
            }
            Err(e) => error!("Failed to apply endpoint list: {}", e),
        }
        self.open_subscriptions(config).await;

        if let Err(e) = self.scheduler.reconfigure(job_definitions(config)) {
            error!("Failed to apply job definitions: {}", e);
        }
    }

    /// Cancel timers and tear down subscriptions.
    pub(crate) async fn shutdown(&self) {
        self.scheduler.shutdown();
        self.subscriber.shutdown().await;
    }
}

/// Run a node until SIGINT or SIGTERM.
pub(crate) async fn run_node(
    config_path: PathBuf,
    config: Config,
    node_id: Option<String>,
    memory_store: bool,
) -> Result<(), Box<dyn Error>> {
    let node_id = node_id.unwrap_or_else(|| config.node.id.clone());
    info!("Starting chainkeeper node {}", node_id);

    let store = connect_store(&config, memory_store).await?;
    let factory = Arc::new(JsonRpcClientFactory::new(Duration::from_millis(
        config.web3.request_timeout_ms,
    )));
    let node = Node::build(&config, store, &node_id, factory)?;

    let signals = SignalHandler::new();
    let mut receiver = signals.subscribe();
    signals.install()?;

    let cancel = CancellationToken::new();
    let handles = node.start(&config, cancel.clone()).await;
    info!("Node {} running", node_id);

    loop {
        match receiver.recv().await {
            Ok(NodeSignal::Reload) => {
                node.reload(&config_path).await;
            }
            Ok(NodeSignal::Shutdown) | Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => warn!("Skipped {} signal(s)", skipped),
        }
    }

    info!("Shutting down node {}", node_id);
    cancel.cancel();
    node.shutdown().await;
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background task ended abnormally: {}", e);
        }
    }
    info!("Node {} stopped", node_id);
    Ok(())
}

/// Validate a config file and print its job table.
pub(crate) fn check_config(path: &Path) -> Result<(), Box<dyn Error>> {
    let (config, warnings) = load_validated(path)?;
    println!("{} is valid", path.display());
    for warning in &warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }

    println!();
    println!(
        "{:<24} {:<12} {:<20} {:<14} {}",
        "CODE", "SCHEDULE", "TRIGGER", "HANDLER", "ENABLED"
    );
    for def in job_definitions(&config) {
        let trigger = match &def.schedule {
            ScheduleKind::Cron { expression } => expression.clone(),
            other => format!("{}ms", other.interval_ms().unwrap_or_default()),
        };
        println!(
            "{:<24} {:<12} {:<20} {:<14} {}",
            def.code,
            def.schedule.label(),
            trigger,
            def.handler,
            def.enabled
        );
    }
    Ok(())
}

/// Run one health check pass and print the endpoint selected per network and kind.
pub(crate) async fn print_endpoints(config: &Config) -> Result<(), Box<dyn Error>> {
    let factory = Arc::new(JsonRpcClientFactory::new(Duration::from_millis(
        config.web3.request_timeout_ms,
    )));
    let pool = EndpointPool::new(
        endpoint_configs(config),
        factory,
        config.web3.health_check_interval_ms,
    )?;
    pool.health_check_all().await;

    println!("{:<16} {:<6} {:<8} {}", "NETWORK", "KIND", "STATUS", "ENDPOINT");
    for network in pool.networks() {
        for kind in [EndpointKind::Rpc, EndpointKind::Wss] {
            if let Some(endpoint) = pool.get_endpoint(&network, kind) {
                let status = if endpoint.is_online() { "online" } else { "offline" };
                println!(
                    "{:<16} {:<6} {:<8} {}",
                    network,
                    kind.to_string(),
                    status,
                    endpoint.label()
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
