//! Event subscriptions with stall detection and automatic resubscription.
//!
//! Each network keeps its subscription records and the streaming client they
//! are bound to. A periodic health check compares recent contract events
//! fetched over a request-response endpoint with what the stream delivered;
//! a subscription that missed newer events and has been silent past its
//! timeout causes the whole network to be resubscribed on a fresh endpoint.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ChainClient;
use crate::error::Web3Error;
use crate::jsonrpc::event_topic;
use crate::pool::EndpointPool;
use crate::types::{ChainEvent, EndpointKind, SubscriptionMessage, SubscriptionTarget};

/// Receives every `data` and `changed` event of a subscription.
pub type EventCallback = Arc<dyn Fn(ChainEvent) + Send + Sync>;

/// Tunables, replaceable at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberSettings {
    pub health_check_interval_ms: u64,
    /// A health check running longer than this no longer blocks the next one.
    pub max_check_wait_ms: u64,
    /// Width of the trailing block window searched for events.
    pub window_blocks: u64,
    /// Blocks below the head excluded from the window.
    pub confirmation_lag: u64,
    /// Networks checked in parallel.
    pub concurrency: usize,
    pub resubscribe_delay_ms: u64,
    /// Silence allowed before a subscription can be judged stale.
    pub default_timeout_ms: u64,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 30_000,
            max_check_wait_ms: 60_000,
            window_blocks: 10,
            confirmation_lag: 3,
            concurrency: 2,
            resubscribe_delay_ms: 1000,
            default_timeout_ms: 600_000,
        }
    }
}

/// Block range `[from, to]` searched by a health check at `height`.
pub fn check_window(height: u64, confirmation_lag: u64, window_blocks: u64) -> (u64, u64) {
    let to = height.saturating_sub(confirmation_lag);
    (to.saturating_sub(window_blocks), to)
}

/// Stale when the chain has events newer than the last one delivered and
/// the subscription has been silent past its timeout. A lower latest block
/// (reorg) never counts as stale.
pub fn is_stale(latest_block: u64, recorded_block: u64, silent_ms: u64, timeout_ms: u64) -> bool {
    latest_block > recorded_block && silent_ms > timeout_ms
}

struct SubscriptionRecord {
    id: String,
    /// `{network}-{id}`, used in every log line about this subscription.
    trace_id: String,
    target: SubscriptionTarget,
    filter: Option<Value>,
    timeout_ms: u64,
    callback: EventCallback,
    last_event_ms: AtomicU64,
    last_block: AtomicU64,
}

impl SubscriptionRecord {
    fn touch(&self, now_ms: u64) {
        self.last_event_ms.store(now_ms, Ordering::SeqCst);
    }

    fn dispatch(&self, event: ChainEvent) {
        let callback = self.callback.as_ref();
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
            error!(
                "Subscription {} callback panicked: {}",
                self.trace_id,
                panic_message(&*panic)
            );
        }
    }
}

#[derive(Default)]
struct NetworkSubscriptions {
    records: Mutex<Vec<Arc<SubscriptionRecord>>>,
    /// Streaming client the current listeners are bound to.
    client: RwLock<Option<Arc<dyn ChainClient>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    /// Serializes attaching with rebuilding.
    attach_lock: tokio::sync::Mutex<()>,
    connecting: AtomicBool,
    retry_pending: AtomicBool,
}

impl NetworkSubscriptions {
    fn has_contract_subscriptions(&self) -> bool {
        self.records.lock().iter().any(|r| r.target.is_contract())
    }

    fn abort_listeners(&self) {
        for task in self.listeners.lock().drain(..) {
            task.abort();
        }
    }
}

/// Manages event subscriptions for every network.
pub struct EventSubscriber {
    pool: Arc<EndpointPool>,
    settings: RwLock<SubscriberSettings>,
    networks: RwLock<HashMap<String, Arc<NetworkSubscriptions>>>,
    checking: AtomicBool,
    check_started_ms: AtomicU64,
    check_generation: AtomicU64,
    closed: AtomicBool,
    epoch: Instant,
    self_ref: Weak<Self>,
}

impl EventSubscriber {
    pub fn new(pool: Arc<EndpointPool>, settings: SubscriberSettings) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            pool,
            settings: RwLock::new(settings),
            networks: RwLock::new(HashMap::new()),
            checking: AtomicBool::new(false),
            check_started_ms: AtomicU64::new(0),
            check_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            epoch: Instant::now(),
            self_ref: self_ref.clone(),
        })
    }

    pub fn settings(&self) -> SubscriberSettings {
        self.settings.read().clone()
    }

    pub fn update_settings(&self, settings: SubscriberSettings) {
        *self.settings.write() = settings;
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn network(&self, network: &str) -> Option<Arc<NetworkSubscriptions>> {
        self.networks.read().get(network).cloned()
    }

    fn network_entry(&self, network: &str) -> Arc<NetworkSubscriptions> {
        self.networks
            .write()
            .entry(network.to_string())
            .or_default()
            .clone()
    }

    /// Subscribe to a contract's logs. `event` is `allEvents` or a topic
    /// hash. Returns `false` if the same subscription already exists.
    pub async fn subscribe_contract_event(
        &self,
        network: &str,
        address: &str,
        event: &str,
        filter: Option<Value>,
        timeout_ms: Option<u64>,
        callback: EventCallback,
    ) -> Result<bool, Web3Error> {
        event_topic(event)?;
        let target = SubscriptionTarget::Contract {
            address: address.to_string(),
            event: event.to_string(),
        };
        self.subscribe(network, target, filter, timeout_ms, callback).await
    }

    /// Subscribe to a raw chain stream such as `newHeads`.
    pub async fn subscribe_chain_event(
        &self,
        network: &str,
        event: &str,
        name: &str,
        filter: Option<Value>,
        timeout_ms: Option<u64>,
        callback: EventCallback,
    ) -> Result<bool, Web3Error> {
        let target = SubscriptionTarget::Chain {
            event: event.to_string(),
            name: name.to_string(),
        };
        self.subscribe(network, target, filter, timeout_ms, callback).await
    }

    async fn subscribe(
        &self,
        network: &str,
        target: SubscriptionTarget,
        filter: Option<Value>,
        timeout_ms: Option<u64>,
        callback: EventCallback,
    ) -> Result<bool, Web3Error> {
        let state = self.network_entry(network);
        let _attach = state.attach_lock.lock().await;

        let id = target.id();
        if state.records.lock().iter().any(|r| r.id == id) {
            warn!("Repeat subscription {} on {}", id, network);
            return Ok(false);
        }

        let client = self.bound_client(network, &state)?;
        let record = Arc::new(SubscriptionRecord {
            trace_id: format!("{}-{}", network, id),
            id,
            target,
            filter,
            timeout_ms: timeout_ms.unwrap_or(self.settings.read().default_timeout_ms),
            callback,
            last_event_ms: AtomicU64::new(self.now_ms()),
            last_block: AtomicU64::new(0),
        });
        state.records.lock().push(record.clone());

        let trace_id = record.trace_id.clone();
        if let Err(e) = self.attach(network, &state, &client, record).await {
            error!("Subscription {} failed to open: {}", trace_id, e);
            self.schedule_resubscribe(network);
        }
        Ok(true)
    }

    fn bound_client(
        &self,
        network: &str,
        state: &NetworkSubscriptions,
    ) -> Result<Arc<dyn ChainClient>, Web3Error> {
        if let Some(client) = state.client.read().clone() {
            return Ok(client);
        }
        let client = self.pool.client(network, EndpointKind::Wss)?;
        *state.client.write() = Some(client.clone());
        Ok(client)
    }

    /// Open `record` on `client` and spawn its listener.
    async fn attach(
        &self,
        network: &str,
        state: &NetworkSubscriptions,
        client: &Arc<dyn ChainClient>,
        record: Arc<SubscriptionRecord>,
    ) -> Result<(), Web3Error> {
        let mut handle = client.subscribe(&record.target, record.filter.clone()).await?;
        info!("Listening on {} ({})", record.trace_id, handle.id());

        let epoch = self.epoch;
        let subscriber = self.self_ref.clone();
        let network = network.to_string();
        let task = tokio::spawn(async move {
            while let Some(message) = handle.recv().await {
                let now = epoch.elapsed().as_millis() as u64;
                match message {
                    SubscriptionMessage::Connected => {
                        record.touch(now);
                        debug!("{} connected", record.trace_id);
                    }
                    SubscriptionMessage::Data(event) => {
                        record.touch(now);
                        if let Some(block) = event.block_number {
                            record.last_block.store(block, Ordering::SeqCst);
                        }
                        debug!("{} data event at block {:?}", record.trace_id, event.block_number);
                        record.dispatch(event);
                    }
                    SubscriptionMessage::Changed(event) => {
                        record.touch(now);
                        info!("{} changed event at block {:?}", record.trace_id, event.block_number);
                        record.dispatch(event);
                    }
                    SubscriptionMessage::Error(message) => {
                        error!("Subscription {} error: {}", record.trace_id, message);
                        if let Some(subscriber) = subscriber.upgrade() {
                            subscriber.schedule_resubscribe(&network);
                        }
                    }
                }
            }
        });
        state.listeners.lock().push(task);
        Ok(())
    }

    /// Resubscribe `network` after the configured delay unless a
    /// resubscribe is running or already queued.
    fn schedule_resubscribe(&self, network: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let Some(state) = self.network(network) else {
            return;
        };
        if state.connecting.load(Ordering::SeqCst) {
            debug!("{} is already resubscribing", network);
            return;
        }
        if state.retry_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(subscriber) = self.self_ref.upgrade() else {
            return;
        };

        let delay = Duration::from_millis(self.settings.read().resubscribe_delay_ms);
        let network = network.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            state.retry_pending.store(false, Ordering::SeqCst);
            if let Err(e) = subscriber.resubscribe(&network).await {
                error!("Resubscribe of {} failed: {}", network, e);
                subscriber.schedule_resubscribe(&network);
            }
        });
    }

    /// Tear down every subscription of `network` and rebind them on the
    /// currently selected streaming endpoint.
    ///
    /// Returns `Ok(false)` when there is nothing to do or another
    /// resubscribe holds the `connecting` guard.
    pub async fn resubscribe(&self, network: &str) -> Result<bool, Web3Error> {
        let Some(state) = self.network(network) else {
            return Ok(false);
        };
        if state.records.lock().is_empty() || self.closed.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if state
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("{} resubscribe already in progress", network);
            return Ok(false);
        }

        let result = self.rebuild(network, &state).await;
        state.connecting.store(false, Ordering::SeqCst);
        result.map(|()| true)
    }

    async fn rebuild(&self, network: &str, state: &NetworkSubscriptions) -> Result<(), Web3Error> {
        let _attach = state.attach_lock.lock().await;

        let old = state.client.write().take();
        state.abort_listeners();
        if let Some(old) = old {
            if let Err(e) = old.clear_subscriptions().await {
                warn!("Failed to clear subscriptions on {}: {}", network, e);
            }
        }

        let client = self.pool.client(network, EndpointKind::Wss)?;
        *state.client.write() = Some(client.clone());

        let records = state.records.lock().clone();
        info!("Resubscribing {} subscriptions on {}", records.len(), network);
        let mut first_error = None;
        for record in records {
            let trace_id = record.trace_id.clone();
            if let Err(e) = self.attach(network, state, &client, record).await {
                error!("Subscription {} failed to reopen: {}", trace_id, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Check every network with contract subscriptions for stalled streams.
    /// Returns the networks that were resubscribed.
    pub async fn health_check(&self) -> Vec<String> {
        let settings = self.settings();
        let started = self.now_ms();
        if self.checking.swap(true, Ordering::SeqCst) {
            let running_ms = started.saturating_sub(self.check_started_ms.load(Ordering::SeqCst));
            if running_ms < settings.max_check_wait_ms {
                warn!("Event health check already running");
                return Vec::new();
            }
            warn!("Event health check running for {}ms, starting another", running_ms);
        }
        let generation = self.check_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.check_started_ms.store(started, Ordering::SeqCst);

        let targets: Vec<(String, Arc<NetworkSubscriptions>)> = self
            .networks
            .read()
            .iter()
            .filter(|(_, state)| state.has_contract_subscriptions())
            .map(|(network, state)| (network.clone(), state.clone()))
            .collect();

        let settings_ref = &settings;
        let resubscribed: Vec<String> = stream::iter(targets)
            .map(|(network, state)| async move {
                self.check_network(&network, &state, settings_ref)
                    .await
                    .then_some(network)
            })
            .buffer_unordered(settings.concurrency.max(1))
            .filter_map(|network| async move { network })
            .collect()
            .await;

        info!(
            "Event health check finished in {}ms",
            self.now_ms().saturating_sub(started)
        );
        if self.check_generation.load(Ordering::SeqCst) == generation {
            self.checking.store(false, Ordering::SeqCst);
        }
        resubscribed
    }

    /// Check one network's contract subscriptions in order, stopping at the
    /// first stale one. Returns whether the network was resubscribed.
    async fn check_network(
        &self,
        network: &str,
        state: &NetworkSubscriptions,
        settings: &SubscriberSettings,
    ) -> bool {
        if state.connecting.load(Ordering::SeqCst) {
            info!("{} is resubscribing, skipping health check", network);
            return false;
        }

        let client = match self.pool.client(network, EndpointKind::Rpc) {
            Ok(client) => client,
            Err(e) => {
                error!("Event health check of {} skipped: {}", network, e);
                return false;
            }
        };
        let height = match client.get_current_height().await {
            Ok(height) => height,
            Err(e) => {
                error!("Event health check of {} failed to read height: {}", network, e);
                return false;
            }
        };
        let (from, to) = check_window(height, settings.confirmation_lag, settings.window_blocks);

        let records: Vec<Arc<SubscriptionRecord>> = state
            .records
            .lock()
            .iter()
            .filter(|r| r.target.is_contract())
            .cloned()
            .collect();

        for record in records {
            let SubscriptionTarget::Contract { address, event } = &record.target else {
                continue;
            };
            let events = match client
                .get_events_in_range(address, event, from, to, record.filter.clone())
                .await
            {
                Ok(events) => events,
                Err(e) => {
                    warn!("{} event health check failed: {}", record.trace_id, e);
                    continue;
                }
            };
            debug!("{} event health check found {} events", record.trace_id, events.len());

            let Some(latest) = events.iter().filter_map(|e| e.block_number).max() else {
                continue;
            };
            let recorded = record.last_block.load(Ordering::SeqCst);
            let silent_ms = self
                .now_ms()
                .saturating_sub(record.last_event_ms.load(Ordering::SeqCst));
            if !is_stale(latest, recorded, silent_ms, record.timeout_ms) {
                continue;
            }

            warn!(
                "{} event timeout, latest block {} recorded {} silent for {}ms",
                record.trace_id, latest, recorded, silent_ms
            );
            return match self.resubscribe(network).await {
                Ok(done) => done,
                Err(e) => {
                    error!("Resubscribe of {} failed: {}", network, e);
                    self.schedule_resubscribe(network);
                    false
                }
            };
        }
        false
    }

    /// Run health checks on the configured interval until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Event health check started (interval: {}ms)",
                self.settings.read().health_check_interval_ms
            );
            loop {
                let interval = Duration::from_millis(self.settings.read().health_check_interval_ms);
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        self.health_check().await;
                    }
                    _ = cancel.cancelled() => {
                        info!("Event health check shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Stop listeners and clear subscriptions on every network.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let networks: Vec<(String, Arc<NetworkSubscriptions>)> = self
            .networks
            .read()
            .iter()
            .map(|(network, state)| (network.clone(), state.clone()))
            .collect();
        for (network, state) in networks {
            state.abort_listeners();
            let client = state.client.write().take();
            if let Some(client) = client {
                if let Err(e) = client.clear_subscriptions().await {
                    warn!("Failed to clear subscriptions on {}: {}", network, e);
                }
            }
        }
    }

    pub fn networks(&self) -> Vec<String> {
        let mut networks: Vec<String> = self.networks.read().keys().cloned().collect();
        networks.sort();
        networks
    }

    pub fn subscription_ids(&self, network: &str) -> Vec<String> {
        self.network(network)
            .map(|state| state.records.lock().iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Block of the last `data` event delivered to a subscription.
    #[cfg(test)]
    pub(crate) fn last_event_block(&self, network: &str, id: &str) -> Option<u64> {
        let state = self.network(network)?;
        let records = state.records.lock();
        let block = records.iter().find(|r| r.id == id)?.last_block.load(Ordering::SeqCst);
        (block > 0).then_some(block)
    }

    #[cfg(test)]
    pub(crate) fn is_connecting(&self, network: &str) -> bool {
        self.network(network)
            .is_some_and(|state| state.connecting.load(Ordering::SeqCst))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "subscriber_tests.rs"]
mod tests;
