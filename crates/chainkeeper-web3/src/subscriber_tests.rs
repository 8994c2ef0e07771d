use super::*;
use crate::client::{ClientFactory, MockChainClient, SubscriptionHandle};
use crate::types::EndpointConfig;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use tokio::sync::{Notify, mpsc};

const NETWORK: &str = "ethereum";
const RPC_URL: &str = "https://rpc.example.io";
const WSS_URL: &str = "wss://stream.example.io";
const ADDRESS: &str = "0xabc";
const TIMEOUT_MS: u64 = 60_000;

/// Streaming client whose subscriptions are fed by the test.
#[derive(Default)]
struct FakeStream {
    senders: Mutex<Vec<mpsc::UnboundedSender<SubscriptionMessage>>>,
    subscribes: AtomicUsize,
    clears: AtomicUsize,
    /// When set, `subscribe` waits for a permit before completing.
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeStream {
    fn emit(&self, message: SubscriptionMessage) {
        for tx in self.senders.lock().iter() {
            let _ = tx.send(message.clone());
        }
    }

    fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for FakeStream {
    async fn get_current_height(&self) -> Result<u64, Web3Error> {
        Ok(0)
    }

    async fn call(&self, _method: &str, _params: Value) -> Result<Value, Web3Error> {
        Ok(Value::Null)
    }

    async fn estimate_cost(&self, _tx: Value) -> Result<u64, Web3Error> {
        Ok(0)
    }

    async fn get_events_in_range(
        &self,
        _address: &str,
        _event: &str,
        _from: u64,
        _to: u64,
        _filter: Option<Value>,
    ) -> Result<Vec<ChainEvent>, Web3Error> {
        Ok(Vec::new())
    }

    async fn subscribe(
        &self,
        _target: &SubscriptionTarget,
        _filter: Option<Value>,
    ) -> Result<SubscriptionHandle, Web3Error> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let n = self.subscribes.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(SubscriptionMessage::Connected);
        self.senders.lock().push(tx);
        Ok(SubscriptionHandle::new(format!("0x{}", n), rx))
    }

    async fn clear_subscriptions(&self) -> Result<(), Web3Error> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.senders.lock().clear();
        Ok(())
    }
}

struct StaticFactory {
    clients: HashMap<String, Arc<dyn ChainClient>>,
}

impl ClientFactory for StaticFactory {
    fn create(&self, config: &EndpointConfig) -> Result<Arc<dyn ChainClient>, Web3Error> {
        self.clients
            .get(&config.url)
            .cloned()
            .ok_or_else(|| Web3Error::Http(format!("no client for {}", config.url)))
    }
}

struct Harness {
    subscriber: Arc<EventSubscriber>,
    stream: Arc<FakeStream>,
    /// Blocks of the events the RPC endpoint reports in the window.
    window_events: Arc<Mutex<Vec<u64>>>,
    received: Arc<Mutex<Vec<ChainEvent>>>,
}

impl Harness {
    fn new(settings: SubscriberSettings) -> Self {
        let window_events = Arc::new(Mutex::new(Vec::new()));
        let blocks = window_events.clone();
        let mut rpc = MockChainClient::new();
        rpc.expect_get_current_height().returning(|| Ok(100));
        rpc.expect_get_events_in_range()
            .returning(move |_, _, from, to, _| {
                assert_eq!((from, to), (87, 97));
                Ok(blocks
                    .lock()
                    .iter()
                    .map(|b| ChainEvent::from_value(json!({ "blockNumber": format!("0x{:x}", b) })))
                    .collect())
            });

        let stream = Arc::new(FakeStream::default());
        let mut clients: HashMap<String, Arc<dyn ChainClient>> = HashMap::new();
        clients.insert(RPC_URL.to_string(), Arc::new(rpc));
        clients.insert(WSS_URL.to_string(), stream.clone());

        let pool = EndpointPool::new(
            vec![
                EndpointConfig::new(NETWORK, RPC_URL, EndpointKind::Rpc, 1),
                EndpointConfig::new(NETWORK, WSS_URL, EndpointKind::Wss, 1),
            ],
            Arc::new(StaticFactory { clients }),
            10_000,
        )
        .unwrap();

        Self {
            subscriber: EventSubscriber::new(Arc::new(pool), settings),
            stream,
            window_events,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn callback(&self) -> EventCallback {
        let received = self.received.clone();
        Arc::new(move |event: ChainEvent| received.lock().push(event))
    }

    async fn subscribe_contract(&self) -> bool {
        self.subscriber
            .subscribe_contract_event(NETWORK, ADDRESS, "allEvents", None, Some(TIMEOUT_MS), self.callback())
            .await
            .unwrap()
    }

    fn set_window_events(&self, blocks: &[u64]) {
        *self.window_events.lock() = blocks.to_vec();
    }
}

fn data(block: u64) -> SubscriptionMessage {
    SubscriptionMessage::Data(ChainEvent::from_value(
        json!({ "blockNumber": format!("0x{:x}", block) }),
    ))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[test]
fn test_check_window() {
    assert_eq!(check_window(100, 3, 10), (87, 97));
    assert_eq!(check_window(2, 3, 10), (0, 0));
}

#[test]
fn test_is_stale() {
    assert!(is_stale(96, 90, 60_001, 60_000));
    assert!(!is_stale(96, 90, 60_000, 60_000));
    assert!(!is_stale(90, 90, 120_000, 60_000));
    // Height regression after a reorg.
    assert!(!is_stale(85, 90, 120_000, 60_000));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_subscription_rejected() {
    let h = Harness::new(SubscriberSettings::default());
    assert!(h.subscribe_contract().await);
    assert!(!h.subscribe_contract().await);
    assert_eq!(h.stream.subscribes(), 1);
    assert_eq!(h.subscriber.subscription_ids(NETWORK), vec!["0xabc-allEvents".to_string()]);

    let heads = h
        .subscriber
        .subscribe_chain_event(NETWORK, "newHeads", "heads", None, None, h.callback())
        .await
        .unwrap();
    assert!(heads);
    assert_eq!(h.stream.subscribes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_contract_event_rejected() {
    let h = Harness::new(SubscriberSettings::default());
    let result = h
        .subscriber
        .subscribe_contract_event(NETWORK, ADDRESS, "Transfer", None, None, h.callback())
        .await;
    assert!(matches!(result, Err(Web3Error::InvalidEvent(_))));
    assert!(h.subscriber.subscription_ids(NETWORK).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_stream_endpoint_is_an_error() {
    let h = Harness::new(SubscriberSettings::default());
    let result = h
        .subscriber
        .subscribe_chain_event("polygon", "newHeads", "heads", None, None, h.callback())
        .await;
    assert!(matches!(result, Err(Web3Error::NoEndpoint { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_data_event_updates_bookkeeping() {
    let h = Harness::new(SubscriberSettings::default());
    h.subscribe_contract().await;

    h.stream.emit(data(95));
    settle().await;

    assert_eq!(h.received.lock().len(), 1);
    assert_eq!(h.subscriber.last_event_block(NETWORK, "0xabc-allEvents"), Some(95));
}

#[tokio::test(start_paused = true)]
async fn test_changed_event_keeps_recorded_height() {
    let h = Harness::new(SubscriberSettings::default());
    h.subscribe_contract().await;

    h.stream.emit(data(95));
    h.stream.emit(SubscriptionMessage::Changed(ChainEvent::from_value(
        json!({ "blockNumber": "0x60", "removed": true }),
    )));
    settle().await;

    assert_eq!(h.received.lock().len(), 2);
    assert!(h.received.lock()[1].removed);
    assert_eq!(h.subscriber.last_event_block(NETWORK, "0xabc-allEvents"), Some(95));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_callback_is_contained() {
    let h = Harness::new(SubscriberSettings::default());
    let received = h.received.clone();
    let callback: EventCallback = Arc::new(move |event: ChainEvent| {
        if event.block_number == Some(1) {
            panic!("callback exploded");
        }
        received.lock().push(event);
    });
    h.subscriber
        .subscribe_contract_event(NETWORK, ADDRESS, "allEvents", None, None, callback)
        .await
        .unwrap();

    h.stream.emit(data(1));
    h.stream.emit(data(2));
    settle().await;

    let blocks: Vec<_> = h.received.lock().iter().map(|e| e.block_number).collect();
    assert_eq!(blocks, vec![Some(2)]);
    assert_eq!(h.subscriber.last_event_block(NETWORK, "0xabc-allEvents"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_idle_chain_is_not_stale() {
    let h = Harness::new(SubscriberSettings::default());
    h.subscribe_contract().await;

    tokio::time::sleep(Duration::from_millis(TIMEOUT_MS * 3)).await;
    assert!(h.subscriber.health_check().await.is_empty());
    assert_eq!(h.stream.clears(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_stream_resubscribes_network() {
    let h = Harness::new(SubscriberSettings::default());
    h.subscribe_contract().await;
    h.subscriber
        .subscribe_chain_event(NETWORK, "newHeads", "heads", None, None, h.callback())
        .await
        .unwrap();
    h.set_window_events(&[90, 96]);

    // Newer events exist but the subscription has not been silent long enough.
    tokio::time::sleep(Duration::from_millis(TIMEOUT_MS - 1000)).await;
    assert!(h.subscriber.health_check().await.is_empty());

    tokio::time::sleep(Duration::from_millis(1001)).await;
    assert_eq!(h.subscriber.health_check().await, vec![NETWORK.to_string()]);
    assert_eq!(h.stream.clears(), 1);
    // Both subscriptions were rebound.
    assert_eq!(h.stream.subscribes(), 4);
    assert_eq!(h.subscriber.subscription_ids(NETWORK).len(), 2);
    assert!(!h.subscriber.is_connecting(NETWORK));

    // The fresh stream delivers to the same callback.
    h.stream.emit(data(97));
    settle().await;
    assert_eq!(h.subscriber.last_event_block(NETWORK, "0xabc-allEvents"), Some(97));
}

#[tokio::test(start_paused = true)]
async fn test_delivered_events_are_not_stale() {
    let h = Harness::new(SubscriberSettings::default());
    h.subscribe_contract().await;
    h.stream.emit(data(96));
    settle().await;
    h.set_window_events(&[90, 96]);

    tokio::time::sleep(Duration::from_millis(TIMEOUT_MS * 2)).await;
    assert!(h.subscriber.health_check().await.is_empty());
    assert_eq!(h.stream.clears(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_height_regression_is_not_stale() {
    let h = Harness::new(SubscriberSettings::default());
    h.subscribe_contract().await;
    h.stream.emit(data(100));
    settle().await;
    // A reorg left only lower blocks in the window.
    h.set_window_events(&[94]);

    tokio::time::sleep(Duration::from_millis(TIMEOUT_MS * 2)).await;
    assert!(h.subscriber.health_check().await.is_empty());
    assert_eq!(h.stream.clears(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_checks_resubscribe_once() {
    let h = Harness::new(SubscriberSettings::default());
    h.subscribe_contract().await;
    h.set_window_events(&[96]);
    tokio::time::sleep(Duration::from_millis(TIMEOUT_MS + 1)).await;

    let gate = Arc::new(Notify::new());
    *h.stream.gate.lock() = Some(gate.clone());

    let subscriber = h.subscriber.clone();
    let first = tokio::spawn(async move { subscriber.health_check().await });
    settle().await;
    assert!(h.subscriber.is_connecting(NETWORK));

    // The second cycle is refused by the checking guard, a direct call by
    // the connecting guard.
    assert!(h.subscriber.health_check().await.is_empty());
    assert!(!h.subscriber.resubscribe(NETWORK).await.unwrap());

    gate.notify_one();
    assert_eq!(first.await.unwrap(), vec![NETWORK.to_string()]);
    assert_eq!(h.stream.clears(), 1);
    assert_eq!(h.stream.subscribes(), 2);
    assert!(!h.subscriber.is_connecting(NETWORK));
}

#[tokio::test(start_paused = true)]
async fn test_wedged_check_is_bypassed_after_max_wait() {
    let settings = SubscriberSettings {
        max_check_wait_ms: 0,
        ..Default::default()
    };
    let h = Harness::new(settings);
    h.subscribe_contract().await;
    h.set_window_events(&[96]);
    tokio::time::sleep(Duration::from_millis(TIMEOUT_MS + 1)).await;

    let gate = Arc::new(Notify::new());
    *h.stream.gate.lock() = Some(gate.clone());
    let subscriber = h.subscriber.clone();
    let first = tokio::spawn(async move { subscriber.health_check().await });
    settle().await;

    // The checking guard has expired, so the second cycle runs but skips
    // the network that is still resubscribing.
    assert!(h.subscriber.health_check().await.is_empty());
    assert_eq!(h.stream.clears(), 1);

    gate.notify_one();
    assert_eq!(first.await.unwrap(), vec![NETWORK.to_string()]);
    assert_eq!(h.stream.subscribes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_error_event_resubscribes_after_delay() {
    let h = Harness::new(SubscriberSettings::default());
    h.subscribe_contract().await;

    // A dropped socket reports an error on every subscription at once.
    h.stream.emit(SubscriptionMessage::Error("connection reset".to_string()));
    h.stream.emit(SubscriptionMessage::Error("connection reset".to_string()));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.stream.subscribes(), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.stream.clears(), 1);
    assert_eq!(h.stream.subscribes(), 2);

    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(h.stream.subscribes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_health_check_recovers_stall() {
    let settings = SubscriberSettings {
        health_check_interval_ms: 30_000,
        ..Default::default()
    };
    let h = Harness::new(settings);
    h.subscribe_contract().await;
    h.set_window_events(&[96]);

    let cancel = CancellationToken::new();
    let handle = h.subscriber.clone().spawn(cancel.clone());

    // Checks at 30s and 60s find the stream silent but within its timeout.
    tokio::time::sleep(Duration::from_millis(60_500)).await;
    assert_eq!(h.stream.clears(), 0);

    tokio::time::sleep(Duration::from_millis(30_000)).await;
    assert_eq!(h.stream.clears(), 1);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_clears_and_stops_resubscribing() {
    let h = Harness::new(SubscriberSettings::default());
    h.subscribe_contract().await;

    h.subscriber.shutdown().await;
    assert_eq!(h.stream.clears(), 1);
    assert!(!h.subscriber.resubscribe(NETWORK).await.unwrap());
}
