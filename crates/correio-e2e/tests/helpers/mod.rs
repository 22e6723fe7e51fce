#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use correio_core::error::{SubscribeError, TransportError};
use correio_core::{
    ConsumerClient, ConsumerClientFactory, ConsumerRegistry, CorreioConfig, Delivery,
    MemoryStorage, ProcessingServer, ReceiptToken, Transport, TransportFactory, TransportMessage,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// In-memory broker: topics fan out to every subscribed consumer group, each
/// group gets its own delivery queue. Send failures can be injected.
pub struct MemoryBroker {
    inner: Mutex<BrokerInner>,
}

#[derive(Default)]
struct BrokerInner {
    fail_sends: u32,
    fail_connects: u32,
    sent: Vec<TransportMessage>,
    groups: HashMap<String, GroupState>,
    receipt_seq: u64,
}

#[derive(Default)]
struct GroupState {
    topics: HashSet<String>,
    ready: VecDeque<Delivery>,
    committed: Vec<String>,
    rejected: Vec<String>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BrokerInner::default()),
        })
    }

    /// Make the next `n` transport sends fail.
    pub async fn fail_next_sends(&self, n: u32) {
        self.inner.lock().await.fail_sends = n;
    }

    /// Make the next `n` consumer client creations fail.
    pub async fn fail_next_connects(&self, n: u32) {
        self.inner.lock().await.fail_connects = n;
    }

    /// Successfully sent wire messages, in send order.
    pub async fn sent(&self) -> Vec<TransportMessage> {
        self.inner.lock().await.sent.clone()
    }

    pub async fn committed(&self, group: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .groups
            .get(group)
            .map(|g| g.committed.clone())
            .unwrap_or_default()
    }

    pub async fn rejected(&self, group: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .groups
            .get(group)
            .map(|g| g.rejected.clone())
            .unwrap_or_default()
    }

    /// Whether a group has an active subscription.
    pub async fn subscribed(&self, group: &str) -> bool {
        self.inner
            .lock()
            .await
            .groups
            .get(group)
            .is_some_and(|g| !g.topics.is_empty())
    }

    /// Inject a raw delivery straight into a group's queue (bypassing send).
    pub async fn deliver_raw(&self, group: &str, message: TransportMessage) {
        let mut inner = self.inner.lock().await;
        inner.receipt_seq += 1;
        let receipt = ReceiptToken(format!("r-{}", inner.receipt_seq));
        inner
            .groups
            .entry(group.to_string())
            .or_default()
            .ready
            .push_back(Delivery { message, receipt });
    }
}

pub struct BrokerTransport {
    broker: Arc<MemoryBroker>,
}

#[async_trait]
impl Transport for BrokerTransport {
    fn broker_address(&self) -> String {
        "memory://broker".to_string()
    }

    async fn send(&self, message: &TransportMessage) -> Result<(), TransportError> {
        let mut inner = self.broker.inner.lock().await;
        if inner.fail_sends > 0 {
            inner.fail_sends -= 1;
            return Err(TransportError::Send("injected send failure".to_string()));
        }
        inner.sent.push(message.clone());

        // Fan out: every group subscribed to this topic receives a copy
        let topic = message.name().unwrap_or_default().to_string();
        inner.receipt_seq += 1;
        let mut seq = inner.receipt_seq;
        for group in inner.groups.values_mut() {
            if group.topics.contains(&topic) {
                group.ready.push_back(Delivery {
                    message: message.clone(),
                    receipt: ReceiptToken(format!("r-{seq}")),
                });
                seq += 1;
            }
        }
        inner.receipt_seq = seq;
        Ok(())
    }
}

pub struct BrokerTransportFactory {
    pub broker: Arc<MemoryBroker>,
}

#[async_trait]
impl TransportFactory for BrokerTransportFactory {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(BrokerTransport {
            broker: Arc::clone(&self.broker),
        }))
    }
}

pub struct BrokerConsumerClient {
    broker: Arc<MemoryBroker>,
    group: String,
}

#[async_trait]
impl ConsumerClient for BrokerConsumerClient {
    async fn subscribe(&self, topics: &[String]) -> Result<(), SubscribeError> {
        let mut inner = self.broker.inner.lock().await;
        let group = inner.groups.entry(self.group.clone()).or_default();
        group.topics = topics.iter().cloned().collect();
        Ok(())
    }

    async fn listening(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, SubscribeError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut inner = self.broker.inner.lock().await;
                if let Some(delivery) = inner
                    .groups
                    .get_mut(&self.group)
                    .and_then(|g| g.ready.pop_front())
                {
                    return Ok(Some(delivery));
                }
            }
            if cancel.is_cancelled() || tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn commit(&self, receipt: &ReceiptToken) -> Result<(), TransportError> {
        let mut inner = self.broker.inner.lock().await;
        if let Some(group) = inner.groups.get_mut(&self.group) {
            group.committed.push(receipt.0.clone());
        }
        Ok(())
    }

    async fn reject(&self, receipt: &ReceiptToken) -> Result<(), TransportError> {
        let mut inner = self.broker.inner.lock().await;
        if let Some(group) = inner.groups.get_mut(&self.group) {
            group.rejected.push(receipt.0.clone());
        }
        Ok(())
    }
}

pub struct BrokerClientFactory {
    pub broker: Arc<MemoryBroker>,
}

#[async_trait]
impl ConsumerClientFactory for BrokerClientFactory {
    async fn create(&self, group: &str) -> Result<Arc<dyn ConsumerClient>, SubscribeError> {
        let mut inner = self.broker.inner.lock().await;
        if inner.fail_connects > 0 {
            inner.fail_connects -= 1;
            return Err(SubscribeError::Connect(
                "injected connect failure".to_string(),
            ));
        }
        Ok(Arc::new(BrokerConsumerClient {
            broker: Arc::clone(&self.broker),
            group: group.to_string(),
        }))
    }
}

/// A running processing server wired to an in-memory broker and storage.
pub struct TestApp {
    pub server: ProcessingServer,
    pub storage: Arc<MemoryStorage>,
    pub broker: Arc<MemoryBroker>,
}

impl TestApp {
    /// Wait until every given resolved group has subscribed, so a publish
    /// cannot race the consumer's startup.
    pub async fn wait_subscribed(&self, groups: &[String]) {
        let broker = Arc::clone(&self.broker);
        let groups = groups.to_vec();
        wait_until("consumer groups to subscribe", move || {
            let broker = Arc::clone(&broker);
            let groups = groups.clone();
            async move {
                for group in &groups {
                    if !broker.subscribed(group).await {
                        return false;
                    }
                }
                true
            }
        })
        .await;
    }

    pub fn start(config: CorreioConfig, registry: ConsumerRegistry) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let broker = MemoryBroker::new();
        let server = ProcessingServer::start(
            config,
            storage.clone(),
            Arc::new(BrokerTransportFactory {
                broker: Arc::clone(&broker),
            }),
            Some(Arc::new(BrokerClientFactory {
                broker: Arc::clone(&broker),
            })),
            registry,
        );
        Self {
            server,
            storage,
            broker,
        }
    }
}

/// Test-speed configuration: tight polling, one-second sweeps, no grace
/// window so the sweeper picks candidates immediately.
pub fn fast_config() -> CorreioConfig {
    let mut config = CorreioConfig::default();
    config.retry.failed_retry_interval_secs = 1;
    config.retry.retry_grace_secs = 0;
    config.dispatch.poll_timeout_ms = 20;
    config.dispatch.drain_timeout_secs = 5;
    config
}

/// Poll a condition until it holds, panicking after ~10 seconds.
pub async fn wait_until<F, Fut>(what: &str, mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
