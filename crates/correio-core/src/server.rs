use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{self, JsonCodec, PayloadCodec};
use crate::config::CorreioConfig;
use crate::consumer::{Ack, ConsumerRegistry, ExecuteItem};
use crate::dispatcher::Dispatcher;
use crate::error::{ExecuteError, SubscribeError};
use crate::message::{headers, MediumMessage, Message};
use crate::publisher::Publisher;
use crate::storage::DataStorage;
use crate::sweeper::RetrySweeper;
use crate::transport::{ConsumerClient, ConsumerClientFactory, Delivery, TransportFactory};

/// Lifecycle owner: starts the dispatcher workers, the retry sweeper, and one
/// receive loop per consumer group, and stops them with a bounded drain.
///
/// Receive loops run under infinite-retry supervision: a failed broker
/// session (connect, subscribe, or poll error) is logged and re-established;
/// only cancellation ends a loop. Shutdown cancels everything and waits up to
/// the configured drain timeout — a timeout is logged, not raised, since the
/// persisted state guarantees recovery on next start.
pub struct ProcessingServer {
    dispatcher: Arc<Dispatcher>,
    publisher: Publisher,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    drain_timeout: Duration,
}

impl ProcessingServer {
    /// Start with the default JSON codec.
    pub fn start(
        config: CorreioConfig,
        storage: Arc<dyn DataStorage>,
        transport_factory: Arc<dyn TransportFactory>,
        client_factory: Option<Arc<dyn ConsumerClientFactory>>,
        registry: ConsumerRegistry,
    ) -> Self {
        Self::start_with_codec(
            config,
            storage,
            transport_factory,
            client_factory,
            registry,
            Arc::new(JsonCodec),
        )
    }

    pub fn start_with_codec(
        config: CorreioConfig,
        storage: Arc<dyn DataStorage>,
        transport_factory: Arc<dyn TransportFactory>,
        client_factory: Option<Arc<dyn ConsumerClientFactory>>,
        registry: ConsumerRegistry,
        codec: Arc<dyn PayloadCodec>,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(registry);
        let cancel = CancellationToken::new();

        let (dispatcher, mut workers) = Dispatcher::start(
            Arc::clone(&config),
            Arc::clone(&storage),
            Arc::clone(&codec),
            Arc::clone(&registry),
            transport_factory,
            cancel.clone(),
        );

        let sweeper = RetrySweeper::new(
            Arc::clone(&storage),
            Arc::clone(&dispatcher),
            Arc::clone(&config),
        );
        workers.push(tokio::spawn({
            let cancel = cancel.clone();
            async move { sweeper.run(cancel).await }
        }));

        match client_factory {
            Some(factory) => {
                for group in registry.groups() {
                    let receive = ReceiveLoop {
                        group: group.clone(),
                        topics: registry.topics_for_group(&group),
                        factory: Arc::clone(&factory),
                        registry: Arc::clone(&registry),
                        storage: Arc::clone(&storage),
                        dispatcher: Arc::clone(&dispatcher),
                        codec: Arc::clone(&codec),
                        config: Arc::clone(&config),
                    };
                    workers.push(tokio::spawn(receive.run(cancel.clone())));
                }
            }
            None => {
                if !registry.is_empty() {
                    warn!("subscribers registered but no consumer client factory provided");
                }
            }
        }

        let publisher = Publisher::new(storage, Arc::clone(&dispatcher), codec, Arc::clone(&config));
        info!("processing server started");

        Self {
            dispatcher,
            publisher,
            cancel,
            workers,
            drain_timeout: Duration::from_secs(config.dispatch.drain_timeout_secs),
        }
    }

    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Signal cancellation and wait for in-flight work to drain, up to the
    /// configured timeout.
    pub async fn shutdown(self) {
        info!("shutting down processing server");
        self.cancel.cancel();

        let drain = async {
            for handle in self.workers {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(
                timeout_secs = self.drain_timeout.as_secs(),
                "shutdown drain timed out; persisted state recovers on next start"
            );
        }
        info!("processing server stopped");
    }
}

/// One consumer group's inbound session: create client, subscribe, poll,
/// persist, enqueue for execution.
struct ReceiveLoop {
    group: String,
    topics: Vec<String>,
    factory: Arc<dyn ConsumerClientFactory>,
    registry: Arc<ConsumerRegistry>,
    storage: Arc<dyn DataStorage>,
    dispatcher: Arc<Dispatcher>,
    codec: Arc<dyn PayloadCodec>,
    config: Arc<CorreioConfig>,
}

impl ReceiveLoop {
    async fn run(self, cancel: CancellationToken) {
        info!(group = %self.group, topics = ?self.topics, "receive loop started");
        while !cancel.is_cancelled() {
            if let Err(e) = self.session(&cancel).await {
                error!(group = %self.group, error = %e, "consumer session failed, re-establishing");
                // Small pause so an unreachable broker doesn't spin the loop
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
        info!(group = %self.group, "receive loop stopped");
    }

    async fn session(&self, cancel: &CancellationToken) -> Result<(), SubscribeError> {
        let client = self.factory.create(&self.group).await?;
        client.subscribe(&self.topics).await?;
        debug!(group = %self.group, "consumer client listening");

        let poll_timeout = Duration::from_millis(self.config.dispatch.poll_timeout_ms);
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match client.listening(poll_timeout, cancel).await? {
                Some(delivery) => {
                    if let Err(e) = self.take_delivery(&client, delivery).await {
                        warn!(group = %self.group, error = %e, "failed to take delivery");
                    }
                }
                None => continue,
            }
        }
    }

    /// Persist the inbound message before any handler runs, then hand it to
    /// the execute pipeline with its ack handle.
    async fn take_delivery(
        &self,
        client: &Arc<dyn ConsumerClient>,
        delivery: Delivery,
    ) -> Result<(), ExecuteError> {
        let (mut message, content) = match codec::from_transport(&delivery.message) {
            Ok(message) => {
                let content = self
                    .codec
                    .encode(&message)
                    .map_err(|e| ExecuteError::Decoding(e.to_string()))?;
                (message, content)
            }
            Err(e) => {
                // Unparseable payload: persist it anyway so it surfaces as a
                // terminal failure instead of vanishing.
                warn!(group = %self.group, error = %e, "undecodable delivery payload");
                let message = Message::new(delivery.message.headers.clone(), serde_json::Value::Null);
                let content = String::from_utf8_lossy(&delivery.message.body).into_owned();
                (message, content)
            }
        };

        message
            .headers
            .insert(headers::GROUP.to_string(), self.group.clone());
        if message.id().is_none() {
            message
                .headers
                .insert(headers::MESSAGE_ID.to_string(), Message::new_id());
        }

        let descriptor = message
            .name()
            .and_then(|topic| self.registry.select(&self.group, topic))
            .cloned();

        let envelope = MediumMessage::new(message, content);
        self.storage.store_received_message(&envelope).await?;

        self.dispatcher
            .enqueue_to_execute(ExecuteItem {
                envelope,
                descriptor,
                ack: Some(Ack {
                    client: Arc::clone(client),
                    receipt: delivery.receipt,
                }),
            })
            .await
    }
}
