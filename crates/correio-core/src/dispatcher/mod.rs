mod delay;
mod publish;

pub use delay::DelayedItem;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::PayloadCodec;
use crate::config::CorreioConfig;
use crate::consumer::{ConsumerExecutor, ConsumerRegistry, ExecuteItem};
use crate::error::{ExecuteError, PublishError};
use crate::message::{MediumMessage, MessageDirection};
use crate::pool::Pool;
use crate::state::StateMachine;
use crate::storage::DataStorage;
use crate::transport::TransportFactory;

/// The single point where envelopes move from "persisted" to "delivered or
/// executed": a bounded publish queue, one bounded execute queue per consumer
/// group, and a time-ordered delay queue, each drained by its own worker
/// pool. Workers never block each other's queues.
pub struct Dispatcher {
    publish_tx: mpsc::Sender<MediumMessage>,
    execute_tx: HashMap<String, mpsc::Sender<ExecuteItem>>,
    delay_tx: mpsc::Sender<DelayedItem>,
}

impl Dispatcher {
    /// Spawn the worker pools and return the dispatcher handle plus the
    /// worker join handles (owned by the processing server for shutdown).
    pub fn start(
        config: Arc<CorreioConfig>,
        storage: Arc<dyn DataStorage>,
        codec: Arc<dyn PayloadCodec>,
        registry: Arc<ConsumerRegistry>,
        transport_factory: Arc<dyn TransportFactory>,
        cancel: CancellationToken,
    ) -> (Arc<Dispatcher>, Vec<JoinHandle<()>>) {
        let mut handles = Vec::new();
        let capacity = config.dispatch.channel_capacity;
        let state = StateMachine::new(&config.retry);

        // Publish pipeline
        let (publish_tx, publish_rx) = mpsc::channel(capacity);
        let publish_rx = Arc::new(tokio::sync::Mutex::new(publish_rx));
        let worker = Arc::new(publish::PublishWorker {
            storage: Arc::clone(&storage),
            state: state.clone(),
            codec: Arc::clone(&codec),
            pool: Pool::new(transport_factory, config.dispatch.connection_pool_size),
            retry_ceiling: config.retry.failed_retry_count,
        });
        for idx in 0..config.dispatch.publish_concurrency.max(1) {
            handles.push(tokio::spawn(publish::run(
                Arc::clone(&worker),
                Arc::clone(&publish_rx),
                cancel.clone(),
                idx,
            )));
        }

        // Execute pipeline: one queue per group so a slow group never starves
        // the others, with a per-group worker pool.
        let executor = Arc::new(ConsumerExecutor::new(
            Arc::clone(&registry),
            storage,
            state,
            codec,
            config.retry.failed_retry_count,
        ));
        let mut execute_tx = HashMap::new();
        for group in registry.groups() {
            let (tx, rx) = mpsc::channel(capacity);
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            for idx in 0..config.dispatch.consumer_concurrency.max(1) {
                handles.push(tokio::spawn(execute_worker(
                    Arc::clone(&executor),
                    Arc::clone(&rx),
                    cancel.clone(),
                    group.clone(),
                    idx,
                )));
            }
            execute_tx.insert(group, tx);
        }

        // Delay pipeline
        let (delay_tx, delay_rx) = mpsc::channel(capacity);
        handles.push(tokio::spawn(delay::run(
            delay_rx,
            publish_tx.clone(),
            execute_tx.clone(),
            cancel,
        )));

        (
            Arc::new(Dispatcher {
                publish_tx,
                execute_tx,
                delay_tx,
            }),
            handles,
        )
    }

    /// Hand an outbound envelope to the send pipeline. Blocks when the
    /// bounded queue is full.
    pub async fn enqueue_to_publish(&self, envelope: MediumMessage) -> Result<(), PublishError> {
        self.publish_tx
            .send(envelope)
            .await
            .map_err(|_| PublishError::DispatcherStopped)
    }

    /// Hand an inbound envelope to the handler-invocation pipeline. The
    /// descriptor is pre-resolved on the normal path; `None` (sweeper path)
    /// defers resolution to the executor. Routed by resolved group.
    pub async fn enqueue_to_execute(&self, item: ExecuteItem) -> Result<(), ExecuteError> {
        let group = item
            .descriptor
            .as_ref()
            .map(|d| d.group.clone())
            .or_else(|| item.envelope.origin.group().map(str::to_string))
            .unwrap_or_default();

        let Some(tx) = self.execute_tx.get(&group) else {
            return Err(ExecuteError::NoSubscriber {
                group,
                topic: item
                    .envelope
                    .origin
                    .name()
                    .unwrap_or_default()
                    .to_string(),
            });
        };
        tx.send(item)
            .await
            .map_err(|_| ExecuteError::DispatcherStopped)
    }

    /// Hand an envelope to the delay pipeline; it re-enters publish or
    /// execute once `due` passes. The envelope stays persisted as
    /// `Scheduled` meanwhile, so a crash loses nothing the sweeper cannot
    /// recover.
    pub async fn enqueue_to_scheduler(
        &self,
        envelope: MediumMessage,
        direction: MessageDirection,
        due: DateTime<Utc>,
    ) -> Result<(), PublishError> {
        self.delay_tx
            .send(DelayedItem {
                envelope,
                direction,
                due,
            })
            .await
            .map_err(|_| PublishError::DispatcherStopped)
    }
}

async fn execute_worker(
    executor: Arc<ConsumerExecutor>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ExecuteItem>>>,
    cancel: CancellationToken,
    group: String,
    idx: usize,
) {
    debug!(%group, worker = idx, "execute worker started");
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = recv(&rx) => match item {
                Some(item) => item,
                None => break,
            },
        };
        let id = item.envelope.id.clone();
        // Failures are contained to this message: the envelope is already
        // Failed, or the storage write failed and the sweeper re-picks it.
        if let Err(e) = executor.execute(item).await {
            warn!(%group, %id, error = %e, "execute pipeline failed");
        }
    }
    debug!(%group, worker = idx, "execute worker stopped");
}

/// Receive one item from a shared receiver. The lock is held only while
/// waiting for the next item, never while processing it, so pool workers
/// drain the queue concurrently.
pub(crate) async fn recv<T>(rx: &Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>) -> Option<T> {
    rx.lock().await.recv().await
}
