use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::PayloadCodec;
use crate::consumer::{ConsumerContext, ConsumerExecutorDescriptor, ConsumerRegistry};
use crate::error::ExecuteError;
use crate::message::{MediumMessage, MessageDirection};
use crate::state::{StateMachine, StatusName};
use crate::storage::DataStorage;
use crate::transport::{ConsumerClient, ReceiptToken};

/// Broker acknowledgement handle carried with an inbound envelope through the
/// execute pipeline. Sweeper re-entries carry none — for those, broker
/// redelivery semantics already apply.
#[derive(Clone)]
pub struct Ack {
    pub client: Arc<dyn ConsumerClient>,
    pub receipt: ReceiptToken,
}

/// One unit of work for the execute pipeline. `descriptor` is pre-resolved on
/// the normal inbound path; `None` forces registry re-resolution (the sweeper
/// path).
pub struct ExecuteItem {
    pub envelope: MediumMessage,
    pub descriptor: Option<ConsumerExecutorDescriptor>,
    pub ack: Option<Ack>,
}

/// Invokes subscriber handlers for inbound envelopes and translates the
/// outcome into a state transition, then drives the broker ack — always
/// after the transition is persisted.
pub struct ConsumerExecutor {
    registry: Arc<ConsumerRegistry>,
    storage: Arc<dyn DataStorage>,
    state: StateMachine,
    codec: Arc<dyn PayloadCodec>,
    retry_ceiling: u32,
}

impl ConsumerExecutor {
    pub fn new(
        registry: Arc<ConsumerRegistry>,
        storage: Arc<dyn DataStorage>,
        state: StateMachine,
        codec: Arc<dyn PayloadCodec>,
        retry_ceiling: u32,
    ) -> Self {
        Self {
            registry,
            storage,
            state,
            codec,
            retry_ceiling,
        }
    }

    /// Run one envelope through handler invocation, state transition, and
    /// broker ack. Returns the pipeline error for the caller to log; the
    /// `Failed` transition has already been applied when one is returned.
    pub async fn execute(&self, item: ExecuteItem) -> Result<(), ExecuteError> {
        let ExecuteItem {
            mut envelope,
            descriptor,
            ack,
        } = item;

        match self.invoke(&envelope, descriptor.as_ref()).await {
            Ok(()) => {
                self.state
                    .change_state_detached(
                        self.storage.as_ref(),
                        MessageDirection::Subscribe,
                        &mut envelope,
                        StatusName::Succeeded,
                    )
                    .await?;
                debug!(id = %envelope.id, "message executed");
                if let Some(ack) = ack {
                    if let Err(e) = ack.client.commit(&ack.receipt).await {
                        // The transition is durable; redelivery is absorbed
                        // by at-least-once semantics.
                        warn!(id = %envelope.id, error = %e, "failed to commit delivery");
                    }
                }
                Ok(())
            }
            Err(err) => {
                envelope.origin.set_exception(err.to_string());
                if matches!(err, ExecuteError::Decoding(_)) {
                    // Undecodable content can never execute — pin retries at
                    // the ceiling so the sweeper skips it.
                    envelope.retries = self.retry_ceiling;
                }
                self.state
                    .change_state_detached(
                        self.storage.as_ref(),
                        MessageDirection::Subscribe,
                        &mut envelope,
                        StatusName::Failed,
                    )
                    .await?;
                if let Some(ack) = ack {
                    if let Err(e) = ack.client.reject(&ack.receipt).await {
                        warn!(id = %envelope.id, error = %e, "failed to reject delivery");
                    }
                }
                Err(err)
            }
        }
    }

    async fn invoke(
        &self,
        envelope: &MediumMessage,
        descriptor: Option<&ConsumerExecutorDescriptor>,
    ) -> Result<(), ExecuteError> {
        let group = envelope.origin.group().unwrap_or_default().to_string();
        let topic = envelope.origin.name().unwrap_or_default().to_string();

        let descriptor = match descriptor {
            Some(d) => d.clone(),
            None => self
                .registry
                .select(&group, &topic)
                .cloned()
                .ok_or_else(|| ExecuteError::NoSubscriber {
                    group: group.clone(),
                    topic: topic.clone(),
                })?,
        };

        let message = self
            .codec
            .decode(&envelope.content)
            .map_err(|e| ExecuteError::Decoding(e.to_string()))?;

        let ctx = ConsumerContext {
            message,
            group: descriptor.group.clone(),
            topic: descriptor.topic.clone(),
        };
        (descriptor.handler)(ctx)
            .await
            .map_err(|e| ExecuteError::Handler(format!("{e:#}")))
    }
}
