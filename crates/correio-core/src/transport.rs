use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{SubscribeError, TransportError};
use crate::message::headers;
use crate::pool::ResourceFactory;

/// Immutable wire message: string headers plus an opaque byte payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportMessage {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportMessage {
    pub fn id(&self) -> Option<&str> {
        self.headers.get(headers::MESSAGE_ID).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.headers.get(headers::MESSAGE_NAME).map(String::as_str)
    }

    pub fn group(&self) -> Option<&str> {
        self.headers.get(headers::GROUP).map(String::as_str)
    }
}

/// Broker-issued token identifying one delivery for commit/reject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptToken(pub String);

/// One inbound delivery: the wire message and the token to ack it with.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: TransportMessage,
    pub receipt: ReceiptToken,
}

/// Outbound broker connection. One `send` at a time per connection; the
/// dispatcher rents connections from a bounded pool so no worker holds one
/// longer than a single send.
#[async_trait]
pub trait Transport: Send + Sync {
    fn broker_address(&self) -> String;

    async fn send(&self, message: &TransportMessage) -> Result<(), TransportError>;
}

/// Creates outbound connections for the dispatcher's connection pool.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportError>;
}

#[async_trait]
impl<T: TransportFactory + ?Sized> ResourceFactory for Arc<T> {
    type Resource = Box<dyn Transport>;

    async fn create(&self) -> Result<Self::Resource, TransportError> {
        self.connect().await
    }
}

/// Inbound broker subscription for one consumer group.
///
/// `listening` polls for the next delivery, returning `None` on idle timeout
/// so the caller can re-check cancellation. Implementations must honor the
/// cancellation token at every blocking wait.
#[async_trait]
pub trait ConsumerClient: Send + Sync {
    async fn subscribe(&self, topics: &[String]) -> Result<(), SubscribeError>;

    async fn listening(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Delivery>, SubscribeError>;

    /// Acknowledge a delivery. Always called after the local state transition
    /// has been persisted, so a crash in between is recoverable locally.
    async fn commit(&self, receipt: &ReceiptToken) -> Result<(), TransportError>;

    /// Reject a delivery so the broker's redelivery semantics apply.
    async fn reject(&self, receipt: &ReceiptToken) -> Result<(), TransportError>;
}

/// Creates one consumer client per group. Connection failures surface as a
/// single [`SubscribeError::Connect`]; the processing server retries creation
/// indefinitely under its supervisor.
#[async_trait]
pub trait ConsumerClientFactory: Send + Sync {
    async fn create(&self, group: &str) -> Result<Arc<dyn ConsumerClient>, SubscribeError>;
}
