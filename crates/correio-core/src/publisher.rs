use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::codec::PayloadCodec;
use crate::config::CorreioConfig;
use crate::consumer::resolve_topic;
use crate::dispatcher::Dispatcher;
use crate::error::{CodecError, PublishError};
use crate::message::{headers, MediumMessage, Message, MessageDirection};
use crate::storage::{DataStorage, StorageTransaction};

/// Outbox write path: persist-first publishing.
///
/// Every publish persists a `Scheduled` envelope before anything touches the
/// broker. The detached variants open their own transaction; `publish_in`
/// joins the caller's transaction so the message and the business change
/// commit or roll back together.
#[derive(Clone)]
pub struct Publisher {
    storage: Arc<dyn DataStorage>,
    dispatcher: Arc<Dispatcher>,
    codec: Arc<dyn PayloadCodec>,
    config: Arc<CorreioConfig>,
}

impl Publisher {
    pub fn new(
        storage: Arc<dyn DataStorage>,
        dispatcher: Arc<Dispatcher>,
        codec: Arc<dyn PayloadCodec>,
        config: Arc<CorreioConfig>,
    ) -> Self {
        Self {
            storage,
            dispatcher,
            codec,
            config,
        }
    }

    /// Persist and dispatch a message in one call.
    pub async fn publish<T: Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<MediumMessage, PublishError> {
        self.publish_with_headers(name, value, HashMap::new()).await
    }

    /// Persist and dispatch with extra application headers (e.g. an explicit
    /// correlation id or callback name).
    pub async fn publish_with_headers<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        extra_headers: HashMap<String, String>,
    ) -> Result<MediumMessage, PublishError> {
        let envelope = self.build_envelope(name, value, extra_headers)?;
        self.storage.store_message(&envelope).await?;
        debug!(id = %envelope.id, name, "message persisted for publish");
        self.dispatcher.enqueue_to_publish(envelope.clone()).await?;
        Ok(envelope)
    }

    /// Persist into the caller's transaction. The message becomes visible —
    /// and deliverable — only if the caller commits; on rollback it never
    /// existed. After committing, pass the returned envelope to [`flush`] for
    /// immediate dispatch; otherwise the sweeper forwards it after the grace
    /// window.
    ///
    /// [`flush`]: Publisher::flush
    pub async fn publish_in<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        tx: &mut dyn StorageTransaction,
    ) -> Result<MediumMessage, PublishError> {
        let envelope = self.build_envelope(name, value, HashMap::new())?;
        tx.store_message(MessageDirection::Publish, &envelope)
            .await?;
        Ok(envelope)
    }

    /// Dispatch an envelope persisted via [`publish_in`] after its
    /// transaction committed.
    ///
    /// [`publish_in`]: Publisher::publish_in
    pub async fn flush(&self, envelope: MediumMessage) -> Result<(), PublishError> {
        self.dispatcher.enqueue_to_publish(envelope).await
    }

    /// Persist now, deliver after `delay`.
    pub async fn publish_delayed<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        delay: std::time::Duration,
    ) -> Result<MediumMessage, PublishError> {
        let envelope = self.build_envelope(name, value, HashMap::new())?;
        self.storage.store_message(&envelope).await?;
        let due = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        self.dispatcher
            .enqueue_to_scheduler(envelope.clone(), MessageDirection::Publish, due)
            .await?;
        Ok(envelope)
    }

    fn build_envelope<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        extra_headers: HashMap<String, String>,
    ) -> Result<MediumMessage, PublishError> {
        let body = serde_json::to_value(value).map_err(CodecError::from)?;

        let id = Message::new_id();
        let mut message_headers = extra_headers;
        message_headers.insert(headers::MESSAGE_ID.to_string(), id.clone());
        message_headers.insert(
            headers::MESSAGE_NAME.to_string(),
            resolve_topic(name, &self.config.group),
        );
        message_headers.insert(
            headers::TYPE.to_string(),
            std::any::type_name::<T>().to_string(),
        );
        message_headers
            .entry(headers::CORRELATION_ID.to_string())
            .or_insert(id);
        message_headers.insert(headers::SENT_TIME.to_string(), Utc::now().to_rfc3339());

        let message = Message::new(message_headers, body);
        let content = self.codec.encode(&message)?;
        Ok(MediumMessage::new(message, content))
    }
}
