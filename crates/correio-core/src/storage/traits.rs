use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageResult;
use crate::message::{MediumMessage, MessageDirection};

/// A scoped storage transaction. Never shared across workers — each unit of
/// work opens its own. Dropping without commit must behave like rollback.
#[async_trait]
pub trait StorageTransaction: Send {
    /// Insert an envelope into the table for `direction`.
    async fn store_message(
        &mut self,
        direction: MessageDirection,
        envelope: &MediumMessage,
    ) -> StorageResult<()>;

    /// Persist an envelope's current state (status, expiry, retries, origin).
    async fn update_message(
        &mut self,
        direction: MessageDirection,
        envelope: &MediumMessage,
    ) -> StorageResult<()>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// Durable store for published and received envelopes: two logical tables of
/// the same shape, keyed by envelope id, indexed by status for the sweeper's
/// scan. Implementations must be thread-safe.
#[async_trait]
pub trait DataStorage: Send + Sync {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>>;

    /// Store a published envelope in its own transaction.
    async fn store_message(&self, envelope: &MediumMessage) -> StorageResult<()>;

    /// Store a received envelope in its own transaction.
    async fn store_received_message(&self, envelope: &MediumMessage) -> StorageResult<()>;

    /// Persist the state of a published envelope as a single operation.
    async fn change_publish_state(&self, envelope: &MediumMessage) -> StorageResult<()>;

    /// Persist the state of a received envelope as a single operation.
    async fn change_receive_state(&self, envelope: &MediumMessage) -> StorageResult<()>;

    /// Envelopes eligible for the retry sweeper: `retries < ceiling`,
    /// `added < added_before`, status Scheduled or Failed. Capped at `limit`
    /// rows per call, oldest first.
    async fn messages_needing_retry(
        &self,
        direction: MessageDirection,
        ceiling: u32,
        added_before: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<MediumMessage>>;

    /// Delete envelopes whose `expires_at` is strictly before `before`, at
    /// most `batch_size` rows. Returns the number deleted. This is the only
    /// deletion path in the system.
    async fn delete_expired(
        &self,
        direction: MessageDirection,
        before: DateTime<Utc>,
        batch_size: usize,
    ) -> StorageResult<usize>;

    /// Fetch a single envelope by id.
    async fn get_message(
        &self,
        direction: MessageDirection,
        id: &str,
    ) -> StorageResult<Option<MediumMessage>>;
}
