use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StorageResult;
use crate::message::{MediumMessage, MessageDirection};
use crate::state::StatusName;
use crate::storage::traits::{DataStorage, StorageTransaction};

/// In-memory reference storage: two logical tables keyed by envelope id,
/// with buffering transactions (commit applies, rollback/drop discards).
///
/// This is the test backbone and the reference for real adapters; durable
/// backends implement the same trait pair against their own schema.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

#[derive(Default)]
struct Tables {
    published: HashMap<String, MediumMessage>,
    received: HashMap<String, MediumMessage>,
}

impl Tables {
    fn table_mut(&mut self, direction: MessageDirection) -> &mut HashMap<String, MediumMessage> {
        match direction {
            MessageDirection::Publish => &mut self.published,
            MessageDirection::Subscribe => &mut self.received,
        }
    }

    fn table(&self, direction: MessageDirection) -> &HashMap<String, MediumMessage> {
        match direction {
            MessageDirection::Publish => &self.published,
            MessageDirection::Subscribe => &self.received,
        }
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count for a table (used by tests).
    pub async fn len(&self, direction: MessageDirection) -> usize {
        self.tables.lock().await.table(direction).len()
    }

    pub async fn is_empty(&self, direction: MessageDirection) -> bool {
        self.len(direction).await == 0
    }
}

enum Op {
    Store(MessageDirection, MediumMessage),
    Update(MessageDirection, MediumMessage),
}

struct MemoryTransaction {
    tables: Arc<Mutex<Tables>>,
    ops: Vec<Op>,
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn store_message(
        &mut self,
        direction: MessageDirection,
        envelope: &MediumMessage,
    ) -> StorageResult<()> {
        self.ops.push(Op::Store(direction, envelope.clone()));
        Ok(())
    }

    async fn update_message(
        &mut self,
        direction: MessageDirection,
        envelope: &MediumMessage,
    ) -> StorageResult<()> {
        self.ops.push(Op::Update(direction, envelope.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        // All buffered ops apply under one lock, so a transition (status +
        // side effect + row write) is observable only as a whole.
        let mut tables = self.tables.lock().await;
        for op in self.ops {
            match op {
                Op::Store(direction, envelope) | Op::Update(direction, envelope) => {
                    tables.table_mut(direction).insert(envelope.id.clone(), envelope);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl DataStorage for MemoryStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: Arc::clone(&self.tables),
            ops: Vec::new(),
        }))
    }

    async fn store_message(&self, envelope: &MediumMessage) -> StorageResult<()> {
        self.tables
            .lock()
            .await
            .published
            .insert(envelope.id.clone(), envelope.clone());
        Ok(())
    }

    async fn store_received_message(&self, envelope: &MediumMessage) -> StorageResult<()> {
        self.tables
            .lock()
            .await
            .received
            .insert(envelope.id.clone(), envelope.clone());
        Ok(())
    }

    async fn change_publish_state(&self, envelope: &MediumMessage) -> StorageResult<()> {
        self.tables
            .lock()
            .await
            .published
            .insert(envelope.id.clone(), envelope.clone());
        Ok(())
    }

    async fn change_receive_state(&self, envelope: &MediumMessage) -> StorageResult<()> {
        self.tables
            .lock()
            .await
            .received
            .insert(envelope.id.clone(), envelope.clone());
        Ok(())
    }

    async fn messages_needing_retry(
        &self,
        direction: MessageDirection,
        ceiling: u32,
        added_before: DateTime<Utc>,
        limit: usize,
    ) -> StorageResult<Vec<MediumMessage>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<MediumMessage> = tables
            .table(direction)
            .values()
            .filter(|m| {
                m.retries < ceiling
                    && m.added < added_before
                    && matches!(m.status, StatusName::Scheduled | StatusName::Failed)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.added.cmp(&b.added).then_with(|| a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn delete_expired(
        &self,
        direction: MessageDirection,
        before: DateTime<Utc>,
        batch_size: usize,
    ) -> StorageResult<usize> {
        let mut tables = self.tables.lock().await;
        let table = tables.table_mut(direction);
        let doomed: Vec<String> = table
            .values()
            .filter(|m| m.expires_at.is_some_and(|at| at < before))
            .map(|m| m.id.clone())
            .take(batch_size)
            .collect();
        for id in &doomed {
            table.remove(id);
        }
        Ok(doomed.len())
    }

    async fn get_message(
        &self,
        direction: MessageDirection,
        id: &str,
    ) -> StorageResult<Option<MediumMessage>> {
        Ok(self.tables.lock().await.table(direction).get(id).cloned())
    }
}
