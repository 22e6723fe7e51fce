use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CorreioConfig;
use crate::consumer::ExecuteItem;
use crate::dispatcher::Dispatcher;
use crate::error::StorageResult;
use crate::message::MessageDirection;
use crate::storage::DataStorage;

/// Result of one sweep pass (useful for logging and tests).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub retried_publish: usize,
    pub retried_execute: usize,
    pub purged: usize,
}

impl SweepStats {
    pub fn is_idle(&self) -> bool {
        *self == SweepStats::default()
    }
}

/// Periodic background job that recovers stuck or failed envelopes and purges
/// expired ones — the only deletion path in the system.
///
/// Candidates are rows below the retry ceiling, older than the grace window
/// (so a row still in the normal pipeline is not raced), in Scheduled or
/// Failed status. A per-pass id set keeps a single instance from resubmitting
/// the same row twice within one pass; races against other sweeper instances
/// or the live pipeline can double-deliver, which at-least-once semantics
/// permit.
pub struct RetrySweeper {
    storage: Arc<dyn DataStorage>,
    dispatcher: Arc<Dispatcher>,
    config: Arc<CorreioConfig>,
}

impl RetrySweeper {
    pub fn new(
        storage: Arc<dyn DataStorage>,
        dispatcher: Arc<Dispatcher>,
        config: Arc<CorreioConfig>,
    ) -> Self {
        Self {
            storage,
            dispatcher,
            config,
        }
    }

    /// Run sweep passes until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_secs(self.config.retry.failed_retry_interval_secs);
        info!(interval_secs = interval.as_secs(), "retry sweeper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match self.sweep_once().await {
                Ok(stats) if !stats.is_idle() => {
                    info!(
                        retried_publish = stats.retried_publish,
                        retried_execute = stats.retried_execute,
                        purged = stats.purged,
                        "sweep pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "sweep pass failed"),
            }
        }

        info!("retry sweeper stopped");
    }

    /// One full pass: re-submit retry candidates in both directions, then
    /// purge expired rows from both tables.
    pub async fn sweep_once(&self) -> StorageResult<SweepStats> {
        let retried_publish = self.retry(MessageDirection::Publish).await?;
        let retried_execute = self.retry(MessageDirection::Subscribe).await?;
        let purged = self.purge().await?;
        Ok(SweepStats {
            retried_publish,
            retried_execute,
            purged,
        })
    }

    async fn retry(&self, direction: MessageDirection) -> StorageResult<usize> {
        let retry = &self.config.retry;
        let cutoff = Utc::now() - chrono::Duration::seconds(retry.retry_grace_secs as i64);
        let candidates = self
            .storage
            .messages_needing_retry(
                direction,
                retry.failed_retry_count,
                cutoff,
                retry.retry_batch_size,
            )
            .await?;

        let mut seen = HashSet::new();
        let mut resubmitted = 0;
        for mut envelope in candidates {
            if !seen.insert(envelope.id.clone()) {
                continue;
            }

            envelope.retries += 1;
            match direction {
                MessageDirection::Publish => {
                    self.storage.change_publish_state(&envelope).await?;
                }
                MessageDirection::Subscribe => {
                    self.storage.change_receive_state(&envelope).await?;
                }
            }
            debug!(id = %envelope.id, retries = envelope.retries, ?direction, "re-submitting envelope");

            let enqueue_err = match direction {
                MessageDirection::Publish => self
                    .dispatcher
                    .enqueue_to_publish(envelope)
                    .await
                    .err()
                    .map(|e| e.to_string()),
                MessageDirection::Subscribe => self
                    .dispatcher
                    .enqueue_to_execute(ExecuteItem {
                        envelope,
                        descriptor: None,
                        ack: None,
                    })
                    .await
                    .err()
                    .map(|e| e.to_string()),
            };
            match enqueue_err {
                // The retries increment is already persisted, so the next
                // pass still honors the ceiling.
                Some(e) => warn!(error = %e, "failed to re-enqueue envelope"),
                None => resubmitted += 1,
            }
        }
        Ok(resubmitted)
    }

    async fn purge(&self) -> StorageResult<usize> {
        let now = Utc::now();
        let batch = self.config.retry.retry_batch_size;
        let mut total = 0;
        for direction in [MessageDirection::Publish, MessageDirection::Subscribe] {
            loop {
                let deleted = self.storage.delete_expired(direction, now, batch).await?;
                total += deleted;
                if deleted < batch {
                    break;
                }
            }
        }
        Ok(total)
    }
}
