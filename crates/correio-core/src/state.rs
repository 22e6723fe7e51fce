use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::error::StorageResult;
use crate::message::{MediumMessage, MessageDirection};
use crate::storage::{DataStorage, StorageTransaction};

/// Closed set of envelope statuses. Every envelope has exactly one current
/// status at all times; transitions go through [`StateMachine`] so status,
/// expiry, and side effects are persisted as a single storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusName {
    Scheduled,
    Processing,
    Succeeded,
    Failed,
}

impl StatusName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusName::Scheduled => "scheduled",
            StatusName::Processing => "processing",
            StatusName::Succeeded => "succeeded",
            StatusName::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusName::Succeeded | StatusName::Failed)
    }
}

impl std::fmt::Display for StatusName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-status policy: how long after entering the status a row becomes
/// eligible for purge. `None` means the row never auto-expires.
#[derive(Debug, Clone, Copy)]
pub struct StatePolicy {
    pub expires_after: Option<Duration>,
}

/// Applies status transitions to envelopes and persists them.
///
/// The status set is a closed enum and the per-status behavior is a lookup on
/// it — there is no open-ended subclassing. The transition writes expiry,
/// status, and the apply side effect through one `update_message` call on one
/// transaction, so a partially applied transition is never observable.
#[derive(Debug, Clone)]
pub struct StateMachine {
    succeeded_ttl: Duration,
    failed_ttl: Duration,
}

impl StateMachine {
    pub fn new(retry: &RetryConfig) -> Self {
        Self {
            succeeded_ttl: Duration::seconds(retry.succeed_expired_after_secs as i64),
            failed_ttl: Duration::seconds(retry.failed_expired_after_secs as i64),
        }
    }

    /// Expiry policy for a status. Terminal statuses expire after a bounded
    /// window; `Scheduled` and `Processing` rows stay until resolved.
    pub fn policy(&self, status: StatusName) -> StatePolicy {
        match status {
            StatusName::Scheduled | StatusName::Processing => StatePolicy {
                expires_after: None,
            },
            StatusName::Succeeded => StatePolicy {
                expires_after: Some(self.succeeded_ttl),
            },
            StatusName::Failed => StatePolicy {
                expires_after: Some(self.failed_ttl),
            },
        }
    }

    /// Transition an envelope within the caller's transaction: set expiry
    /// from the status policy, set the status, run the status's apply hook,
    /// then persist the row. No retries here — failures propagate to the
    /// caller, which owns the surrounding retry policy.
    pub async fn change_state(
        &self,
        direction: MessageDirection,
        envelope: &mut MediumMessage,
        status: StatusName,
        tx: &mut dyn StorageTransaction,
    ) -> StorageResult<()> {
        envelope.expires_at = self
            .policy(status)
            .expires_after
            .map(|ttl| Utc::now() + ttl);
        envelope.status = status;
        Self::apply(status, envelope);
        tx.update_message(direction, envelope).await
    }

    /// Transition with no ambient transaction: open one, transition, commit.
    pub async fn change_state_detached(
        &self,
        storage: &dyn DataStorage,
        direction: MessageDirection,
        envelope: &mut MediumMessage,
        status: StatusName,
    ) -> StorageResult<()> {
        let mut tx = storage.begin().await?;
        self.change_state(direction, envelope, status, tx.as_mut())
            .await?;
        tx.commit().await
    }

    /// Side effects that ride along with the status write. A message that
    /// finally succeeds sheds any exception recorded by earlier attempts.
    fn apply(status: StatusName, envelope: &mut MediumMessage) {
        match status {
            StatusName::Succeeded => envelope.origin.remove_exception(),
            StatusName::Scheduled | StatusName::Processing | StatusName::Failed => {}
        }
    }
}
