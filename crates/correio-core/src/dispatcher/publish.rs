use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::codec::{self, PayloadCodec};
use crate::error::{CodecError, TransportError};
use crate::message::{MediumMessage, MessageDirection};
use crate::pool::Pool;
use crate::state::{StateMachine, StatusName};
use crate::storage::DataStorage;
use crate::transport::TransportFactory;

/// Shared context for the publish worker pool.
pub(crate) struct PublishWorker {
    pub(crate) storage: Arc<dyn DataStorage>,
    pub(crate) state: StateMachine,
    pub(crate) codec: Arc<dyn PayloadCodec>,
    pub(crate) pool: Pool<Arc<dyn TransportFactory>>,
    pub(crate) retry_ceiling: u32,
}

enum SendFailure {
    /// Never retryable — a message that cannot be encoded never will be.
    Encoding(CodecError),
    /// Retryable up to the ceiling, via the sweeper.
    Transport(TransportError),
}

pub(crate) async fn run(
    worker: Arc<PublishWorker>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<MediumMessage>>>,
    cancel: CancellationToken,
    idx: usize,
) {
    debug!(worker = idx, "publish worker started");
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            envelope = super::recv(&rx) => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        worker.handle(envelope).await;
    }
    debug!(worker = idx, "publish worker stopped");
}

impl PublishWorker {
    /// Drive one envelope through transport. Failures are logged and end in
    /// a state transition, never re-thrown — the original publish caller
    /// already returned when its local transaction committed.
    async fn handle(&self, mut envelope: MediumMessage) {
        match self.try_send(&envelope).await {
            Ok(()) => {
                debug!(id = %envelope.id, "message sent");
                self.transition(&mut envelope, StatusName::Succeeded).await;
            }
            Err(SendFailure::Encoding(e)) => {
                error!(id = %envelope.id, error = %e, "message could not be encoded, failing terminally");
                envelope.origin.set_exception(e.to_string());
                envelope.retries = self.retry_ceiling;
                self.transition(&mut envelope, StatusName::Failed).await;
            }
            Err(SendFailure::Transport(e)) => {
                warn!(id = %envelope.id, retries = envelope.retries, error = %e, "transport send failed");
                envelope.origin.set_exception(e.to_string());
                self.transition(&mut envelope, StatusName::Failed).await;
            }
        }
    }

    async fn try_send(&self, envelope: &MediumMessage) -> Result<(), SendFailure> {
        let message = self
            .codec
            .decode(&envelope.content)
            .map_err(SendFailure::Encoding)?;
        let wire = codec::to_transport(&message).map_err(SendFailure::Encoding)?;

        let conn = self.pool.acquire().await.map_err(SendFailure::Transport)?;
        match conn.send(&wire).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_connection() {
                    conn.discard();
                }
                Err(SendFailure::Transport(e))
            }
        }
    }

    async fn transition(&self, envelope: &mut MediumMessage, status: StatusName) {
        if let Err(e) = self
            .state
            .change_state_detached(
                self.storage.as_ref(),
                MessageDirection::Publish,
                envelope,
                status,
            )
            .await
        {
            // The row keeps its previous status; the sweeper re-picks it.
            error!(id = %envelope.id, %status, error = %e, "failed to persist state transition");
        }
    }
}
