use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::consumer::ExecuteItem;
use crate::message::{MediumMessage, MessageDirection};

/// An envelope parked until its due time, then re-injected into the publish
/// or execute pipeline.
pub struct DelayedItem {
    pub envelope: MediumMessage,
    pub direction: MessageDirection,
    pub due: DateTime<Utc>,
}

/// Heap entry ordered by (due, arrival sequence); the sequence keeps
/// same-instant items FIFO.
struct DelayedEntry {
    due: DateTime<Utc>,
    seq: u64,
    envelope: MediumMessage,
    direction: MessageDirection,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest due is on top.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Delay queue worker: owns the time-ordered heap, sleeps until the next due
/// time or the next incoming item, and re-injects due envelopes.
pub(crate) async fn run(
    mut rx: mpsc::Receiver<DelayedItem>,
    publish_tx: mpsc::Sender<MediumMessage>,
    execute_tx: HashMap<String, mpsc::Sender<ExecuteItem>>,
    cancel: CancellationToken,
) {
    debug!("delay worker started");
    let mut heap: BinaryHeap<DelayedEntry> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        let next_due = heap.peek().map(|entry| entry.due);
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => {
                    heap.push(DelayedEntry {
                        due: item.due,
                        seq,
                        envelope: item.envelope,
                        direction: item.direction,
                    });
                    seq = seq.wrapping_add(1);
                }
                None => break,
            },
            _ = sleep_until(next_due), if next_due.is_some() => {
                let now = Utc::now();
                while heap.peek().is_some_and(|entry| entry.due <= now) {
                    let Some(entry) = heap.pop() else { break };
                    if !reinject(entry, &publish_tx, &execute_tx).await {
                        debug!("delay worker stopped, downstream closed");
                        return;
                    }
                }
            }
        }
    }
    debug!("delay worker stopped");
}

/// Returns false when the downstream channel is closed (shutdown).
async fn reinject(
    entry: DelayedEntry,
    publish_tx: &mpsc::Sender<MediumMessage>,
    execute_tx: &HashMap<String, mpsc::Sender<ExecuteItem>>,
) -> bool {
    match entry.direction {
        MessageDirection::Publish => publish_tx.send(entry.envelope).await.is_ok(),
        MessageDirection::Subscribe => {
            let group = entry
                .envelope
                .origin
                .group()
                .unwrap_or_default()
                .to_string();
            match execute_tx.get(&group) {
                Some(tx) => tx
                    .send(ExecuteItem {
                        envelope: entry.envelope,
                        descriptor: None,
                        ack: None,
                    })
                    .await
                    .is_ok(),
                None => {
                    warn!(%group, "delayed envelope for unknown group dropped; sweeper will re-pick it");
                    true
                }
            }
        }
    }
}

async fn sleep_until(due: Option<DateTime<Utc>>) {
    match due {
        Some(due) => {
            let delta = (due - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::time::sleep(delta).await;
        }
        None => std::future::pending::<()>().await,
    }
}
