pub mod local;
pub mod postgres;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::future::BoxFuture;
use spotwalk_shared::{AchievedSet, AchievementMap, achieved_set};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::WriteError;

pub use local::LocalLedger;
pub use postgres::PgLedger;

pub type WriteFuture<'a> = BoxFuture<'a, Result<(), WriteError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Remote,
    Local,
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Remote => "remote",
            Self::Local => "local",
        })
    }
}

/// Payload of a `record` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AchievementDraft {
    pub spot_index: usize,
    pub user_id: String,
    pub nickname: String,
    pub address: String,
}

/// Shared store of who achieved which spot.
///
/// `record` and `revoke` never touch what subscribers see directly; the
/// change arrives through `subscribe` once the store has accepted it.
pub trait AchievementLedger: Send + Sync {
    fn kind(&self) -> LedgerKind;

    fn subscribe(&self) -> LedgerSubscription;

    /// Create or replace the record for `draft.spot_index`.
    fn record(&self, draft: AchievementDraft) -> WriteFuture<'_>;

    /// Remove the record for `spot_index`. Absent records are a no-op.
    fn revoke(&self, spot_index: usize) -> WriteFuture<'_>;

    /// Stop background work (pollers). Subscriptions end afterwards.
    fn close(&self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub seq: u64,
    pub records: Arc<AchievementMap>,
}

impl LedgerSnapshot {
    pub fn achieved(&self) -> AchievedSet {
        achieved_set(&self.records)
    }
}

/// Sequence-numbered fan-out of ledger snapshots. Implementations publish
/// here whenever the store's contents change.
pub struct LedgerHub {
    current: Arc<Mutex<LedgerSnapshot>>,
    tx: broadcast::Sender<LedgerSnapshot>,
}

impl LedgerHub {
    pub fn new(initial: AchievementMap, buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            current: Arc::new(Mutex::new(LedgerSnapshot {
                seq: 0,
                records: Arc::new(initial),
            })),
            tx,
        }
    }

    pub fn current(&self) -> LedgerSnapshot {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish `records` if they differ from the current snapshot.
    pub fn publish(&self, records: AchievementMap) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current.records == records {
            return false;
        }
        let next = LedgerSnapshot {
            seq: current.seq + 1,
            records: Arc::new(records),
        };
        *current = next.clone();
        // Sent under the lock so subscribers observe sequence order.
        let _ = self.tx.send(next);
        true
    }

    pub fn subscribe(&self) -> LedgerSubscription {
        // Subscribe before reading so nothing published in between is lost.
        let rx = self.tx.subscribe();
        let initial = self.current();
        LedgerSubscription {
            last_seq: None,
            initial: Some(initial),
            rx,
            current: Arc::downgrade(&self.current),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's ordered view of the ledger: the snapshot at subscription
/// time first, then every later snapshot. Dropping it unsubscribes.
pub struct LedgerSubscription {
    last_seq: Option<u64>,
    initial: Option<LedgerSnapshot>,
    rx: broadcast::Receiver<LedgerSnapshot>,
    current: Weak<Mutex<LedgerSnapshot>>,
}

impl LedgerSubscription {
    pub async fn next(&mut self) -> Option<LedgerSnapshot> {
        if let Some(initial) = self.initial.take() {
            self.last_seq = Some(initial.seq);
            return Some(initial);
        }

        loop {
            match self.rx.recv().await {
                Ok(snapshot) => {
                    if self.last_seq.is_some_and(|last| snapshot.seq <= last) {
                        continue;
                    }
                    self.last_seq = Some(snapshot.seq);
                    return Some(snapshot);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "ledger subscriber lagged; resyncing from latest snapshot");
                    let latest = self.current.upgrade().map(|current| {
                        current
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone()
                    })?;
                    if self.last_seq.is_some_and(|last| latest.seq <= last) {
                        continue;
                    }
                    self.last_seq = Some(latest.seq);
                    return Some(latest);
                }
                Err(RecvError::Closed) => {
                    debug!("ledger closed; ending subscription");
                    return None;
                }
            }
        }
    }

    pub fn unsubscribe(self) {}
}
