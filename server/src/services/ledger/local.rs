use std::sync::Arc;

use chrono::Utc;
use spotwalk_shared::{
    AchievementMap, AchievementRecord, LedgerDocuments, documents_from_records,
    records_from_documents,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{
    AchievementDraft, AchievementLedger, LedgerHub, LedgerKind, LedgerSubscription, WriteFuture,
};
use crate::error::WriteError;
use crate::services::local_store::KeyValueStore;

pub const ACHIEVEMENTS_KEY: &str = "spotwalk.achievements";

/// Fallback ledger used when no remote store is configured. Records live in
/// the local key→string store under [`ACHIEVEMENTS_KEY`].
pub struct LocalLedger {
    store: Arc<KeyValueStore>,
    records: Mutex<AchievementMap>,
    hub: LedgerHub,
}

impl LocalLedger {
    pub async fn open(store: Arc<KeyValueStore>, buffer: usize) -> Self {
        let records = match store.get(ACHIEVEMENTS_KEY).await {
            Some(json) => match serde_json::from_str::<LedgerDocuments>(&json) {
                Ok(docs) => records_from_documents(&docs),
                Err(e) => {
                    warn!(error = %e, "stored achievements are unreadable; starting empty");
                    AchievementMap::new()
                }
            },
            None => AchievementMap::new(),
        };
        info!(
            records = records.len(),
            path = ?store.path(),
            "local achievement ledger ready"
        );
        Self {
            store,
            hub: LedgerHub::new(records.clone(), buffer),
            records: Mutex::new(records),
        }
    }

    async fn commit(&self, records: &mut AchievementMap, next: AchievementMap) -> Result<(), WriteError> {
        let json = serde_json::to_string(&documents_from_records(&next))
            .map_err(|e| WriteError::Persist(e.to_string()))?;
        self.store
            .set(ACHIEVEMENTS_KEY, json)
            .await
            .map_err(|e| WriteError::Persist(e.to_string()))?;
        *records = next.clone();
        self.hub.publish(next);
        Ok(())
    }
}

impl AchievementLedger for LocalLedger {
    fn kind(&self) -> LedgerKind {
        LedgerKind::Local
    }

    fn subscribe(&self) -> LedgerSubscription {
        self.hub.subscribe()
    }

    fn record(&self, draft: AchievementDraft) -> WriteFuture<'_> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            let mut next = records.clone();
            next.insert(
                draft.spot_index,
                AchievementRecord {
                    spot_index: draft.spot_index,
                    achieved_by_user_id: draft.user_id,
                    achieved_by_nickname: draft.nickname,
                    address: draft.address,
                    achieved_at: Utc::now(),
                },
            );
            self.commit(&mut records, next).await
        })
    }

    fn revoke(&self, spot_index: usize) -> WriteFuture<'_> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            if !records.contains_key(&spot_index) {
                return Ok(());
            }
            let mut next = records.clone();
            next.remove(&spot_index);
            self.commit(&mut records, next).await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use spotwalk_shared::AchievedSet;

    use super::{ACHIEVEMENTS_KEY, LocalLedger};
    use crate::services::ledger::{AchievementDraft, AchievementLedger};
    use crate::services::local_store::KeyValueStore;
    use crate::services::local_store::tests::scratch_path;

    fn draft(spot_index: usize, user: &str) -> AchievementDraft {
        AchievementDraft {
            spot_index,
            user_id: user.to_string(),
            nickname: format!("{user}-nick"),
            address: format!("spot {spot_index}"),
        }
    }

    #[tokio::test]
    async fn writes_reach_subscribers_and_survive_restart() {
        let path = scratch_path("ledger");
        let store = Arc::new(KeyValueStore::open(&path).await.expect("open"));
        let ledger = LocalLedger::open(store, 8).await;
        let mut sub = ledger.subscribe();
        assert_eq!(sub.next().await.expect("initial").achieved(), AchievedSet::new());

        ledger.record(draft(2, "u1")).await.expect("record");
        assert_eq!(sub.next().await.expect("change").achieved(), AchievedSet::from([2]));

        let reopened = LocalLedger::open(
            Arc::new(KeyValueStore::open(&path).await.expect("reopen")),
            8,
        )
        .await;
        let snapshot = reopened.subscribe().next().await.expect("initial");
        assert_eq!(snapshot.achieved(), AchievedSet::from([2]));
        assert_eq!(snapshot.records[&2].achieved_by_user_id, "u1");
        let _ = std::fs::remove_dir_all(path.parent().expect("parent"));
    }

    #[tokio::test]
    async fn second_record_for_same_spot_wins() {
        let ledger = LocalLedger::open(Arc::new(KeyValueStore::ephemeral()), 8).await;
        ledger.record(draft(1, "first")).await.expect("first");
        ledger.record(draft(1, "second")).await.expect("second");

        let snapshot = ledger.subscribe().next().await.expect("snapshot");
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[&1].achieved_by_user_id, "second");
    }

    #[tokio::test]
    async fn revoking_absent_record_is_a_noop() {
        let store = Arc::new(KeyValueStore::ephemeral());
        let ledger = LocalLedger::open(store.clone(), 8).await;
        ledger.record(draft(0, "u1")).await.expect("record");
        let before = ledger.subscribe().next().await.expect("snapshot");
        let stored_before = store.get(ACHIEVEMENTS_KEY).await;

        ledger.revoke(5).await.expect("revoking nothing succeeds");

        let after = ledger.subscribe().next().await.expect("snapshot");
        assert_eq!(before, after);
        assert_eq!(store.get(ACHIEVEMENTS_KEY).await, stored_before);
    }

    #[tokio::test]
    async fn revoke_removes_record() {
        let ledger = LocalLedger::open(Arc::new(KeyValueStore::ephemeral()), 8).await;
        ledger.record(draft(3, "u1")).await.expect("record");
        ledger.revoke(3).await.expect("revoke");
        let snapshot = ledger.subscribe().next().await.expect("snapshot");
        assert!(snapshot.records.is_empty());
    }

    #[tokio::test]
    async fn stored_documents_use_wire_shape() {
        let store = Arc::new(KeyValueStore::ephemeral());
        let ledger = LocalLedger::open(store.clone(), 8).await;
        ledger.record(draft(4, "u7")).await.expect("record");

        let json = store.get(ACHIEVEMENTS_KEY).await.expect("stored");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["4"]["achieved"], serde_json::json!(true));
        assert_eq!(value["4"]["userId"], serde_json::json!("u7"));
        assert_eq!(value["4"]["address"], serde_json::json!("spot 4"));
    }
}
