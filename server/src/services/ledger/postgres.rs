use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use spotwalk_shared::{AchievementMap, AchievementRecord};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{
    AchievementDraft, AchievementLedger, LedgerHub, LedgerKind, LedgerSubscription, WriteFuture,
};
use crate::error::WriteError;

type AchievementRow = (i64, bool, String, String, String, DateTime<Utc>);

/// Ledger backed by the shared Postgres `achievements` table.
///
/// Other sessions write to the same table, so changes are discovered by a
/// poller that diffs each read against the last published snapshot. Local
/// writes wake the poller immediately.
pub struct PgLedger {
    pool: sqlx::PgPool,
    hub: Arc<LedgerHub>,
    refresh: Arc<Notify>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl PgLedger {
    pub async fn start(
        pool: sqlx::PgPool,
        poll_interval: Duration,
        buffer: usize,
    ) -> Result<Self, sqlx_core::Error> {
        let initial = fetch_records(&pool).await?;
        info!(
            records = initial.len(),
            poll_interval_ms = poll_interval.as_millis() as u64,
            "remote achievement ledger ready"
        );
        let hub = Arc::new(LedgerHub::new(initial, buffer));
        let refresh = Arc::new(Notify::new());
        let poller = tokio::spawn(run_poller(
            pool.clone(),
            Arc::clone(&hub),
            Arc::clone(&refresh),
            poll_interval,
        ));
        Ok(Self {
            pool,
            hub,
            refresh,
            poller: Mutex::new(Some(poller)),
        })
    }
}

async fn run_poller(
    pool: sqlx::PgPool,
    hub: Arc<LedgerHub>,
    refresh: Arc<Notify>,
    poll_interval: Duration,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The initial snapshot was read during start.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {},
            () = refresh.notified() => {},
        }

        match fetch_records(&pool).await {
            Ok(records) => {
                let count = records.len();
                if hub.publish(records) {
                    info!(
                        subscribers = hub.subscriber_count(),
                        "achievement ledger changed ({count} records)"
                    );
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to poll achievements; will retry");
            }
        }
    }
}

async fn fetch_records(pool: &sqlx::PgPool) -> Result<AchievementMap, sqlx_core::Error> {
    let rows: Vec<AchievementRow> = sqlx::query_as(
        "SELECT spot_index, achieved, user_id, nickname, address, achieved_at \
         FROM achievements WHERE achieved",
    )
    .fetch_all(pool)
    .await?;
    Ok(records_from_rows(rows))
}

fn records_from_rows(rows: Vec<AchievementRow>) -> AchievementMap {
    rows.into_iter()
        .filter(|(_, achieved, ..)| *achieved)
        .filter_map(|(spot_index, _, user_id, nickname, address, achieved_at)| {
            let spot_index = usize::try_from(spot_index).ok()?;
            Some((
                spot_index,
                AchievementRecord {
                    spot_index,
                    achieved_by_user_id: user_id,
                    achieved_by_nickname: nickname,
                    address,
                    achieved_at,
                },
            ))
        })
        .collect()
}

fn write_error(e: sqlx_core::Error) -> WriteError {
    WriteError::Unreachable(e.to_string())
}

impl AchievementLedger for PgLedger {
    fn kind(&self) -> LedgerKind {
        LedgerKind::Remote
    }

    fn subscribe(&self) -> LedgerSubscription {
        self.hub.subscribe()
    }

    fn record(&self, draft: AchievementDraft) -> WriteFuture<'_> {
        Box::pin(async move {
            let spot_index = i64::try_from(draft.spot_index)
                .map_err(|_| WriteError::IndexOutOfRange(draft.spot_index))?;
            sqlx::query(
                "INSERT INTO achievements \
                 (spot_index, achieved, user_id, nickname, address, achieved_at) \
                 VALUES ($1, TRUE, $2, $3, $4, $5) \
                 ON CONFLICT (spot_index) DO UPDATE SET \
                 achieved = TRUE, user_id = EXCLUDED.user_id, nickname = EXCLUDED.nickname, \
                 address = EXCLUDED.address, achieved_at = EXCLUDED.achieved_at",
            )
            .bind(spot_index)
            .bind(draft.user_id)
            .bind(draft.nickname)
            .bind(draft.address)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(write_error)?;
            self.refresh.notify_one();
            Ok(())
        })
    }

    fn revoke(&self, spot_index: usize) -> WriteFuture<'_> {
        Box::pin(async move {
            let Ok(spot_index) = i64::try_from(spot_index) else {
                return Ok(());
            };
            let result = sqlx::query("DELETE FROM achievements WHERE spot_index = $1")
                .bind(spot_index)
                .execute(&self.pool)
                .await
                .map_err(write_error)?;
            if result.rows_affected() > 0 {
                self.refresh.notify_one();
            }
            Ok(())
        })
    }

    fn close(&self) {
        if let Some(poller) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            poller.abort();
            info!("remote achievement ledger poller stopped");
        }
    }
}

impl Drop for PgLedger {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use spotwalk_shared::AchievedSet;
    use sqlx::postgres::PgPoolOptions;

    use super::{PgLedger, records_from_rows};
    use crate::services::ledger::{AchievementDraft, AchievementLedger};

    #[test]
    fn rows_with_negative_index_or_cleared_flag_are_ignored() {
        let now = Utc::now();
        let rows = vec![
            (0, true, "u1".into(), "a".into(), "Spot A".into(), now),
            (-4, true, "u2".into(), "b".into(), "Spot B".into(), now),
            (7, false, "u3".into(), "c".into(), "Spot C".into(), now),
        ];
        let records = records_from_rows(rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[&0].achieved_by_nickname, "a");
    }

    #[tokio::test]
    async fn records_and_revokes_against_real_postgres() {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("Skipping real-Postgres ledger test: DATABASE_URL is not set");
            return;
        };

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&database_url)
            .await
            .expect("connect real postgres");
        let mut lock_conn = pool.acquire().await.expect("acquire lock connection");
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(51_007_002_i64)
            .execute(&mut *lock_conn)
            .await
            .expect("acquire ledger test db lock");
        crate::db_migrations::run(&pool)
            .await
            .expect("run migrations");
        sqlx::query("TRUNCATE TABLE achievements")
            .execute(&pool)
            .await
            .expect("truncate achievements");

        let ledger = PgLedger::start(pool.clone(), Duration::from_millis(50), 8)
            .await
            .expect("start ledger");
        let mut sub = ledger.subscribe();
        assert_eq!(sub.next().await.expect("initial").achieved(), AchievedSet::new());

        ledger
            .record(AchievementDraft {
                spot_index: 3,
                user_id: "u1".into(),
                nickname: "walker".into(),
                address: "Spot D".into(),
            })
            .await
            .expect("record");
        let after_record = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("change should be observed")
            .expect("subscription open");
        assert_eq!(after_record.achieved(), AchievedSet::from([3]));

        // Another session's write is discovered by polling.
        sqlx::query(
            "INSERT INTO achievements (spot_index, achieved, user_id, nickname, address, achieved_at) \
             VALUES (5, TRUE, 'u2', 'other', 'Spot F', now())",
        )
        .execute(&pool)
        .await
        .expect("foreign insert");
        let after_foreign = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("foreign change should be observed")
            .expect("subscription open");
        assert_eq!(after_foreign.achieved(), AchievedSet::from([3, 5]));

        ledger.revoke(42).await.expect("revoking nothing succeeds");
        ledger.revoke(3).await.expect("revoke");
        let after_revoke = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("revoke should be observed")
            .expect("subscription open");
        assert_eq!(after_revoke.achieved(), AchievedSet::from([5]));

        ledger.close();
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(51_007_002_i64)
            .execute(&mut *lock_conn)
            .await
            .expect("release ledger test db lock");
    }
}
