//! Usage accounting: SQLite store + best-effort recording queue.
//!
//! All database access goes through a single `tokio_rusqlite::Connection`,
//! which serializes calls on one background thread. Recording from the
//! query pipeline is fire-and-forget: events go into a bounded queue
//! drained by a background task, and a full queue or a failed insert is
//! logged, never surfaced to the originating request.

use std::path::Path;

use chrono::Utc;
use rusqlite::params;
use tokio::sync::mpsc;

use crate::{domain::Tier, errors::Error, Result};

/// One recorded search, write-only from the pipeline's perspective.
#[derive(Clone, Debug)]
pub struct UsageEvent {
    pub user_id: i64,
    pub query: String,
    pub tier: Tier,
    pub result_count: usize,
}

/// Read-path aggregate for the `/mystats` command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub total: u64,
    pub free_count: u64,
    pub paid_count: u64,
}

#[derive(Clone)]
pub struct UsageStore {
    conn: tokio_rusqlite::Connection,
}

impl UsageStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS searches (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        user_id INTEGER NOT NULL,
                        query TEXT NOT NULL,
                        tier TEXT NOT NULL,
                        result_count INTEGER NOT NULL,
                        recorded_at TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_searches_user ON searches (user_id);",
                )?;
                Ok(())
            })
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    pub async fn record(&self, event: UsageEvent) -> Result<()> {
        let recorded_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO searches (user_id, query, tier, result_count, recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        event.user_id,
                        event.query,
                        event.tier.label(),
                        event.result_count as i64,
                        recorded_at,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }

    pub async fn stats_for(&self, user_id: i64) -> Result<UsageStats> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT COUNT(*),
                            COUNT(CASE WHEN tier = 'free' THEN 1 END),
                            COUNT(CASE WHEN tier = 'paid' THEN 1 END)
                     FROM searches WHERE user_id = ?1",
                )?;
                let stats = stmt.query_row(params![user_id], |row| {
                    Ok(UsageStats {
                        total: row.get::<_, i64>(0)? as u64,
                        free_count: row.get::<_, i64>(1)? as u64,
                        paid_count: row.get::<_, i64>(2)? as u64,
                    })
                })?;
                Ok(stats)
            })
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }
}

/// Fire-and-forget handle to the recording worker.
///
/// `record` never blocks and never fails the caller: a full queue drops the
/// event with a log line.
#[derive(Clone)]
pub struct UsageRecorder {
    tx: mpsc::Sender<UsageEvent>,
}

impl UsageRecorder {
    /// Spawn the drain task on the current runtime.
    pub fn spawn(store: UsageStore, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<UsageEvent>(queue_depth);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = store.record(event).await {
                    eprintln!("[USAGE] failed to record search: {e}");
                }
            }
        });

        Self { tx }
    }

    pub fn record(&self, event: UsageEvent) {
        if self.tx.try_send(event).is_err() {
            eprintln!("[USAGE] queue full, dropping usage event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user_id: i64, tier: Tier) -> UsageEvent {
        UsageEvent {
            user_id,
            query: "example.com".to_string(),
            tier,
            result_count: 3,
        }
    }

    #[tokio::test]
    async fn stats_split_by_tier() {
        let store = UsageStore::open_in_memory().await.unwrap();

        store.record(event(1, Tier::Free)).await.unwrap();
        store.record(event(1, Tier::Free)).await.unwrap();
        store.record(event(1, Tier::Paid)).await.unwrap();
        store.record(event(2, Tier::Paid)).await.unwrap();

        let stats = store.stats_for(1).await.unwrap();
        assert_eq!(
            stats,
            UsageStats {
                total: 3,
                free_count: 2,
                paid_count: 1
            }
        );
    }

    #[tokio::test]
    async fn unknown_user_has_zero_stats() {
        let store = UsageStore::open_in_memory().await.unwrap();
        assert_eq!(store.stats_for(99).await.unwrap(), UsageStats::default());
    }

    #[tokio::test]
    async fn recorder_drains_events_in_the_background() {
        let store = UsageStore::open_in_memory().await.unwrap();
        let recorder = UsageRecorder::spawn(store.clone(), 8);

        recorder.record(event(5, Tier::Free));

        // The drain task is asynchronous; poll briefly.
        for _ in 0..50 {
            if store.stats_for(5).await.unwrap().total == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("usage event was not drained");
    }
}
