use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use zone_common::{HistoryConfig, SyncSession, SyncStatus};

use crate::store::KeyValueStore;

/// Newest-first log of save attempts, persisted as one JSON blob.
pub struct HistoryLog {
    store: Arc<dyn KeyValueStore>,
    key: String,
    capacity: usize,
    lock: Mutex<()>,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &HistoryConfig) -> Self {
        Self {
            store,
            key: config.store_key.clone(),
            capacity: config.capacity.max(1),
            lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, session: SyncSession) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        entries.insert(0, session);
        entries.truncate(self.capacity);
        self.write(&entries).await
    }

    /// Returns `false` when no entry has that `started_at`.
    pub async fn update_status(&self, started_at: i64, status: SyncStatus) -> anyhow::Result<bool> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        let Some(entry) = entries
            .iter_mut()
            .find(|entry| entry.started_at == started_at)
        else {
            debug!("history has no session started at {started_at}");
            return Ok(false);
        };
        entry.status = status;
        self.write(&entries).await?;
        Ok(true)
    }

    pub async fn entries(&self) -> anyhow::Result<Vec<SyncSession>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn read(&self) -> anyhow::Result<Vec<SyncSession>> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<SyncSession>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(err) => {
                warn!("discarding unreadable sync history: {err}");
                Ok(Vec::new())
            }
        }
    }

    async fn write(&self, entries: &[SyncSession]) -> anyhow::Result<()> {
        let payload = serde_json::to_string(entries)?;
        self.store.set(&self.key, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use zone_common::{ConfigKind, FieldChange};

    use crate::store::MemoryStore;

    fn session(started_at: i64) -> SyncSession {
        SyncSession::pending(
            ConfigKind::Setpoints,
            started_at,
            &[FieldChange {
                key: "ecSetpoint".to_string(),
                old: 0.8,
                new: 0.95,
            }],
        )
    }

    fn log(store: Arc<MemoryStore>, capacity: usize) -> HistoryLog {
        HistoryLog::new(
            store,
            &HistoryConfig {
                capacity,
                ..HistoryConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn append_is_newest_first_and_capped() {
        let history = log(Arc::new(MemoryStore::default()), 3);
        for started_at in 1..=5 {
            history.append(session(started_at)).await.unwrap();
        }

        let started: Vec<i64> = history
            .entries()
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.started_at)
            .collect();
        assert_eq!(started, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn update_status_in_place() {
        let history = log(Arc::new(MemoryStore::default()), 100);
        history.append(session(10)).await.unwrap();
        history.append(session(11)).await.unwrap();

        assert!(history.update_status(10, SyncStatus::Confirmed).await.unwrap());
        assert!(!history.update_status(99, SyncStatus::Failed).await.unwrap());

        let entries = history.entries().await.unwrap();
        assert_eq!(entries[0].status, SyncStatus::Pending);
        assert_eq!(entries[1].status, SyncStatus::Confirmed);
    }

    #[tokio::test]
    async fn corrupt_blob_is_replaced() {
        let store = Arc::new(MemoryStore::default());
        store.set("sync_history", "{not json").await.unwrap();
        let history = log(store.clone(), 100);

        assert!(history.entries().await.unwrap().is_empty());
        history.append(session(1)).await.unwrap();

        let raw = store.get("sync_history").await.unwrap().unwrap();
        let parsed: Vec<SyncSession> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_are_serialized() {
        let history = Arc::new(log(Arc::new(MemoryStore::default()), 100));
        let tasks: Vec<_> = (1..=20)
            .map(|started_at| {
                let history = history.clone();
                tokio::spawn(async move { history.append(session(started_at)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(history.entries().await.unwrap().len(), 20);
    }
}
