//! Task registry

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{DroverError, Result, TaskRecord, TaskState};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Storage for task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, record: TaskRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>>;

    /// Whether `id` was ever stored, including records since evicted
    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Replace an existing record; fails with `TaskNotFound` if absent
    async fn update(&self, record: TaskRecord) -> Result<()>;

    /// All records, oldest submission first
    async fn list(&self) -> Result<Vec<TaskRecord>>;

    async fn list_in_state(&self, state: TaskState) -> Result<Vec<TaskRecord>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|r| r.state == state)
            .collect())
    }
}

/// In-memory store; contents are lost on restart
///
/// With a terminal limit, the oldest finished records beyond it are dropped
/// and only their ids are kept.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<Inner>,
    terminal_limit: Option<usize>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, TaskRecord>,
    evicted: HashSet<String>,
}

impl Inner {
    fn prune(&mut self, limit: usize) {
        let mut finished: Vec<(DateTime<Utc>, String)> = self
            .records
            .values()
            .filter(|r| r.state.is_terminal())
            .map(|r| (r.updated_at, r.task.id.clone()))
            .collect();
        if finished.len() <= limit {
            return;
        }
        finished.sort();
        let excess = finished.len() - limit;
        for (_, id) in finished.into_iter().take(excess) {
            self.records.remove(&id);
            self.evicted.insert(id);
        }
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` completed or rejected records
    pub fn with_terminal_limit(limit: usize) -> Self {
        Self {
            terminal_limit: Some(limit),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        let id = &record.task.id;
        if inner.records.contains_key(id) || inner.evicted.contains(id) {
            return Err(DroverError::InvalidRequest(format!(
                "task {} already exists",
                id
            )));
        }
        inner.records.insert(id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.inner.read().await.records.get(id).cloned())
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.records.contains_key(id) || inner.evicted.contains(id))
    }

    async fn update(&self, record: TaskRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        let finished = record.state.is_terminal();
        match inner.records.get_mut(&record.task.id) {
            Some(existing) => *existing = record,
            None => return Err(DroverError::TaskNotFound(record.task.id)),
        }
        if let (true, Some(limit)) = (finished, self.terminal_limit) {
            inner.prune(limit);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> =
            self.inner.read().await.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.task.id.cmp(&b.task.id))
        });
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::Task;

    #[tokio::test]
    async fn test_insert_get_update() {
        let store = InMemoryTaskStore::new();
        let record = TaskRecord::new(Task::new("Fix login"), TaskState::PendingApproval);
        let id = record.task.id.clone();
        store.insert(record.clone()).await.unwrap();

        assert!(store.insert(record).await.is_err());

        let mut fetched = store.get(&id).await.unwrap().unwrap();
        assert_eq!(fetched.state, TaskState::PendingApproval);

        fetched.set_state(TaskState::Active);
        store.update(fetched).await.unwrap();
        assert_eq!(
            store.list_in_state(TaskState::Active).await.unwrap().len(),
            1
        );
        assert!(store
            .list_in_state(TaskState::PendingApproval)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_task() {
        let store = InMemoryTaskStore::new();
        let record = TaskRecord::new(Task::new("Ghost"), TaskState::Active);
        let err = store.update(record).await.unwrap_err();
        assert!(matches!(err, DroverError::TaskNotFound(_)));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_terminal_records_pruned_beyond_limit() {
        let store = InMemoryTaskStore::with_terminal_limit(2);
        let mut ids = Vec::new();
        for title in ["a", "b", "c"] {
            let record = TaskRecord::new(Task::new(title), TaskState::Active);
            ids.push(record.task.id.clone());
            store.insert(record).await.unwrap();
        }
        let waiting = TaskRecord::new(Task::new("waiting"), TaskState::PendingApproval);
        let waiting_id = waiting.task.id.clone();
        store.insert(waiting).await.unwrap();

        for (i, id) in ids.iter().enumerate() {
            let mut record = store.get(id).await.unwrap().unwrap();
            record.set_state(if i == 1 {
                TaskState::Rejected
            } else {
                TaskState::Completed
            });
            store.update(record).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        // The first to finish is gone, its id is still known
        assert!(store.get(&ids[0]).await.unwrap().is_none());
        assert!(store.contains(&ids[0]).await.unwrap());
        assert!(store.get(&ids[1]).await.unwrap().is_some());
        assert!(store.get(&ids[2]).await.unwrap().is_some());
        assert!(store.get(&waiting_id).await.unwrap().is_some());
        assert_eq!(store.list().await.unwrap().len(), 3);

        let mut again = TaskRecord::new(Task::new("a"), TaskState::Active);
        again.task.id = ids[0].clone();
        assert!(store.insert(again).await.is_err());
    }

    #[tokio::test]
    async fn test_unlimited_store_keeps_everything() {
        let store = InMemoryTaskStore::new();
        for title in ["a", "b", "c"] {
            let mut record = TaskRecord::new(Task::new(title), TaskState::Completed);
            record.set_state(TaskState::Completed);
            store.insert(record.clone()).await.unwrap();
            store.update(record).await.unwrap();
        }
        assert_eq!(store.list().await.unwrap().len(), 3);
    }
}
