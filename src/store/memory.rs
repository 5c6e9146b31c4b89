//! In-memory work store.
//!
//! A transaction owns the table mutex for its whole lifetime, so it holds
//! an exclusive lock over every row, not only the ones it read. Changes are
//! made to a staged copy that replaces the table on commit; dropping the
//! transaction discards them.
//!
//! Plain reads on [`MemoryStore`] wait for any open transaction. Do not call
//! them while holding a transaction from the same store.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{WorkStore, WorkTx};
use crate::error::{Error, Result};
use crate::model::work::{NewWorkItem, WorkFilter, WorkId, WorkItem};
use crate::telemetry::metrics;

/// Work items held in process memory, in creation order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Arc<Mutex<Vec<WorkItem>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, removed ones included.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

fn select(rows: &[WorkItem], filter: &WorkFilter, limit: Option<i64>) -> Vec<WorkItem> {
    let limit = limit.map_or(usize::MAX, |n| n.max(0) as usize);
    rows.iter()
        .filter(|w| filter.matches(w))
        .take(limit)
        .cloned()
        .collect()
}

#[async_trait]
impl WorkStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn WorkTx + '_>> {
        let table = Arc::clone(&self.rows).lock_owned().await;
        let staged = table.clone();
        Ok(Box::new(MemoryTx { table, staged }))
    }

    async fn create(&self, new: NewWorkItem) -> Result<WorkItem> {
        let item = new.into_item(Utc::now());
        self.rows.lock().await.push(item.clone());
        metrics::work_created().add(1, &[]);
        Ok(item)
    }

    async fn find_by_id(&self, id: WorkId) -> Result<Option<WorkItem>> {
        Ok(self.rows.lock().await.iter().find(|w| w.id == id).cloned())
    }

    async fn list(&self, filter: &WorkFilter, limit: Option<i64>) -> Result<Vec<WorkItem>> {
        Ok(select(&self.rows.lock().await, filter, limit))
    }
}

/// Transaction over a [`MemoryStore`].
pub struct MemoryTx {
    table: OwnedMutexGuard<Vec<WorkItem>>,
    staged: Vec<WorkItem>,
}

#[async_trait]
impl WorkTx for MemoryTx {
    async fn lock_rows(
        &mut self,
        filter: &WorkFilter,
        limit: Option<i64>,
    ) -> Result<Vec<WorkItem>> {
        Ok(select(&self.staged, filter, limit))
    }

    async fn find(&mut self, filter: &WorkFilter, limit: Option<i64>) -> Result<Vec<WorkItem>> {
        Ok(select(&self.staged, filter, limit))
    }

    async fn update(&mut self, item: &WorkItem) -> Result<()> {
        let row = self
            .staged
            .iter_mut()
            .find(|w| w.id == item.id)
            .ok_or_else(|| Error::NotFound(format!("work item {}", item.id)))?;
        row.step = item.step;
        row.owner_id = item.owner_id.clone();
        row.taken_at = item.taken_at;
        row.removed = item.removed;
        Ok(())
    }

    async fn expunge(&mut self, filter: &WorkFilter) -> Result<u64> {
        let before = self.staged.len();
        self.staged.retain(|w| !filter.matches(w));
        Ok((before - self.staged.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut table, staged } = *self;
        *table = staged;
        Ok(())
    }
}
