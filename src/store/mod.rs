//! Transactional persistence over work items.
//!
//! [`WorkStore`] is the only coordination medium between workers. Every
//! mutation happens inside a [`WorkTx`]: rows returned by
//! [`WorkTx::lock_rows`] stay exclusively locked until the transaction
//! commits or is dropped. Dropping a transaction without committing rolls
//! back everything it did.
//!
//! Two implementations ship with the crate: [`Db`](crate::db::Db) over
//! Postgres and [`MemoryStore`] for tests and single-process embedding.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::work::{NewWorkItem, ResourceId, Step, WorkFilter, WorkId, WorkItem};

/// A store of work items supporting transactions with pessimistic locks.
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn WorkTx + '_>>;

    /// Insert a new scheduled, unowned item.
    async fn create(&self, new: NewWorkItem) -> Result<WorkItem>;

    /// Plain lookup by id. Includes soft-removed rows.
    async fn find_by_id(&self, id: WorkId) -> Result<Option<WorkItem>>;

    /// Plain filtered read, oldest first.
    async fn list(&self, filter: &WorkFilter, limit: Option<i64>) -> Result<Vec<WorkItem>>;

    async fn find_one(&self, filter: &WorkFilter) -> Result<Option<WorkItem>> {
        Ok(self.list(filter, Some(1)).await?.into_iter().next())
    }

    /// Oldest item for a resource that has (or has not) been claimed,
    /// including removed history.
    async fn find_by_resource(&self, resource: ResourceId, taken: bool) -> Result<Option<WorkItem>> {
        self.find_one(
            &WorkFilter::for_resource(resource)
                .taken(taken)
                .including_removed(),
        )
        .await
    }

    /// Oldest item for a resource in the given step, including removed history.
    async fn find_by_resource_step(
        &self,
        resource: ResourceId,
        step: Step,
    ) -> Result<Option<WorkItem>> {
        self.find_one(
            &WorkFilter::for_resource(resource)
                .step(step)
                .including_removed(),
        )
        .await
    }

    /// Soft-delete an item.
    ///
    /// Returns `false` if the item does not exist or is already removed.
    /// A processing item cannot be removed.
    async fn remove(&self, id: WorkId) -> Result<bool> {
        let mut tx = self.begin().await?;
        let rows = tx
            .lock_rows(&WorkFilter::by_id(id).including_removed(), Some(1))
            .await?;
        let Some(mut work) = rows.into_iter().next() else {
            tx.commit().await?;
            return Ok(false);
        };
        if work.is_removed() {
            tx.commit().await?;
            return Ok(false);
        }
        if work.step == Step::Processing {
            return Err(Error::Busy(format!(
                "work item {id} is processing and cannot be removed"
            )));
        }
        work.removed = Some(Utc::now());
        tx.update(&work).await?;
        tx.commit().await?;
        debug!(id = %id, resource = %work.resource_id, "work item removed");
        Ok(true)
    }
}

/// An open transaction against a [`WorkStore`].
#[async_trait]
pub trait WorkTx: Send {
    /// Read rows matching `filter`, oldest first, and lock them exclusively
    /// until this transaction ends.
    async fn lock_rows(&mut self, filter: &WorkFilter, limit: Option<i64>)
    -> Result<Vec<WorkItem>>;

    /// Read rows matching `filter` without locking them.
    async fn find(&mut self, filter: &WorkFilter, limit: Option<i64>) -> Result<Vec<WorkItem>>;

    /// Persist the mutable fields of `item` (step, owner, taken_at, removed).
    async fn update(&mut self, item: &WorkItem) -> Result<()>;

    /// Hard-delete every row matching `filter`. Returns the number deleted.
    async fn expunge(&mut self, filter: &WorkFilter) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
