//! Work item persistence on Postgres: filtered reads, `FOR UPDATE` locking,
//! updates and expunge.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::work::*;
use crate::store::{WorkStore, WorkTx};
use crate::telemetry::metrics;

const COLUMNS: &str =
    "id, resource_id, sequence_number, step, owner_id, taken_at, created_at, removed";

/// Append a WHERE clause for `filter`.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &WorkFilter) {
    qb.push(" WHERE TRUE");
    if !filter.include_removed {
        qb.push(" AND removed IS NULL");
    }
    if let Some(id) = filter.id {
        qb.push(" AND id = ").push_bind(id.0);
    }
    if let Some(resource) = filter.resource_id {
        qb.push(" AND resource_id = ").push_bind(resource.0);
    }
    if let Some(seq) = filter.sequence_number {
        qb.push(" AND sequence_number = ").push_bind(seq);
    }
    if !filter.steps.is_empty() {
        let steps: Vec<String> = filter.steps.iter().map(|s| s.to_string()).collect();
        qb.push(" AND step = ANY(").push_bind(steps).push(")");
    }
    if let Some(taken) = filter.taken {
        if taken {
            qb.push(" AND taken_at IS NOT NULL");
        } else {
            qb.push(" AND owner_id IS NULL AND taken_at IS NULL");
        }
    }
    if let Some(cutoff) = filter.taken_before {
        qb.push(" AND taken_at <= ").push_bind(cutoff);
    }
}

/// Build an oldest-first SELECT, optionally locking the returned rows.
fn select(filter: &WorkFilter, limit: Option<i64>, for_update: bool) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM work_items"));
    push_filter(&mut qb, filter);
    qb.push(" ORDER BY created_at, id");
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(limit.max(0));
    }
    if for_update {
        qb.push(" FOR UPDATE");
    }
    qb
}

fn into_items(rows: Vec<WorkItemRow>) -> Result<Vec<WorkItem>> {
    rows.into_iter()
        .map(WorkItemRow::try_into_work_item)
        .collect()
}

#[async_trait]
impl WorkStore for super::Db {
    async fn begin(&self) -> Result<Box<dyn WorkTx + '_>> {
        let tx = self.pool().begin().await?;
        Ok(Box::new(PgWorkTx { tx }))
    }

    async fn create(&self, new: NewWorkItem) -> Result<WorkItem> {
        let item = new.into_item(Utc::now());
        sqlx::query(
            "INSERT INTO work_items (id, resource_id, sequence_number, step, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(item.id.0)
        .bind(item.resource_id.0)
        .bind(item.sequence_number)
        .bind(item.step.as_str())
        .bind(item.created_at)
        .execute(self.pool())
        .await?;

        metrics::work_created().add(1, &[]);
        Ok(item)
    }

    async fn find_by_id(&self, id: WorkId) -> Result<Option<WorkItem>> {
        let row: Option<WorkItemRow> =
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM work_items WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        row.map(WorkItemRow::try_into_work_item).transpose()
    }

    async fn list(&self, filter: &WorkFilter, limit: Option<i64>) -> Result<Vec<WorkItem>> {
        let mut qb = select(filter, limit, false);
        let rows: Vec<WorkItemRow> = qb.build_query_as().fetch_all(self.pool()).await?;
        into_items(rows)
    }
}

/// A Postgres transaction. Rolls back on drop unless committed.
pub struct PgWorkTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl WorkTx for PgWorkTx {
    async fn lock_rows(
        &mut self,
        filter: &WorkFilter,
        limit: Option<i64>,
    ) -> Result<Vec<WorkItem>> {
        let mut qb = select(filter, limit, true);
        let rows: Vec<WorkItemRow> = qb.build_query_as().fetch_all(&mut *self.tx).await?;
        into_items(rows)
    }

    async fn find(&mut self, filter: &WorkFilter, limit: Option<i64>) -> Result<Vec<WorkItem>> {
        let mut qb = select(filter, limit, false);
        let rows: Vec<WorkItemRow> = qb.build_query_as().fetch_all(&mut *self.tx).await?;
        into_items(rows)
    }

    async fn update(&mut self, item: &WorkItem) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE work_items SET step = $1, owner_id = $2, taken_at = $3, removed = $4
             WHERE id = $5",
        )
        .bind(item.step.as_str())
        .bind(item.owner_id.as_ref().map(|o| o.0.clone()))
        .bind(item.taken_at)
        .bind(item.removed)
        .bind(item.id.0)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("work item {}", item.id)));
        }
        Ok(())
    }

    async fn expunge(&mut self, filter: &WorkFilter) -> Result<u64> {
        let mut qb = QueryBuilder::new("DELETE FROM work_items");
        push_filter(&mut qb, filter);
        let deleted = qb.build().execute(&mut *self.tx).await?.rows_affected();
        Ok(deleted)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgWorkTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    resource_id: i64,
    sequence_number: i64,
    step: String,
    owner_id: Option<String>,
    taken_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    removed: Option<DateTime<Utc>>,
}

impl WorkItemRow {
    fn try_into_work_item(self) -> Result<WorkItem> {
        Ok(WorkItem {
            id: WorkId(self.id),
            resource_id: ResourceId(self.resource_id),
            sequence_number: self.sequence_number,
            step: self.step.parse()?,
            owner_id: self.owner_id.map(OwnerId),
            taken_at: self.taken_at,
            created_at: self.created_at,
            removed: self.removed,
        })
    }
}
