//! Work item types: identity, lifecycle step, query filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work tracked by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier.
    pub id: WorkId,

    /// The resource this work pertains to (e.g. a VM). Many items may share
    /// a resource; only one of them may be processing at a time.
    pub resource_id: ResourceId,

    /// Caller-assigned ordering token, scoped to `resource_id`.
    pub sequence_number: i64,

    /// Current lifecycle step.
    pub step: Step,

    /// Worker holding the item. Set once by a claim, never cleared.
    pub owner_id: Option<OwnerId>,

    /// When the item was claimed. Set together with `owner_id`.
    pub taken_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    /// Soft-delete marker. A removed item is logically gone but still
    /// visible to history-aware reads.
    pub removed: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// Take ownership of a scheduled item: `Scheduled -> Processing`.
    pub fn claim(&mut self, owner: OwnerId, now: DateTime<Utc>) -> Result<()> {
        if self.owner_id.is_some() || self.taken_at.is_some() {
            return Err(Error::Busy(format!(
                "work item {} already taken by {}",
                self.id,
                self.owner_id.as_ref().map(|o| o.as_str()).unwrap_or("-")
            )));
        }
        validate_transition(self.step, Step::Processing)?;
        self.owner_id = Some(owner);
        self.taken_at = Some(now);
        self.step = Step::Processing;
        Ok(())
    }

    /// Move to `to`, returning the step the item was in.
    pub fn advance(&mut self, to: Step) -> Result<Step> {
        validate_transition(self.step, to)?;
        let from = self.step;
        self.step = to;
        Ok(from)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.is_some()
    }
}

/// Validate a step transition, returning an error if disallowed.
pub(crate) fn validate_transition(from: Step, to: Step) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of the resource a work item pertains to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub i64);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Lifecycle step of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Waiting for a worker.
    Scheduled,
    /// Claimed by a worker.
    Processing,
    /// Finished successfully. Terminal.
    Done,
    /// Failed, or abandoned and recovered by the reaper. Terminal.
    Error,
}

impl Step {
    /// Can transition from self to `to`? Steps only move forward.
    ///
    /// Unclaimed work may be cancelled straight to `Error`, but only claimed
    /// work can finish `Done`: every `done` row carries the `taken_at` that
    /// retention is measured from.
    pub fn can_transition_to(self, to: Step) -> bool {
        use Step::*;
        matches!(
            (self, to),
            (Scheduled, Processing) | (Scheduled, Error) | (Processing, Done) | (Processing, Error)
        )
    }

    /// Is this a terminal step?
    pub fn is_terminal(self) -> bool {
        matches!(self, Step::Done | Step::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Scheduled => "scheduled",
            Step::Processing => "processing",
            Step::Done => "done",
            Step::Error => "error",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Step {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(Step::Scheduled),
            "processing" => Ok(Step::Processing),
            "done" => Ok(Step::Done),
            "error" => Ok(Step::Error),
            other => Err(Error::Other(format!("unknown step: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Predicate over work items. Every store query is expressed as a filter.
///
/// Empty fields match anything. Soft-removed rows are excluded unless
/// [`WorkFilter::including_removed`] is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkFilter {
    pub id: Option<WorkId>,
    pub resource_id: Option<ResourceId>,
    pub sequence_number: Option<i64>,
    /// Step must be one of these. Empty means any step.
    pub steps: Vec<Step>,
    /// `Some(false)`: never claimed. `Some(true)`: claimed at some point.
    pub taken: Option<bool>,
    /// `taken_at <= cutoff`. Unclaimed rows never match.
    pub taken_before: Option<DateTime<Utc>>,
    pub include_removed: bool,
}

impl WorkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unowned scheduled items: what a worker may claim.
    pub fn claimable() -> Self {
        Self::new().step(Step::Scheduled).taken(false)
    }

    pub fn by_id(id: WorkId) -> Self {
        Self::new().id(id)
    }

    pub fn for_resource(resource: ResourceId) -> Self {
        Self::new().resource(resource)
    }

    pub fn id(mut self, id: WorkId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn resource(mut self, resource: ResourceId) -> Self {
        self.resource_id = Some(resource);
        self
    }

    pub fn sequence(mut self, sequence_number: i64) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        if !self.steps.contains(&step) {
            self.steps.push(step);
        }
        self
    }

    pub fn taken(mut self, taken: bool) -> Self {
        self.taken = Some(taken);
        self
    }

    pub fn taken_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.taken_before = Some(cutoff);
        self
    }

    pub fn including_removed(mut self) -> Self {
        self.include_removed = true;
        self
    }

    /// Evaluate the filter against an item in memory.
    pub fn matches(&self, item: &WorkItem) -> bool {
        if !self.include_removed && item.removed.is_some() {
            return false;
        }
        if self.id.is_some_and(|id| id != item.id) {
            return false;
        }
        if self.resource_id.is_some_and(|r| r != item.resource_id) {
            return false;
        }
        if self
            .sequence_number
            .is_some_and(|seq| seq != item.sequence_number)
        {
            return false;
        }
        if !self.steps.is_empty() && !self.steps.contains(&item.step) {
            return false;
        }
        match self.taken {
            Some(true) if item.taken_at.is_none() => return false,
            Some(false) if item.owner_id.is_some() || item.taken_at.is_some() => return false,
            _ => {}
        }
        if let Some(cutoff) = self.taken_before {
            match item.taken_at {
                Some(taken_at) if taken_at <= cutoff => {}
                _ => return false,
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for new work items. Producers hand this to
/// [`WorkStore::create`](crate::store::WorkStore::create).
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub(crate) resource_id: ResourceId,
    pub(crate) sequence_number: i64,
}

impl NewWorkItem {
    pub fn new(resource_id: ResourceId, sequence_number: i64) -> Self {
        Self {
            resource_id,
            sequence_number,
        }
    }

    /// Materialize a scheduled, unowned item.
    pub(crate) fn into_item(self, now: DateTime<Utc>) -> WorkItem {
        WorkItem {
            id: WorkId::new(),
            resource_id: self.resource_id,
            sequence_number: self.sequence_number,
            step: Step::Scheduled,
            owner_id: None,
            taken_at: None,
            created_at: now,
            removed: None,
        }
    }
}
