//! # workclaim
//!
//! A persisted work-claim queue. Independent worker processes claim
//! per-resource work items through a shared transactional store, with at
//! most one item per resource in processing at any time.
//!
//! Provides the store abstraction with Postgres (sqlx) and in-memory
//! backends, the claim / step / reaper engine, and OpenTelemetry
//! observability.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod telemetry;
