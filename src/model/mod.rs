//! Core data model.
//!
//! A work item is a pending or finished unit of asynchronous work tied to a
//! resource. At most one item per resource may be processing at a time.

pub mod work;
