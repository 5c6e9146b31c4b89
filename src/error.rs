//! Error types for workclaim.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("invalid step transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("advance target must be done or error, got {0}")]
    NonTerminalTarget(String),

    #[error("work item busy: {0}")]
    Busy(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
