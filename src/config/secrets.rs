//! Secret handling utilities.
//!
//! Re-exports the secrecy types callers need to read the database URL.

pub use secrecy::{ExposeSecret, SecretString};
