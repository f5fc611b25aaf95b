//! Session management.
//!
//! Persistent session storage backed by redb with in-memory caching,
//! session issuance, and background cleanup.

pub mod cleanup;
pub mod issuer;
pub mod store;
pub mod types;

pub use cleanup::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use issuer::SessionIssuer;
pub use store::SessionStore;
pub use types::{Session, SessionId};
