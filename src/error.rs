//! Error taxonomy for the SP core.
//!
//! Metadata problems are load-time and fatal; validation failures are
//! per-request and recoverable, surfaced to the caller as an
//! authentication failure. Error messages carry issuer / assertion-ID /
//! failed-check context for audit logging but never raw certificate or
//! key material.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors raised while building the metadata registry.
///
/// These abort startup: a deployment with broken metadata must not
/// serve requests.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// An entity with this ID is already registered. The registry keeps
    /// the first record.
    #[error("duplicate entity ID: {0}")]
    DuplicateEntity(String),

    /// A required field is missing or empty.
    #[error("invalid metadata: {0}")]
    Invalid(String),
}

/// Per-request authentication failures.
///
/// Never retried automatically; a forged or expired assertion retried
/// is still invalid. The caller restarts the SAML flow to obtain a
/// fresh assertion.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed SAML response: {0}")]
    MalformedResponse(String),

    /// The IdP reported a non-success status code.
    #[error("IdP rejected the authentication: {0}")]
    RejectedStatus(String),

    /// The assertion issuer has no registered `IdpEntity`.
    #[error("unknown issuer: {0}")]
    UnknownIssuer(String),

    /// No registered SP matches the request context.
    #[error("no service provider registered for {0}")]
    UnknownServiceProvider(String),

    #[error("signature validation failed for issuer {issuer}: {reason}")]
    SignatureInvalid { issuer: String, reason: String },

    #[error("assertion {assertion_id} expired at {not_on_or_after}")]
    AssertionExpired {
        assertion_id: String,
        not_on_or_after: DateTime<Utc>,
    },

    #[error("assertion {assertion_id} not valid before {not_before}")]
    AssertionNotYetValid {
        assertion_id: String,
        not_before: DateTime<Utc>,
    },

    #[error("assertion {assertion_id} audience mismatch: expected {expected}, got [{actual}]")]
    AudienceMismatch {
        assertion_id: String,
        expected: String,
        actual: String,
    },

    #[error("assertion {assertion_id} was already presented")]
    ReplayDetected { assertion_id: String },

    /// Neither the configured NameID attribute nor the subject NameID
    /// carried a usable identity.
    #[error("assertion carries neither the {attribute:?} attribute nor a subject NameID")]
    MissingIdentityAttribute { attribute: String },

    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Session / replay store faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Single Logout outcomes.
#[derive(Debug, Error)]
pub enum LogoutError {
    /// No session carries the given index. Informational: the sessions
    /// are already gone, so logout is effectively complete.
    #[error("no active session for index {session_index}")]
    NoActiveSession { session_index: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Construction-time failures of the assembled provider.
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = AuthError::AudienceMismatch {
            assertion_id: "_a1".to_string(),
            expected: "sp1".to_string(),
            actual: "sp2".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("_a1"));
        assert!(msg.contains("sp1"));
        assert!(msg.contains("sp2"));
    }

    #[test]
    fn signature_error_does_not_echo_key_material() {
        let err = AuthError::SignatureInvalid {
            issuer: "https://idp.example.com".to_string(),
            reason: "digest mismatch".to_string(),
        };
        assert!(!err.to_string().contains("BEGIN"));
    }

    #[test]
    fn store_error_converts_into_auth_error() {
        let err: AuthError = StoreError::Storage("disk full".to_string()).into();
        assert!(matches!(err, AuthError::Store(_)));
    }
}
