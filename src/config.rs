//! Core configuration.
//!
//! The original deployment declared its SP records in an
//! environment-variable driven metadata file; here they are explicit
//! typed entries handed over at construction time and validated when
//! the registry is built.

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::registry::{IdpEntity, SpEntity};

/// Configuration for the SP core.
///
/// Entity records feed the metadata registry; the remaining knobs tune
/// assertion validation and session lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// Registered service providers.
    #[serde(default)]
    pub service_providers: Vec<SpEntity>,

    /// Trusted identity providers.
    #[serde(default)]
    pub identity_providers: Vec<IdpEntity>,

    /// Clock skew tolerance in seconds for assertion validity windows.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// Accept assertions without an XML signature (NOT recommended for
    /// production).
    #[serde(default)]
    pub allow_unsigned_assertions: bool,

    /// Session TTL in seconds (default: 8 hours).
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// Session store path (redb database file).
    #[serde(default = "default_session_store_path")]
    pub session_store_path: String,

    /// Cleanup interval in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_clock_skew() -> i64 {
    300 // 5 minutes
}

fn default_session_ttl() -> u64 {
    8 * 60 * 60 // 8 hours
}

fn default_session_store_path() -> String {
    "/var/lib/saml-sp-core/sessions.redb".to_string()
}

fn default_cleanup_interval() -> u64 {
    300 // 5 minutes
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            service_providers: Vec::new(),
            identity_providers: Vec::new(),
            clock_skew_secs: default_clock_skew(),
            allow_unsigned_assertions: false,
            session_ttl_secs: default_session_ttl(),
            session_store_path: default_session_store_path(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl CoreConfig {
    /// Validate the runtime knobs. Entity records are validated when
    /// they are registered.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.clock_skew_secs < 0 {
            return Err(MetadataError::Invalid(
                "clock_skew_secs must not be negative".to_string(),
            ));
        }
        if self.session_ttl_secs == 0 {
            return Err(MetadataError::Invalid(
                "session_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.session_store_path.is_empty() {
            return Err(MetadataError::Invalid(
                "session_store_path is required".to_string(),
            ));
        }
        Ok(())
    }
}
