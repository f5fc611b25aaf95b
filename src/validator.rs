//! Assertion validation.
//!
//! Runs the trust checks over an inbound SAML Response: known issuer,
//! signature, validity window, audience, replay. Checks short-circuit
//! on the first violation.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::assertion::Assertion;
use crate::config::CoreConfig;
use crate::error::AuthError;
use crate::registry::{MetadataRegistry, SpEntity};
use crate::replay::ReplayCache;
use crate::signature;

/// Validates inbound assertions against registered metadata.
pub struct AssertionValidator {
    registry: Arc<MetadataRegistry>,
    replay: ReplayCache,
    clock_skew: Duration,
    allow_unsigned: bool,
}

impl AssertionValidator {
    pub fn new(registry: Arc<MetadataRegistry>, replay: ReplayCache, config: &CoreConfig) -> Self {
        Self {
            registry,
            replay,
            clock_skew: Duration::seconds(config.clock_skew_secs),
            allow_unsigned: config.allow_unsigned_assertions,
        }
    }

    /// Validate a decoded SAML Response addressed to `sp`.
    ///
    /// On success the assertion ID has been recorded in the replay
    /// cache, expiring with the assertion's validity window.
    pub fn validate(&self, raw: &[u8], sp: &SpEntity) -> Result<Assertion, AuthError> {
        let xml = std::str::from_utf8(raw)
            .map_err(|_| AuthError::MalformedResponse("response is not valid UTF-8".to_string()))?;

        let assertion = Assertion::from_response_xml(xml)?;

        let idp = self
            .registry
            .lookup_idp(&assertion.issuer)
            .ok_or_else(|| AuthError::UnknownIssuer(assertion.issuer.clone()))?;

        if signature::has_signature(xml) {
            signature::verify_enveloped(xml, &idp.certificates, &assertion.issuer)?;
        } else if !self.allow_unsigned {
            return Err(AuthError::SignatureInvalid {
                issuer: assertion.issuer.clone(),
                reason: "assertion is not signed".to_string(),
            });
        }

        self.check_validity_window(&assertion)?;
        self.check_audience(&assertion, sp)?;

        // Replay check last: the ID is only recorded for assertions
        // that passed everything else.
        let replay_expiry = assertion
            .not_on_or_after
            .unwrap_or_else(|| Utc::now() + self.clock_skew + Duration::minutes(5));
        if !self.replay.check_and_mark(&assertion.id, replay_expiry)? {
            warn!(
                assertion_id = %assertion.id,
                issuer = %assertion.issuer,
                "Assertion replay detected"
            );
            return Err(AuthError::ReplayDetected {
                assertion_id: assertion.id.clone(),
            });
        }

        debug!(
            assertion_id = %assertion.id,
            issuer = %assertion.issuer,
            attributes = assertion.attributes.len(),
            "Assertion validated"
        );
        Ok(assertion)
    }

    fn check_validity_window(&self, assertion: &Assertion) -> Result<(), AuthError> {
        let now = Utc::now();

        if let Some(not_before) = assertion.not_before {
            if now < not_before - self.clock_skew {
                return Err(AuthError::AssertionNotYetValid {
                    assertion_id: assertion.id.clone(),
                    not_before,
                });
            }
        }
        if let Some(not_on_or_after) = assertion.not_on_or_after {
            if now >= not_on_or_after + self.clock_skew {
                return Err(AuthError::AssertionExpired {
                    assertion_id: assertion.id.clone(),
                    not_on_or_after,
                });
            }
        }
        Ok(())
    }

    fn check_audience(&self, assertion: &Assertion, sp: &SpEntity) -> Result<(), AuthError> {
        if assertion.audiences.iter().any(|a| a == &sp.entity_id) {
            return Ok(());
        }
        Err(AuthError::AudienceMismatch {
            assertion_id: assertion.id.clone(),
            expected: sp.entity_id.clone(),
            actual: assertion.audiences.join(", "),
        })
    }
}
