//! Top-level Service Provider core.
//!
//! Wires the metadata registry, assertion validator, identity resolver,
//! and session issuer into the three entry points callers use:
//! `authenticate`, `initiate_sso`, and `single_logout`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::error::{AuthError, InitError, LogoutError};
use crate::registry::MetadataRegistry;
use crate::request::build_authn_request;
use crate::resolver::resolve_identity;
use crate::session::{Session, SessionId, SessionIssuer, SessionStore};
use crate::validator::AssertionValidator;

/// The assembled SP core.
pub struct ServiceProvider {
    registry: Arc<MetadataRegistry>,
    validator: AssertionValidator,
    issuer: SessionIssuer,
}

impl ServiceProvider {
    /// Build the core from configuration and an opened session store.
    ///
    /// Metadata problems fail here, not at request time.
    pub fn new(config: CoreConfig, store: Arc<SessionStore>) -> Result<Self, InitError> {
        config.validate()?;
        let registry = Arc::new(MetadataRegistry::from_config(&config)?);
        let replay = store.replay_cache()?;
        let validator = AssertionValidator::new(Arc::clone(&registry), replay, &config);
        let issuer = SessionIssuer::new(store, config.session_ttl_secs);

        info!(
            sps = registry.sp_count(),
            idps = registry.idp_count(),
            "Service provider core initialized"
        );
        Ok(Self {
            registry,
            validator,
            issuer,
        })
    }

    /// Authenticate a decoded SAML Response POSTed to `acs_url`.
    ///
    /// Returns the issued session on success. All failures are
    /// authentication failures to the caller; none are retried here.
    pub fn authenticate(&self, response: &[u8], acs_url: &str) -> Result<Session, AuthError> {
        let sp = self
            .registry
            .sp_for_acs(acs_url)
            .ok_or_else(|| AuthError::UnknownServiceProvider(acs_url.to_string()))?;

        let assertion = match self.validator.validate(response, sp) {
            Ok(assertion) => assertion,
            Err(e) => {
                warn!(acs_url, error = %e, "Assertion validation failed");
                return Err(e);
            }
        };

        let idp_entity_id = assertion.issuer.clone();
        let identity = resolve_identity(assertion, sp)?;
        let session = self.issuer.issue(identity, sp, &idp_entity_id)?;

        info!(
            session_id = %session.id,
            name_id = %session.name_id,
            sp = %sp.entity_id,
            idp = %idp_entity_id,
            "SAML authentication successful"
        );
        Ok(session)
    }

    /// Redirect URL starting SP-initiated SSO for `sp_entity_id` at
    /// `idp_entity_id`.
    pub fn initiate_sso(
        &self,
        sp_entity_id: &str,
        idp_entity_id: &str,
        relay_state: Option<&str>,
    ) -> Result<String, AuthError> {
        let sp = self
            .registry
            .lookup_sp(sp_entity_id)
            .ok_or_else(|| AuthError::UnknownServiceProvider(sp_entity_id.to_string()))?;
        let idp = self
            .registry
            .lookup_idp(idp_entity_id)
            .ok_or_else(|| AuthError::UnknownIssuer(idp_entity_id.to_string()))?;
        build_authn_request(sp, idp, relay_state)
    }

    /// Revoke every local session tied to an IdP session index.
    pub fn single_logout(&self, session_index: &str) -> Result<usize, LogoutError> {
        self.issuer.single_logout(session_index)
    }

    /// Look up an issued session by its token.
    pub fn session(&self, id: SessionId) -> Result<Option<Session>, AuthError> {
        Ok(self.issuer.session(id)?)
    }

    /// The registry this core validates against.
    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }
}
