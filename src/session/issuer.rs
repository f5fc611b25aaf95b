//! Session issuance and Single Logout.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{LogoutError, StoreError};
use crate::registry::SpEntity;
use crate::resolver::ValidatedIdentity;

use super::store::SessionStore;
use super::types::{Session, SessionId};

/// Issues local sessions for validated identities and services Single
/// Logout requests.
pub struct SessionIssuer {
    store: Arc<SessionStore>,
    session_ttl_secs: u64,
}

impl SessionIssuer {
    pub fn new(store: Arc<SessionStore>, session_ttl_secs: u64) -> Self {
        Self {
            store,
            session_ttl_secs,
        }
    }

    /// Create and persist a session for `identity` at `sp`.
    ///
    /// The identity is consumed; no session state is observable until
    /// the store commit.
    pub fn issue(
        &self,
        identity: ValidatedIdentity,
        sp: &SpEntity,
        idp_entity_id: &str,
    ) -> Result<Session, StoreError> {
        let mut session = Session::new(
            identity.name_id,
            sp.entity_id.clone(),
            idp_entity_id.to_string(),
            self.session_ttl_secs,
        );
        session.name_id_format = Some(sp.name_id_format.as_urn().to_string());
        session.session_index = identity.idp_session_index;
        session.attributes = identity.attributes;

        self.store.create(session.clone())?;

        info!(
            session_id = %session.id,
            sp = %session.sp_entity_id,
            idp = %session.idp_entity_id,
            "Issued session"
        );
        Ok(session)
    }

    /// Revoke every session bearing `session_index`. Returns the number
    /// of sessions revoked.
    pub fn single_logout(&self, session_index: &str) -> Result<usize, LogoutError> {
        let revoked = self.store.invalidate_by_session_index(session_index)?;
        if revoked == 0 {
            debug!(session_index, "Single logout for unknown session index");
            return Err(LogoutError::NoActiveSession {
                session_index: session_index.to_string(),
            });
        }
        info!(session_index, revoked, "Single logout completed");
        Ok(revoked)
    }

    /// Look up a session by its token.
    pub fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        self.store.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NameIdFormat, SpEntity};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn test_sp() -> SpEntity {
        SpEntity {
            entity_id: "https://sp.example.com".to_string(),
            acs_url: "https://sp.example.com/saml/acs".to_string(),
            slo_url: None,
            name_id_attribute: "uid".to_string(),
            name_id_format: NameIdFormat::Persistent,
        }
    }

    fn test_issuer() -> (SessionIssuer, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SessionStore::open(dir.path().join("sessions.redb"), 3600).unwrap();
        (SessionIssuer::new(Arc::new(store), 3600), dir)
    }

    fn identity(name_id: &str, session_index: Option<&str>) -> ValidatedIdentity {
        ValidatedIdentity {
            name_id: name_id.to_string(),
            attributes: HashMap::new(),
            idp_session_index: session_index.map(str::to_string),
        }
    }

    #[test]
    fn test_issue_and_fetch() {
        let (issuer, _dir) = test_issuer();

        let session = issuer
            .issue(identity("jdoe", Some("sess-1")), &test_sp(), "https://idp.example.com")
            .unwrap();

        let fetched = issuer.session(session.id).unwrap().unwrap();
        assert_eq!(fetched.name_id, "jdoe");
        assert_eq!(fetched.sp_entity_id, "https://sp.example.com");
        assert_eq!(fetched.idp_entity_id, "https://idp.example.com");
        assert_eq!(fetched.session_index.as_deref(), Some("sess-1"));
        assert_eq!(
            fetched.name_id_format.as_deref(),
            Some("urn:oasis:names:tc:SAML:2.0:nameid-format:persistent")
        );
    }

    #[test]
    fn test_single_logout_revokes_all_matching() {
        let (issuer, _dir) = test_issuer();
        let sp = test_sp();

        let a = issuer
            .issue(identity("jdoe", Some("shared")), &sp, "idp")
            .unwrap();
        let b = issuer
            .issue(identity("jdoe", Some("shared")), &sp, "idp")
            .unwrap();
        let c = issuer
            .issue(identity("someone", Some("other")), &sp, "idp")
            .unwrap();

        assert_eq!(issuer.single_logout("shared").unwrap(), 2);
        assert!(issuer.session(a.id).unwrap().is_none());
        assert!(issuer.session(b.id).unwrap().is_none());
        assert!(issuer.session(c.id).unwrap().is_some());
    }

    #[test]
    fn test_single_logout_unknown_index() {
        let (issuer, _dir) = test_issuer();
        let result = issuer.single_logout("never-seen");
        assert!(matches!(
            result,
            Err(LogoutError::NoActiveSession { .. })
        ));
    }
}
