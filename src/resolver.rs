//! Identity resolution from a validated assertion.

use std::collections::HashMap;

use tracing::debug;

use crate::assertion::Assertion;
use crate::error::AuthError;
use crate::registry::SpEntity;

/// Identity extracted from a validated assertion.
///
/// Consumed exactly once by the session issuer.
#[derive(Debug, Clone)]
pub struct ValidatedIdentity {
    /// The local identity value.
    pub name_id: String,

    /// Assertion attributes, carried into the session.
    pub attributes: HashMap<String, Vec<String>>,

    /// IdP session index for Single Logout linkage.
    pub idp_session_index: Option<String>,
}

/// Map a validated assertion to a local identity.
///
/// The SP's configured NameID attribute wins; the subject NameID is the
/// fallback when the attribute is absent or empty.
pub fn resolve_identity(
    assertion: Assertion,
    sp: &SpEntity,
) -> Result<ValidatedIdentity, AuthError> {
    let from_attribute = assertion
        .attributes
        .get(&sp.name_id_attribute)
        .and_then(|values| values.iter().find(|v| !v.is_empty()))
        .cloned();

    let name_id = match from_attribute {
        Some(value) => value,
        None if !assertion.subject_name_id.is_empty() => assertion.subject_name_id.clone(),
        None => {
            return Err(AuthError::MissingIdentityAttribute {
                attribute: sp.name_id_attribute.clone(),
            });
        }
    };

    debug!(name_id = %name_id, sp = %sp.entity_id, "Resolved identity");

    Ok(ValidatedIdentity {
        name_id,
        attributes: assertion.attributes,
        idp_session_index: assertion.session_index,
    })
}
