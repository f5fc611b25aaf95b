//! SP/IdP metadata records and the registry that serves them.
//!
//! The registry is built once at startup from already-parsed records
//! and shared behind `Arc` afterwards; lookups take `&self` and no
//! lock.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CoreConfig;
use crate::error::MetadataError;

/// NameID formats this core understands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameIdFormat {
    #[default]
    Persistent,
    Transient,
    EmailAddress,
    Unspecified,
}

impl NameIdFormat {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::Persistent => "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent",
            Self::Transient => "urn:oasis:names:tc:SAML:2.0:nameid-format:transient",
            Self::EmailAddress => "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress",
            Self::Unspecified => "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified",
        }
    }

    /// Accepts the SAML 2.0 URNs plus the 1.1-style persistent and
    /// transient variants some IdP stacks write.
    pub fn from_urn(urn: &str) -> Option<Self> {
        match urn {
            "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent"
            | "urn:oasis:names:tc:SAML:1.1:nameid-format:persistent" => Some(Self::Persistent),
            "urn:oasis:names:tc:SAML:2.0:nameid-format:transient"
            | "urn:oasis:names:tc:SAML:1.1:nameid-format:transient" => Some(Self::Transient),
            "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress" => Some(Self::EmailAddress),
            "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified" => Some(Self::Unspecified),
            _ => None,
        }
    }
}

/// A registered service provider. Immutable after registry load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpEntity {
    /// Unique entity ID for this SP.
    pub entity_id: String,

    /// Assertion Consumer Service URL (where the IdP posts responses).
    pub acs_url: String,

    /// Single Logout Service URL (optional).
    #[serde(default)]
    pub slo_url: Option<String>,

    /// Assertion attribute that carries the local identity. The subject
    /// NameID is the fallback when the attribute is absent.
    #[serde(default = "default_name_id_attribute")]
    pub name_id_attribute: String,

    /// NameID format requested from the IdP.
    #[serde(default)]
    pub name_id_format: NameIdFormat,
}

fn default_name_id_attribute() -> String {
    "uid".to_string()
}

impl SpEntity {
    fn validate(&self) -> Result<(), MetadataError> {
        if self.entity_id.is_empty() {
            return Err(MetadataError::Invalid(
                "service provider entity_id is required".to_string(),
            ));
        }
        if self.acs_url.is_empty() {
            return Err(MetadataError::Invalid(format!(
                "service provider {} has an empty ACS URL",
                self.entity_id
            )));
        }
        if self.name_id_attribute.is_empty() {
            return Err(MetadataError::Invalid(format!(
                "service provider {} has an empty NameID attribute",
                self.entity_id
            )));
        }
        Ok(())
    }
}

/// A trusted identity provider. Immutable after registry load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpEntity {
    /// IdP entity ID, matched against the assertion issuer.
    pub entity_id: String,

    /// Single Sign-On URL for SP-initiated flows.
    pub sso_url: String,

    /// Trusted signing certificates, PEM. An assertion signature is
    /// accepted when any one of them verifies it.
    #[serde(default)]
    pub certificates: Vec<String>,
}

impl IdpEntity {
    fn validate(&self) -> Result<(), MetadataError> {
        if self.entity_id.is_empty() {
            return Err(MetadataError::Invalid(
                "identity provider entity_id is required".to_string(),
            ));
        }
        if self.sso_url.is_empty() {
            return Err(MetadataError::Invalid(format!(
                "identity provider {} has an empty SSO URL",
                self.entity_id
            )));
        }
        Ok(())
    }
}

/// Read-mostly registry mapping entity IDs to connection records.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    sps: HashMap<String, SpEntity>,
    idps: HashMap<String, IdpEntity>,
    /// ACS URL -> SP entity ID, for resolving the inbound request
    /// context.
    acs_index: HashMap<String, String>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the full registry from configuration, failing fast on the
    /// first invalid or duplicate record.
    pub fn from_config(config: &CoreConfig) -> Result<Self, MetadataError> {
        let mut registry = Self::new();
        for sp in &config.service_providers {
            registry.register_sp(sp.clone())?;
        }
        for idp in &config.identity_providers {
            registry.register_idp(idp.clone())?;
        }
        Ok(registry)
    }

    /// Register a service provider. Fails on a duplicate entity ID or
    /// ACS URL; the registry keeps the earlier record.
    pub fn register_sp(&mut self, sp: SpEntity) -> Result<(), MetadataError> {
        sp.validate()?;
        if self.sps.contains_key(&sp.entity_id) {
            return Err(MetadataError::DuplicateEntity(sp.entity_id));
        }
        if self.acs_index.contains_key(&sp.acs_url) {
            return Err(MetadataError::Invalid(format!(
                "ACS URL {} is already registered",
                sp.acs_url
            )));
        }
        debug!(entity_id = %sp.entity_id, acs_url = %sp.acs_url, "Registered service provider");
        self.acs_index.insert(sp.acs_url.clone(), sp.entity_id.clone());
        self.sps.insert(sp.entity_id.clone(), sp);
        Ok(())
    }

    /// Register an identity provider. Fails on a duplicate entity ID.
    pub fn register_idp(&mut self, idp: IdpEntity) -> Result<(), MetadataError> {
        idp.validate()?;
        if self.idps.contains_key(&idp.entity_id) {
            return Err(MetadataError::DuplicateEntity(idp.entity_id));
        }
        debug!(
            entity_id = %idp.entity_id,
            certificates = idp.certificates.len(),
            "Registered identity provider"
        );
        self.idps.insert(idp.entity_id.clone(), idp);
        Ok(())
    }

    pub fn lookup_sp(&self, entity_id: &str) -> Option<&SpEntity> {
        self.sps.get(entity_id)
    }

    pub fn lookup_idp(&self, entity_id: &str) -> Option<&IdpEntity> {
        self.idps.get(entity_id)
    }

    /// Resolve the SP a response is addressed to, by its ACS URL.
    pub fn sp_for_acs(&self, acs_url: &str) -> Option<&SpEntity> {
        self.acs_index
            .get(acs_url)
            .and_then(|entity_id| self.sps.get(entity_id))
    }

    pub fn sp_count(&self) -> usize {
        self.sps.len()
    }

    pub fn idp_count(&self) -> usize {
        self.idps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_sp(entity_id: &str, acs_url: &str) -> SpEntity {
        SpEntity {
            entity_id: entity_id.to_string(),
            acs_url: acs_url.to_string(),
            slo_url: None,
            name_id_attribute: "uid".to_string(),
            name_id_format: NameIdFormat::Persistent,
        }
    }

    fn test_idp(entity_id: &str) -> IdpEntity {
        IdpEntity {
            entity_id: entity_id.to_string(),
            sso_url: "https://idp.example.com/sso".to_string(),
            certificates: vec!["fake-pem".to_string()],
        }
    }

    #[test]
    fn test_register_and_lookup_roundtrip() {
        let mut registry = MetadataRegistry::new();
        registry
            .register_sp(test_sp("sp1", "https://sp1/acs"))
            .unwrap();
        registry.register_idp(test_idp("idp1")).unwrap();

        let sp = registry.lookup_sp("sp1").unwrap();
        assert_eq!(sp.entity_id, "sp1");
        assert_eq!(sp.acs_url, "https://sp1/acs");
        assert_eq!(sp.name_id_attribute, "uid");

        let idp = registry.lookup_idp("idp1").unwrap();
        assert_eq!(idp.certificates.len(), 1);

        assert!(registry.lookup_sp("missing").is_none());
        assert!(registry.lookup_idp("missing").is_none());
    }

    #[test]
    fn test_duplicate_sp_keeps_first() {
        let mut registry = MetadataRegistry::new();
        registry
            .register_sp(test_sp("sp1", "https://first/acs"))
            .unwrap();

        let result = registry.register_sp(test_sp("sp1", "https://second/acs"));
        assert!(matches!(result, Err(MetadataError::DuplicateEntity(_))));

        assert_eq!(registry.lookup_sp("sp1").unwrap().acs_url, "https://first/acs");
        assert_eq!(registry.sp_count(), 1);
    }

    #[test]
    fn test_duplicate_idp_rejected() {
        let mut registry = MetadataRegistry::new();
        registry.register_idp(test_idp("idp1")).unwrap();
        let result = registry.register_idp(test_idp("idp1"));
        assert!(matches!(result, Err(MetadataError::DuplicateEntity(_))));
    }

    #[test]
    fn test_empty_fields_fail_at_registration() {
        let mut registry = MetadataRegistry::new();

        let result = registry.register_sp(test_sp("", "https://sp/acs"));
        assert!(matches!(result, Err(MetadataError::Invalid(_))));

        let result = registry.register_sp(test_sp("sp1", ""));
        assert!(matches!(result, Err(MetadataError::Invalid(_))));

        let mut sp = test_sp("sp1", "https://sp/acs");
        sp.name_id_attribute = String::new();
        let result = registry.register_sp(sp);
        assert!(matches!(result, Err(MetadataError::Invalid(_))));

        let mut idp = test_idp("idp1");
        idp.sso_url = String::new();
        let result = registry.register_idp(idp);
        assert!(matches!(result, Err(MetadataError::Invalid(_))));
    }

    #[test]
    fn test_acs_resolution() {
        let mut registry = MetadataRegistry::new();
        registry
            .register_sp(test_sp("sp1", "https://sp1/acs"))
            .unwrap();
        registry
            .register_sp(test_sp("sp2", "https://sp2/acs"))
            .unwrap();

        assert_eq!(registry.sp_for_acs("https://sp2/acs").unwrap().entity_id, "sp2");
        assert!(registry.sp_for_acs("https://other/acs").is_none());

        // Two SPs must not share an ACS URL.
        let result = registry.register_sp(test_sp("sp3", "https://sp1/acs"));
        assert!(matches!(result, Err(MetadataError::Invalid(_))));
    }

    #[test]
    fn test_from_config() {
        let config = CoreConfig {
            service_providers: vec![test_sp("sp1", "https://sp1/acs")],
            identity_providers: vec![test_idp("idp1")],
            ..Default::default()
        };
        let registry = MetadataRegistry::from_config(&config).unwrap();
        assert_eq!(registry.sp_count(), 1);
        assert_eq!(registry.idp_count(), 1);
    }

    #[test]
    fn test_name_id_format_urns() {
        assert_eq!(
            NameIdFormat::Persistent.as_urn(),
            "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent"
        );
        assert_eq!(
            NameIdFormat::from_urn("urn:oasis:names:tc:SAML:1.1:nameid-format:persistent"),
            Some(NameIdFormat::Persistent)
        );
        assert_eq!(
            NameIdFormat::from_urn("urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress"),
            Some(NameIdFormat::EmailAddress)
        );
        assert_eq!(NameIdFormat::from_urn("not-a-urn"), None);
        assert_eq!(NameIdFormat::default(), NameIdFormat::Persistent);
    }
}
