//! Session types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque session token (16 random bytes, hex-encoded at the edges).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(rand::random())
    }

    /// Hex form for storage and transport.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 16 {
            return None;
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Some(Self(arr))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A local authenticated session issued for a validated identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session token.
    pub id: SessionId,

    /// Resolved local identity (configured NameID attribute, or the
    /// subject NameID fallback).
    pub name_id: String,

    /// NameID format URN.
    pub name_id_format: Option<String>,

    /// SP the session was issued for.
    pub sp_entity_id: String,

    /// IdP that authenticated the user.
    pub idp_entity_id: String,

    /// IdP session index; Single Logout revokes every session sharing
    /// this value.
    pub session_index: Option<String>,

    /// Assertion attributes as key -> values. Most are single-valued,
    /// but SAML allows multi-valued.
    pub attributes: HashMap<String, Vec<String>>,

    /// Session creation time.
    pub created_at: DateTime<Utc>,

    /// Session expiry time.
    pub expires_at: DateTime<Utc>,

    /// Last access time (updated on each lookup).
    pub last_accessed: DateTime<Utc>,
}

impl Session {
    pub fn new(
        name_id: String,
        sp_entity_id: String,
        idp_entity_id: String,
        ttl_secs: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            name_id,
            name_id_format: None,
            sp_entity_id,
            idp_entity_id,
            session_index: None,
            attributes: HashMap::new(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_secs as i64),
            last_accessed: now,
        }
    }

    /// Check if the session is expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Update the last access time.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// First value of an attribute.
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }
}
