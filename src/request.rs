//! SP-initiated SSO: AuthnRequest construction.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::AuthError;
use crate::registry::{IdpEntity, SpEntity};

/// Build the HTTP-Redirect URL carrying a deflated, base64, URL-encoded
/// AuthnRequest toward `idp`.
pub fn build_authn_request(
    sp: &SpEntity,
    idp: &IdpEntity,
    relay_state: Option<&str>,
) -> Result<String, AuthError> {
    let request_id = format!("_id{}", Uuid::new_v4());
    let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let authn_request = format!(
        r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
            xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
            ID="{}"
            Version="2.0"
            IssueInstant="{}"
            Destination="{}"
            AssertionConsumerServiceURL="{}">
            <saml:Issuer>{}</saml:Issuer>
            <samlp:NameIDPolicy Format="{}" AllowCreate="true"/>
        </samlp:AuthnRequest>"#,
        request_id,
        issue_instant,
        idp.sso_url,
        sp.acs_url,
        sp.entity_id,
        sp.name_id_format.as_urn(),
    );

    let encoded = deflate_and_encode(&authn_request)?;

    let mut url = format!("{}?SAMLRequest={}", idp.sso_url, urlencoding::encode(&encoded));
    if let Some(state) = relay_state {
        url.push_str(&format!("&RelayState={}", urlencoding::encode(state)));
    }

    debug!(sp = %sp.entity_id, idp = %idp.entity_id, "Created AuthnRequest redirect");
    Ok(url)
}

/// Deflate and base64 encode for the HTTP-Redirect binding.
fn deflate_and_encode(xml: &str) -> Result<String, AuthError> {
    use std::io::Write;

    let mut encoder =
        flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(|e| AuthError::Internal(format!("deflate: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| AuthError::Internal(format!("deflate: {e}")))?;
    Ok(BASE64.encode(compressed))
}
