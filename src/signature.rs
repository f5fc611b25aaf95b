//! Enveloped XML signature verification.
//!
//! Verifies the `ds:Signature` embedded in a SAML document against a
//! list of trusted certificates: the reference digest is recomputed
//! over the signed element with the signature removed, then the
//! `SignedInfo` signature is checked with each certificate's public key
//! until one verifies.
//!
//! Canonicalization is the simplified whitespace-collapsing form; the
//! producer must emit canonicalization-stable XML.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use openssl::hash::MessageDigest;
use openssl::sign::Verifier;
use openssl::x509::X509;

use crate::error::AuthError;

const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Signature algorithms accepted for assertion signatures. SHA-1 is
/// rejected outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignatureAlgorithm {
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl SignatureAlgorithm {
    pub(crate) fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256" => Some(Self::RsaSha256),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384" => Some(Self::RsaSha384),
            "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512" => Some(Self::RsaSha512),
            _ => None,
        }
    }

    pub(crate) fn uri(self) -> &'static str {
        match self {
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::RsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384",
            Self::RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        }
    }

    pub(crate) fn digest_uri(self) -> &'static str {
        match self {
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            Self::RsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            Self::RsaSha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    fn message_digest(self) -> MessageDigest {
        match self {
            Self::RsaSha256 => MessageDigest::sha256(),
            Self::RsaSha384 => MessageDigest::sha384(),
            Self::RsaSha512 => MessageDigest::sha512(),
        }
    }
}

/// Signature fields pulled out of the document.
struct XmlSignature {
    algorithm: SignatureAlgorithm,
    reference_uri: String,
    digest_value: String,
    signature_value: String,
}

pub(crate) fn has_signature(xml: &str) -> bool {
    xml.contains("<ds:Signature") || xml.contains("<Signature")
}

/// Verify the enveloped signature in `xml` against `certificates`,
/// accepting if any of them verifies it.
pub(crate) fn verify_enveloped(
    xml: &str,
    certificates: &[String],
    issuer: &str,
) -> Result<(), AuthError> {
    let signature = extract_signature(xml).map_err(|reason| invalid(issuer, reason))?;
    verify_reference_digest(xml, &signature).map_err(|reason| invalid(issuer, reason))?;

    let signed_info = build_signed_info(
        signature.algorithm,
        &signature.reference_uri,
        &signature.digest_value,
    );
    let canonical = canonicalize(&signed_info);
    let signature_bytes = BASE64
        .decode(signature.signature_value.as_bytes())
        .map_err(|e| invalid(issuer, format!("signature encoding: {e}")))?;

    if certificates.is_empty() {
        return Err(invalid(issuer, "no trusted certificates for issuer".to_string()));
    }
    for pem in certificates {
        if verify_with_certificate(canonical.as_bytes(), &signature_bytes, pem, signature.algorithm)
            .unwrap_or(false)
        {
            return Ok(());
        }
    }
    Err(invalid(
        issuer,
        "signature did not verify against any trusted certificate".to_string(),
    ))
}

fn invalid(issuer: &str, reason: String) -> AuthError {
    AuthError::SignatureInvalid {
        issuer: issuer.to_string(),
        reason,
    }
}

fn extract_signature(xml: &str) -> Result<XmlSignature, String> {
    if !has_signature(xml) {
        return Err("no Signature element".to_string());
    }

    let algorithm_uri = extract_attribute(xml, "SignatureMethod", "Algorithm")
        .ok_or_else(|| "no SignatureMethod algorithm".to_string())?;
    let algorithm = SignatureAlgorithm::from_uri(&algorithm_uri)
        .ok_or_else(|| format!("unsupported signature algorithm: {algorithm_uri}"))?;

    let reference_uri = extract_attribute(xml, "Reference", "URI")
        .ok_or_else(|| "no Reference URI".to_string())?;
    let digest_value = extract_element_content(xml, "DigestValue")
        .ok_or_else(|| "no DigestValue".to_string())?;
    let signature_value = extract_element_content(xml, "SignatureValue")
        .ok_or_else(|| "no SignatureValue".to_string())?;

    Ok(XmlSignature {
        algorithm,
        reference_uri,
        digest_value: strip_whitespace(&digest_value),
        signature_value: strip_whitespace(&signature_value),
    })
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Find `attribute` on the first `element` in the document, trying the
/// `ds:`-prefixed spelling first.
fn extract_attribute(xml: &str, element: &str, attribute: &str) -> Option<String> {
    let patterns = [format!("<ds:{element}"), format!("<{element}")];
    for pattern in &patterns {
        if let Some(pos) = xml.find(pattern.as_str()) {
            let end = xml[pos..].find('>')?;
            let element_str = &xml[pos..pos + end];

            let attr_pattern = format!("{attribute}=\"");
            if let Some(attr_start) = element_str.find(&attr_pattern) {
                let value_start = attr_start + attr_pattern.len();
                let value_len = element_str[value_start..].find('"')?;
                return Some(element_str[value_start..value_start + value_len].to_string());
            }
        }
    }
    None
}

/// Text content of the first `element` in the document.
fn extract_element_content(xml: &str, element: &str) -> Option<String> {
    let patterns = [
        (format!("<ds:{element}>"), format!("</ds:{element}>")),
        (format!("<{element}>"), format!("</{element}>")),
    ];
    for (open, close) in &patterns {
        if let Some(start) = xml.find(open.as_str()) {
            let content_start = start + open.len();
            if let Some(len) = xml[content_start..].find(close.as_str()) {
                return Some(xml[content_start..content_start + len].to_string());
            }
        }
    }
    None
}

fn verify_reference_digest(xml: &str, signature: &XmlSignature) -> Result<(), String> {
    let reference_id = signature.reference_uri.trim_start_matches('#');
    // An empty URI references the whole document.
    let element = if reference_id.is_empty() {
        xml.to_string()
    } else {
        extract_referenced_element(xml, reference_id)?
    };

    let canonical = canonicalize(&remove_signature_element(&element));
    let digest = openssl::hash::hash(signature.algorithm.message_digest(), canonical.as_bytes())
        .map_err(|e| format!("digest computation failed: {e}"))?;

    if BASE64.encode(digest) != signature.digest_value {
        return Err("digest mismatch".to_string());
    }
    Ok(())
}

/// Slice out the element carrying `ID="{reference_id}"`, including its
/// closing tag.
fn extract_referenced_element(xml: &str, reference_id: &str) -> Result<String, String> {
    let id_patterns = [
        format!("ID=\"{reference_id}\""),
        format!("Id=\"{reference_id}\""),
    ];
    let pos = id_patterns
        .iter()
        .find_map(|p| xml.find(p.as_str()))
        .ok_or_else(|| format!("referenced element {reference_id} not found"))?;

    let start = xml[..pos]
        .rfind('<')
        .ok_or_else(|| "referenced element has no opening tag".to_string())?;
    let name_len = xml[start + 1..]
        .find(|c: char| c == ' ' || c == '>')
        .ok_or_else(|| "unterminated opening tag".to_string())?;
    let tag_name = &xml[start + 1..start + 1 + name_len];

    let close_tag = format!("</{tag_name}>");
    let close_pos = xml[start..]
        .find(&close_tag)
        .ok_or_else(|| format!("element {tag_name} is not closed"))?;

    Ok(xml[start..start + close_pos + close_tag.len()].to_string())
}

/// Drop the `Signature` element (enveloped signature transform).
fn remove_signature_element(xml: &str) -> String {
    for (open, close) in [
        ("<ds:Signature", "</ds:Signature>"),
        ("<Signature", "</Signature>"),
    ] {
        if let Some(start) = xml.find(open) {
            if let Some(end_offset) = xml[start..].find(close) {
                let end = start + end_offset + close.len();
                let mut result = String::with_capacity(xml.len());
                result.push_str(&xml[..start]);
                result.push_str(&xml[end..]);
                return result;
            }
        }
    }
    xml.to_string()
}

/// Whitespace-collapsing canonicalization applied to both digested
/// content and `SignedInfo`.
pub(crate) fn canonicalize(xml: &str) -> String {
    xml.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The canonical `SignedInfo` form both signer and verifier operate on.
pub(crate) fn build_signed_info(
    algorithm: SignatureAlgorithm,
    reference_uri: &str,
    digest_value: &str,
) -> String {
    format!(
        r#"<ds:SignedInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
<ds:CanonicalizationMethod Algorithm="{EXC_C14N}"/>
<ds:SignatureMethod Algorithm="{sig_alg}"/>
<ds:Reference URI="{reference_uri}">
<ds:Transforms>
<ds:Transform Algorithm="{ENVELOPED_SIGNATURE}"/>
<ds:Transform Algorithm="{EXC_C14N}"/>
</ds:Transforms>
<ds:DigestMethod Algorithm="{digest_alg}"/>
<ds:DigestValue>{digest_value}</ds:DigestValue>
</ds:Reference>
</ds:SignedInfo>"#,
        sig_alg = algorithm.uri(),
        digest_alg = algorithm.digest_uri(),
    )
}

/// Parse an X.509 certificate from PEM, with or without the PEM
/// delimiters.
pub(crate) fn parse_certificate(pem: &str) -> Result<X509, String> {
    let pem_data = if pem.contains("-----BEGIN CERTIFICATE-----") {
        pem.to_string()
    } else {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
            pem.trim()
        )
    };
    X509::from_pem(pem_data.as_bytes()).map_err(|e| format!("invalid certificate: {e}"))
}

fn verify_with_certificate(
    data: &[u8],
    signature: &[u8],
    pem: &str,
    algorithm: SignatureAlgorithm,
) -> Result<bool, String> {
    let cert = parse_certificate(pem)?;
    let public_key = cert
        .public_key()
        .map_err(|e| format!("certificate public key: {e}"))?;

    let mut verifier = Verifier::new(algorithm.message_digest(), &public_key)
        .map_err(|e| format!("verifier creation failed: {e}"))?;
    verifier
        .update(data)
        .map_err(|e| format!("signature update failed: {e}"))?;
    verifier
        .verify(signature)
        .map_err(|e| format!("signature verification failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{build_response, test_idp, ResponseOptions};

    #[test]
    fn test_extract_attribute() {
        let xml = r##"<ds:Reference URI="#_123"></ds:Reference>"##;
        assert_eq!(
            extract_attribute(xml, "Reference", "URI").as_deref(),
            Some("#_123")
        );
        assert!(extract_attribute(xml, "Reference", "Missing").is_none());
    }

    #[test]
    fn test_extract_element_content() {
        let xml = "<ds:DigestValue>abc123</ds:DigestValue>";
        assert_eq!(
            extract_element_content(xml, "DigestValue").as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn test_remove_signature_element() {
        let xml = r#"<Root><ds:Signature>sig</ds:Signature><Data>content</Data></Root>"#;
        let result = remove_signature_element(xml);
        assert!(!result.contains("Signature"));
        assert!(result.contains("<Data>content</Data>"));
    }

    #[test]
    fn test_canonicalize_collapses_whitespace() {
        assert_eq!(canonicalize("<a>\n  <b/>\n</a>"), "<a> <b/> </a>");
    }

    #[test]
    fn test_parse_certificate_with_and_without_headers() {
        let idp = test_idp("https://idp.example.com");
        assert!(parse_certificate(&idp.cert_pem).is_ok());

        let bare: String = idp
            .cert_pem
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(parse_certificate(&bare).is_ok());
        assert!(parse_certificate("not a certificate").is_err());
    }

    #[test]
    fn test_signed_document_verifies() {
        let idp = test_idp("https://idp.example.com");
        let xml = build_response(&ResponseOptions::new(&idp, "sp1", "jdoe"));
        verify_enveloped(&xml, std::slice::from_ref(&idp.cert_pem), &idp.entity_id).unwrap();
    }

    #[test]
    fn test_untrusted_certificate_rejected() {
        let idp = test_idp("https://idp.example.com");
        let other = test_idp("https://idp.example.com");
        let xml = build_response(&ResponseOptions::new(&idp, "sp1", "jdoe"));

        let result = verify_enveloped(&xml, std::slice::from_ref(&other.cert_pem), &idp.entity_id);
        assert!(matches!(result, Err(AuthError::SignatureInvalid { .. })));
    }

    #[test]
    fn test_second_certificate_in_list_accepts() {
        let idp = test_idp("https://idp.example.com");
        let other = test_idp("https://idp.example.com");
        let xml = build_response(&ResponseOptions::new(&idp, "sp1", "jdoe"));

        let certs = vec![other.cert_pem.clone(), idp.cert_pem.clone()];
        verify_enveloped(&xml, &certs, &idp.entity_id).unwrap();
    }

    #[test]
    fn test_tampered_content_fails_digest() {
        let idp = test_idp("https://idp.example.com");
        let xml = build_response(&ResponseOptions::new(&idp, "sp1", "jdoe"));
        let tampered = xml.replace("jdoe", "mallory");

        let result =
            verify_enveloped(&tampered, std::slice::from_ref(&idp.cert_pem), &idp.entity_id);
        match result {
            Err(AuthError::SignatureInvalid { reason, .. }) => {
                assert!(reason.contains("digest"), "unexpected reason: {reason}");
            }
            other => panic!("expected SignatureInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_unsigned_document_rejected() {
        let idp = test_idp("https://idp.example.com");
        let mut options = ResponseOptions::new(&idp, "sp1", "jdoe");
        options.sign = false;
        let xml = build_response(&options);

        let result = verify_enveloped(&xml, std::slice::from_ref(&idp.cert_pem), &idp.entity_id);
        assert!(matches!(result, Err(AuthError::SignatureInvalid { .. })));
    }

    #[test]
    fn test_empty_trust_list_rejected() {
        let idp = test_idp("https://idp.example.com");
        let xml = build_response(&ResponseOptions::new(&idp, "sp1", "jdoe"));
        let result = verify_enveloped(&xml, &[], &idp.entity_id);
        assert!(matches!(result, Err(AuthError::SignatureInvalid { .. })));
    }
}
