//! Test fixtures: throwaway RSA keys, self-signed certificates, and
//! signed SAML Response documents.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509Builder, X509NameBuilder};

use crate::signature::{build_signed_info, canonicalize, SignatureAlgorithm};

pub(crate) struct TestIdp {
    pub entity_id: String,
    pub key: PKey<Private>,
    pub cert_pem: String,
}

/// Generate a fresh RSA key and a self-signed certificate for it.
pub(crate) fn test_idp(entity_id: &str) -> TestIdp {
    let rsa = Rsa::generate(2048).unwrap();
    let key = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "test-idp").unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = {
        let mut bn = BigNum::new().unwrap();
        bn.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
        bn.to_asn1_integer().unwrap()
    };
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    TestIdp {
        entity_id: entity_id.to_string(),
        key,
        cert_pem: String::from_utf8(cert.to_pem().unwrap()).unwrap(),
    }
}

pub(crate) struct ResponseOptions<'a> {
    pub idp: &'a TestIdp,
    pub audience: String,
    pub name_id: String,
    pub attributes: Vec<(String, Vec<String>)>,
    pub not_before: DateTime<Utc>,
    pub not_on_or_after: DateTime<Utc>,
    pub session_index: Option<String>,
    pub assertion_id: String,
    pub sign: bool,
}

impl<'a> ResponseOptions<'a> {
    pub(crate) fn new(idp: &'a TestIdp, audience: &str, name_id: &str) -> Self {
        let now = Utc::now();
        Self {
            idp,
            audience: audience.to_string(),
            name_id: name_id.to_string(),
            attributes: Vec::new(),
            not_before: now - Duration::seconds(60),
            not_on_or_after: now + Duration::seconds(300),
            session_index: Some("sess-1".to_string()),
            assertion_id: format!("_a{}", uuid::Uuid::new_v4().simple()),
            sign: true,
        }
    }
}

/// Build a SAML Response document, signing its assertion unless
/// `options.sign` is false.
pub(crate) fn build_response(options: &ResponseOptions<'_>) -> String {
    let fmt = "%Y-%m-%dT%H:%M:%SZ";
    let issue_instant = Utc::now().format(fmt).to_string();
    let not_before = options.not_before.format(fmt).to_string();
    let not_on_or_after = options.not_on_or_after.format(fmt).to_string();

    let session_index_attr = options
        .session_index
        .as_ref()
        .map(|s| format!(r#" SessionIndex="{s}""#))
        .unwrap_or_default();

    let mut attribute_statement = String::new();
    if !options.attributes.is_empty() {
        attribute_statement.push_str("<saml:AttributeStatement>");
        for (attr_name, values) in &options.attributes {
            attribute_statement.push_str(&format!(r#"<saml:Attribute Name="{attr_name}">"#));
            for value in values {
                attribute_statement
                    .push_str(&format!("<saml:AttributeValue>{value}</saml:AttributeValue>"));
            }
            attribute_statement.push_str("</saml:Attribute>");
        }
        attribute_statement.push_str("</saml:AttributeStatement>");
    }

    let assertion_open = format!(
        r#"<saml:Assertion ID="{id}" Version="2.0" IssueInstant="{issue_instant}"><saml:Issuer>{issuer}</saml:Issuer>"#,
        id = options.assertion_id,
        issuer = options.idp.entity_id,
    );
    let assertion_body = format!(
        r#"<saml:Subject><saml:NameID Format="urn:oasis:names:tc:SAML:2.0:nameid-format:persistent">{name_id}</saml:NameID></saml:Subject><saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}"><saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction></saml:Conditions><saml:AuthnStatement AuthnInstant="{issue_instant}"{session_index_attr}><saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:Password</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>{attribute_statement}"#,
        name_id = options.name_id,
        audience = options.audience,
    );
    let assertion_close = "</saml:Assertion>";

    let assertion = if options.sign {
        let unsigned = format!("{assertion_open}{assertion_body}{assertion_close}");
        let digest =
            openssl::hash::hash(MessageDigest::sha256(), canonicalize(&unsigned).as_bytes())
                .unwrap();
        let digest_value = BASE64.encode(digest);

        let signed_info = build_signed_info(
            SignatureAlgorithm::RsaSha256,
            &format!("#{}", options.assertion_id),
            &digest_value,
        );
        let mut signer = Signer::new(MessageDigest::sha256(), &options.idp.key).unwrap();
        signer.update(canonicalize(&signed_info).as_bytes()).unwrap();
        let signature_value = BASE64.encode(signer.sign_to_vec().unwrap());

        let signature_block = format!(
            r#"<ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#">{signed_info}<ds:SignatureValue>{signature_value}</ds:SignatureValue></ds:Signature>"#
        );
        format!("{assertion_open}{signature_block}{assertion_body}{assertion_close}")
    } else {
        format!("{assertion_open}{assertion_body}{assertion_close}")
    };

    format!(
        r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_r{response_id}" Version="2.0" IssueInstant="{issue_instant}"><saml:Issuer>{issuer}</saml:Issuer><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>{assertion}</samlp:Response>"#,
        response_id = uuid::Uuid::new_v4().simple(),
        issuer = options.idp.entity_id,
    )
}
