//! Domain view of a SAML assertion, extracted from the wire schema.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::AuthError;

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// The fields of a SAML assertion this core acts on.
///
/// Transient: constructed per request and discarded once the identity
/// has been resolved.
#[derive(Debug, Clone)]
pub struct Assertion {
    /// Assertion ID, used for replay detection.
    pub id: String,

    /// Issuing IdP entity ID.
    pub issuer: String,

    /// Subject NameID value; empty when the assertion carries none.
    pub subject_name_id: String,

    /// Subject NameID format URN, if declared.
    pub name_id_format: Option<String>,

    /// Attribute name -> values, in document order.
    pub attributes: HashMap<String, Vec<String>>,

    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,

    /// Entity IDs listed under the assertion's audience restrictions.
    pub audiences: Vec<String>,

    /// IdP session index, retained for Single Logout.
    pub session_index: Option<String>,
}

impl Assertion {
    /// Parse a decoded SAML Response document and pull out the
    /// assertion fields.
    ///
    /// Only well-formedness and the response status are checked here;
    /// the trust checks (issuer, signature, window, audience, replay)
    /// live in the validator.
    pub fn from_response_xml(xml: &str) -> Result<Self, AuthError> {
        let response: samael::schema::Response = xml
            .parse()
            .map_err(|e| AuthError::MalformedResponse(format!("{e}")))?;

        if let Some(ref status) = response.status {
            let code = status.status_code.value.as_deref();
            if code != Some(STATUS_SUCCESS) {
                let message = status
                    .status_message
                    .as_ref()
                    .and_then(|m| m.value.clone())
                    .unwrap_or_else(|| code.unwrap_or("unknown status").to_string());
                return Err(AuthError::RejectedStatus(message));
            }
        }

        let assertion = response
            .assertion
            .as_ref()
            .ok_or_else(|| AuthError::MalformedResponse("response contains no assertion".to_string()))?;

        let issuer = assertion.issuer.value.clone().unwrap_or_default();

        // A missing subject is not a parse error; the resolver decides
        // whether an identity can still be derived.
        let (subject_name_id, name_id_format) =
            match assertion.subject.as_ref().and_then(|s| s.name_id.as_ref()) {
                Some(name_id) => (name_id.value.clone(), name_id.format.clone()),
                None => (String::new(), None),
            };

        let (not_before, not_on_or_after) = match assertion.conditions {
            Some(ref conditions) => (conditions.not_before, conditions.not_on_or_after),
            None => (None, None),
        };

        let session_index = assertion
            .authn_statements
            .as_ref()
            .and_then(|stmts| stmts.first())
            .and_then(|s| s.session_index.clone());

        let mut attributes: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(ref attr_statements) = assertion.attribute_statements {
            for attr_statement in attr_statements {
                for attr in &attr_statement.attributes {
                    if let Some(ref name) = attr.name {
                        let values: Vec<String> = attr
                            .values
                            .iter()
                            .filter_map(|v| v.value.clone())
                            .collect();
                        if !values.is_empty() {
                            attributes.insert(name.clone(), values);
                        }
                    }
                }
            }
        }

        Ok(Self {
            id: assertion.id.clone(),
            issuer,
            subject_name_id,
            name_id_format,
            attributes,
            not_before,
            not_on_or_after,
            audiences: extract_audiences(xml),
            session_index,
        })
    }
}

/// Collect the text content of every `Audience` element, whatever its
/// namespace prefix.
fn extract_audiences(xml: &str) -> Vec<String> {
    let mut audiences = Vec::new();
    let mut cursor = 0;
    while let Some(found) = xml[cursor..].find("Audience>") {
        let tag_end = cursor + found + "Audience>".len();
        cursor = tag_end;

        let tag_start = match xml[..tag_end].rfind('<') {
            Some(pos) => pos,
            None => continue,
        };
        if xml[tag_start..].starts_with("</") {
            continue;
        }
        if let Some(text_len) = xml[tag_end..].find('<') {
            let value = xml[tag_end..tag_end + text_len].trim();
            if !value.is_empty() {
                audiences.push(value.to_string());
            }
        }
    }
    audiences
}
