//! # Request Authentication
//!
//! Every HTTP exchange between the client and its agent is signed in both
//! directions. The signer builds a *signature base* from an ordered list of
//! covered fields, signs it with Ed25519, and sends two headers:
//!
//! ```text
//! Signature-Input: signify=("@method" "@path" "signify-resource" "signify-timestamp");created=1700000000;alg="ed25519";keyid="D..."
//! Signature: indexed="?0";signify="0B..."
//! ```
//!
//! The base is one line per covered field followed by the parameters line:
//!
//! ```text
//! "@method": POST
//! "@path": /identifiers
//! "signify-resource": E...
//! "signify-timestamp": 2024-01-01T00:00:00.000000+00:00
//! "@signature-params: ("@method" "@path" "signify-resource" "signify-timestamp");created=1700000000;alg=ed25519;keyid=D..."
//! ```
//!
//! The verifier rebuilds the base from the headers it *received* plus the
//! method and path it *expected*, so tampering with any covered header, the
//! method or the path breaks the signature.
//!
//! ## Identity before cryptography
//!
//! `verify` first checks that the response claims to come from the expected
//! identifier and key. A mismatch there is an [`AuthError`], not a `false`:
//! a response from the wrong party is a different failure from a forged one.

use chrono::Utc;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use tracing::{debug, warn};

use crate::config::{
    DEFAULT_COVERED_FIELDS, HEADER_RESOURCE, HEADER_SIGNATURE, HEADER_SIGNATURE_INPUT,
    SIGNATURE_ALGORITHM, SIGNATURE_LABEL,
};
use crate::crypto::{Cigar, Signer, Verfer};
use crate::error::{AuthError, Result};

/// Fields a peer's signature must cover for us to accept it.
const REQUIRED_FIELDS: [&str; 3] = ["@method", "@path", HEADER_RESOURCE];

/// Parsed `Signature-Input` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInput {
    pub fields: Vec<String>,
    pub created: i64,
    pub alg: String,
    pub keyid: String,
}

impl SignatureInput {
    /// Parameters as they appear inside the signature base.
    fn params(&self) -> String {
        format!(
            "({});created={};alg={};keyid={}",
            quoted_list(&self.fields),
            self.created,
            self.alg,
            self.keyid
        )
    }

    /// Header value: `signify=(...);created=...;alg="...";keyid="..."`.
    fn header_value(&self) -> String {
        format!(
            "{SIGNATURE_LABEL}=({});created={};alg=\"{}\";keyid=\"{}\"",
            quoted_list(&self.fields),
            self.created,
            self.alg,
            self.keyid
        )
    }

    /// Parse our entry out of a `Signature-Input` header.
    pub fn parse(value: &str) -> std::result::Result<Self, AuthError> {
        let malformed = |reason: &str| AuthError::MalformedHeader {
            header: HEADER_SIGNATURE_INPUT,
            reason: reason.to_string(),
        };
        let entry = input_entry(value, SIGNATURE_LABEL)
            .ok_or_else(|| malformed("no `signify` entry"))?;
        let rest = entry
            .strip_prefix('(')
            .ok_or_else(|| malformed("covered fields must be a parenthesized list"))?;
        let (list, params) = rest
            .split_once(')')
            .ok_or_else(|| malformed("unterminated covered field list"))?;
        let fields: Vec<String> = list
            .split_whitespace()
            .map(|f| f.trim_matches('"').to_string())
            .collect();

        let mut created = None;
        let mut alg = None;
        let mut keyid = None;
        for param in params.split(';').filter(|p| !p.is_empty()) {
            let (key, val) = param
                .split_once('=')
                .ok_or_else(|| malformed("parameter without a value"))?;
            let val = val.trim_matches('"');
            match key.trim() {
                "created" => {
                    created = Some(
                        val.parse::<i64>()
                            .map_err(|_| malformed("`created` is not an integer"))?,
                    )
                }
                "alg" => alg = Some(val.to_string()),
                "keyid" => keyid = Some(val.to_string()),
                _ => {}
            }
        }
        Ok(Self {
            fields,
            created: created.ok_or_else(|| malformed("missing `created`"))?,
            alg: alg.ok_or_else(|| malformed("missing `alg`"))?,
            keyid: keyid.ok_or_else(|| malformed("missing `keyid`"))?,
        })
    }
}

/// Signs outgoing messages and verifies incoming ones.
///
/// Borrows the local signing key and the remote party's prefix and key;
/// an authenticator never outlives the session that owns them.
#[derive(Debug, Clone, Copy)]
pub struct Authenticator<'a> {
    signer: &'a Signer,
    remote_pre: &'a str,
    remote: &'a Verfer,
}

impl<'a> Authenticator<'a> {
    pub fn new(signer: &'a Signer, remote_pre: &'a str, remote: &'a Verfer) -> Self {
        Self {
            signer,
            remote_pre,
            remote,
        }
    }

    /// Sign `headers` for `method` and `path`, stamped with the current time.
    pub fn sign(&self, headers: &HeaderMap, method: &Method, path: &str) -> Result<HeaderMap> {
        self.sign_at(headers, method, path, Utc::now().timestamp())
    }

    /// Sign with an explicit `created` time (unix seconds).
    ///
    /// Returns a copy of `headers` with `Signature-Input` and `Signature`
    /// added. Covered headers missing from `headers` are left out of the
    /// covered field list.
    pub fn sign_at(
        &self,
        headers: &HeaderMap,
        method: &Method,
        path: &str,
        created: i64,
    ) -> Result<HeaderMap> {
        let fields: Vec<String> = DEFAULT_COVERED_FIELDS
            .iter()
            .filter(|f| f.starts_with('@') || headers.contains_key(**f))
            .map(|f| f.to_string())
            .collect();
        let input = SignatureInput {
            fields,
            created,
            alg: SIGNATURE_ALGORITHM.to_string(),
            keyid: self.signer.verfer().qb64(),
        };
        let base = signature_base(headers, method, path, &input)?;
        let cigar = self.signer.sign(base.as_bytes());

        let mut signed = headers.clone();
        signed.insert(
            HeaderName::from_static(HEADER_SIGNATURE_INPUT),
            header_value(HEADER_SIGNATURE_INPUT, input.header_value())?,
        );
        signed.insert(
            HeaderName::from_static(HEADER_SIGNATURE),
            header_value(
                HEADER_SIGNATURE,
                format!("indexed=\"?0\";{SIGNATURE_LABEL}=\"{}\"", cigar.qb64()),
            )?,
        );
        debug!(%method, path, keyid = %input.keyid, "signed message");
        Ok(signed)
    }

    /// Verify a message from the remote party.
    ///
    /// Identity problems (wrong resource, wrong key, missing or malformed
    /// signature headers) are errors. A well-formed message whose signature
    /// does not verify returns `Ok(false)`.
    pub fn verify(&self, headers: &HeaderMap, method: &Method, path: &str) -> Result<bool> {
        let resource = header_str(headers, HEADER_RESOURCE)?
            .ok_or(AuthError::MissingHeader(HEADER_RESOURCE))?;
        if resource != self.remote_pre {
            warn!(expected = %self.remote_pre, got = %resource, "message from a different identity");
            return Err(AuthError::IdentityMismatch {
                expected: self.remote_pre.to_string(),
                got: resource.to_string(),
            }
            .into());
        }

        let input = header_str(headers, HEADER_SIGNATURE_INPUT)?
            .ok_or(AuthError::MissingHeader(HEADER_SIGNATURE_INPUT))?;
        let input = SignatureInput::parse(input)?;
        let signature = header_str(headers, HEADER_SIGNATURE)?
            .ok_or(AuthError::MissingHeader(HEADER_SIGNATURE))?;
        let signature =
            signature_entry(signature, SIGNATURE_LABEL).ok_or(AuthError::MalformedHeader {
                header: HEADER_SIGNATURE,
                reason: "no `signify` entry".into(),
            })?;

        let expected_key = self.remote.qb64();
        if input.keyid != expected_key {
            warn!(expected = %expected_key, got = %input.keyid, "message signed by an unexpected key");
            return Err(AuthError::KeyMismatch {
                expected: expected_key,
                got: input.keyid,
            }
            .into());
        }
        if input.alg != SIGNATURE_ALGORITHM {
            return Err(AuthError::MalformedHeader {
                header: HEADER_SIGNATURE_INPUT,
                reason: format!("unsupported algorithm `{}`", input.alg),
            }
            .into());
        }
        if let Some(missing) = REQUIRED_FIELDS
            .iter()
            .find(|f| !input.fields.iter().any(|c| c.as_str() == **f))
        {
            return Err(AuthError::MalformedHeader {
                header: HEADER_SIGNATURE_INPUT,
                reason: format!("signature does not cover `{missing}`"),
            }
            .into());
        }

        let cigar = Cigar::from_qb64(signature, Some(self.remote.clone()))
            .map_err(|e| AuthError::MalformedHeader {
                header: HEADER_SIGNATURE,
                reason: e.to_string(),
            })?;
        let base = signature_base(headers, method, path, &input)?;
        let verified = cigar.verify(base.as_bytes());
        if !verified {
            warn!(%method, path, "signature verification failed");
        }
        Ok(verified)
    }
}

/// Build the signature base for `input.fields` from `headers`.
fn signature_base(
    headers: &HeaderMap,
    method: &Method,
    path: &str,
    input: &SignatureInput,
) -> Result<String> {
    let mut lines = Vec::with_capacity(input.fields.len() + 1);
    for field in &input.fields {
        let value = match field.as_str() {
            "@method" => method.as_str(),
            "@path" => path,
            name => {
                let value = headers.get(name).map(|v| v.to_str()).transpose();
                match value.map_err(|_| AuthError::MalformedHeader {
                    header: "covered header",
                    reason: format!("`{name}` is not visible ASCII"),
                })? {
                    Some(value) => value,
                    None => continue,
                }
            }
        };
        lines.push(format!("\"{field}\": {value}"));
    }
    lines.push(format!("\"@signature-params: {}\"", input.params()));
    Ok(lines.join("\n"))
}

fn quoted_list(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| format!("\"{f}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Our member of a `Signature-Input` dictionary: the inner list plus its
/// `;` parameters, up to the next `,` member.
fn input_entry<'v>(value: &'v str, label: &str) -> Option<&'v str> {
    value
        .split(',')
        .map(str::trim)
        .find_map(|member| member.strip_prefix(label)?.strip_prefix('='))
}

/// Our parameter of a `Signature` header, unquoted.
fn signature_entry<'v>(value: &'v str, label: &str) -> Option<&'v str> {
    value
        .split([',', ';'])
        .map(str::trim)
        .find_map(|member| member.strip_prefix(label)?.strip_prefix('='))
        .map(|v| v.trim_matches('"'))
}

fn header_str<'h>(headers: &'h HeaderMap, name: &'static str) -> Result<Option<&'h str>> {
    headers
        .get(name)
        .map(|value| value.to_str())
        .transpose()
        .map_err(|_| {
            AuthError::MalformedHeader {
                header: name,
                reason: "value is not visible ASCII".into(),
            }
            .into()
        })
}

pub(crate) fn header_value(header: &'static str, value: String) -> Result<HeaderValue> {
    HeaderValue::from_str(&value).map_err(|_| {
        AuthError::MalformedHeader {
            header,
            reason: "value is not a valid header".into(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEADER_TIMESTAMP;
    use crate::SignifyError;

    const CREATED: i64 = 1_700_000_000;

    struct Peers {
        client: Signer,
        agent: Signer,
        client_pre: String,
        agent_pre: String,
    }

    fn peers() -> Peers {
        Peers {
            client: Signer::from_seed(&[1u8; 32], true),
            agent: Signer::from_seed(&[2u8; 32], true),
            client_pre: "EClientPrefix".to_string(),
            agent_pre: "EAgentPrefix".to_string(),
        }
    }

    fn headers(resource: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_RESOURCE, HeaderValue::from_str(resource).unwrap());
        headers.insert(
            HEADER_TIMESTAMP,
            HeaderValue::from_static("2023-11-14T22:13:20.000000+00:00"),
        );
        headers
    }

    /// Headers signed by the agent, verified by the client.
    fn agent_signed(p: &Peers, method: &Method, path: &str) -> HeaderMap {
        let client_verfer = p.client.verfer();
        Authenticator::new(&p.agent, &p.client_pre, &client_verfer)
            .sign_at(&headers(&p.agent_pre), method, path, CREATED)
            .unwrap()
    }

    #[test]
    fn test_sign_then_verify() {
        let p = peers();
        let signed = agent_signed(&p, &Method::POST, "/foo");
        let agent_verfer = p.agent.verfer();
        let authn = Authenticator::new(&p.client, &p.agent_pre, &agent_verfer);
        assert!(authn.verify(&signed, &Method::POST, "/foo").unwrap());
    }

    #[test]
    fn test_method_or_path_change_fails() {
        let p = peers();
        let signed = agent_signed(&p, &Method::POST, "/foo");
        let agent_verfer = p.agent.verfer();
        let authn = Authenticator::new(&p.client, &p.agent_pre, &agent_verfer);
        assert!(!authn.verify(&signed, &Method::GET, "/foo").unwrap());
        assert!(!authn.verify(&signed, &Method::POST, "/bar").unwrap());
    }

    #[test]
    fn test_tampered_timestamp_fails() {
        let p = peers();
        let mut signed = agent_signed(&p, &Method::POST, "/foo");
        signed.insert(
            HEADER_TIMESTAMP,
            HeaderValue::from_static("2023-11-14T22:13:21.000000+00:00"),
        );
        let agent_verfer = p.agent.verfer();
        let authn = Authenticator::new(&p.client, &p.agent_pre, &agent_verfer);
        assert!(!authn.verify(&signed, &Method::POST, "/foo").unwrap());
    }

    #[test]
    fn test_header_shapes() {
        let p = peers();
        let signed = agent_signed(&p, &Method::POST, "/foo");
        let input = signed.get(HEADER_SIGNATURE_INPUT).unwrap().to_str().unwrap();
        assert_eq!(
            input,
            format!(
                "signify=(\"@method\" \"@path\" \"signify-resource\" \"signify-timestamp\");created={CREATED};alg=\"ed25519\";keyid=\"{}\"",
                p.agent.verfer().qb64()
            )
        );
        let signature = signed.get(HEADER_SIGNATURE).unwrap().to_str().unwrap();
        assert!(signature.starts_with("indexed=\"?0\";signify=\"0B"));
    }

    #[test]
    fn test_signature_base_layout() {
        let p = peers();
        let input = SignatureInput {
            fields: vec!["@method".into(), "@path".into(), HEADER_RESOURCE.into()],
            created: CREATED,
            alg: "ed25519".into(),
            keyid: "Dkey".into(),
        };
        let base = signature_base(&headers(&p.agent_pre), &Method::GET, "/x", &input).unwrap();
        assert_eq!(
            base,
            "\"@method\": GET\n\"@path\": /x\n\"signify-resource\": EAgentPrefix\n\
             \"@signature-params: (\"@method\" \"@path\" \"signify-resource\");created=1700000000;alg=ed25519;keyid=Dkey\""
        );
    }

    #[test]
    fn test_absent_timestamp_is_not_covered() {
        let p = peers();
        let mut unsigned = headers(&p.agent_pre);
        unsigned.remove(HEADER_TIMESTAMP);
        let client_verfer = p.client.verfer();
        let signed = Authenticator::new(&p.agent, &p.client_pre, &client_verfer)
            .sign_at(&unsigned, &Method::GET, "/", CREATED)
            .unwrap();
        let input = SignatureInput::parse(
            signed.get(HEADER_SIGNATURE_INPUT).unwrap().to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(input.fields, vec!["@method", "@path", "signify-resource"]);

        let agent_verfer = p.agent.verfer();
        let authn = Authenticator::new(&p.client, &p.agent_pre, &agent_verfer);
        assert!(authn.verify(&signed, &Method::GET, "/").unwrap());
    }

    #[test]
    fn test_identity_mismatch_is_an_error() {
        let p = peers();
        let signed = agent_signed(&p, &Method::POST, "/foo");
        let agent_verfer = p.agent.verfer();
        let authn = Authenticator::new(&p.client, "ESomeoneElse", &agent_verfer);
        assert!(matches!(
            authn.verify(&signed, &Method::POST, "/foo"),
            Err(SignifyError::Authentication(AuthError::IdentityMismatch { .. }))
        ));
    }

    #[test]
    fn test_unexpected_key_is_an_error() {
        let p = peers();
        let signed = agent_signed(&p, &Method::POST, "/foo");
        let stranger = Signer::from_seed(&[3u8; 32], true).verfer();
        let authn = Authenticator::new(&p.client, &p.agent_pre, &stranger);
        assert!(matches!(
            authn.verify(&signed, &Method::POST, "/foo"),
            Err(SignifyError::Authentication(AuthError::KeyMismatch { .. }))
        ));
    }

    #[test]
    fn test_missing_headers_are_errors() {
        let p = peers();
        let agent_verfer = p.agent.verfer();
        let authn = Authenticator::new(&p.client, &p.agent_pre, &agent_verfer);

        assert!(matches!(
            authn.verify(&HeaderMap::new(), &Method::GET, "/"),
            Err(SignifyError::Authentication(AuthError::MissingHeader(HEADER_RESOURCE)))
        ));
        assert!(matches!(
            authn.verify(&headers(&p.agent_pre), &Method::GET, "/"),
            Err(SignifyError::Authentication(AuthError::MissingHeader(
                HEADER_SIGNATURE_INPUT
            )))
        ));
    }

    #[test]
    fn test_uncovered_path_rejected() {
        let p = peers();
        let mut signed = agent_signed(&p, &Method::POST, "/foo");
        let narrowed = format!(
            "signify=(\"@method\" \"signify-resource\");created={CREATED};alg=\"ed25519\";keyid=\"{}\"",
            p.agent.verfer().qb64()
        );
        signed.insert(
            HEADER_SIGNATURE_INPUT,
            HeaderValue::from_str(&narrowed).unwrap(),
        );
        let agent_verfer = p.agent.verfer();
        let authn = Authenticator::new(&p.client, &p.agent_pre, &agent_verfer);
        assert!(matches!(
            authn.verify(&signed, &Method::POST, "/foo"),
            Err(SignifyError::Authentication(AuthError::MalformedHeader { .. }))
        ));
    }

    #[test]
    fn test_parse_signature_input_among_other_members() {
        let parsed = SignatureInput::parse(
            "other=(\"@path\");created=1, signify=(\"@method\" \"@path\");created=5;alg=\"ed25519\";keyid=\"Dabc\"",
        )
        .unwrap();
        assert_eq!(parsed.fields, vec!["@method", "@path"]);
        assert_eq!(parsed.created, 5);
        assert_eq!(parsed.keyid, "Dabc");
    }
}
