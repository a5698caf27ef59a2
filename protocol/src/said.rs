//! # Self-Addressing Digests
//!
//! A SAID is a digest embedded in the very structure it identifies. To
//! compute one we:
//!
//! 1. fill the digest field(s) with a placeholder of `#` characters exactly
//!    as long as the final digest token,
//! 2. if the structure carries a version string `v`, rewrite its size
//!    component to the byte length of the serialization ("sizeify"),
//! 3. serialize to compact JSON in field insertion order,
//! 4. hash with the algorithm the digest code names,
//! 5. write the coded digest back into the field(s).
//!
//! Because the placeholder and the digest have the same length, step 2's
//! size is also the size of the finished structure. Verification blanks the
//! field(s) again and recomputes with the stored token's algorithm; the
//! version string is left as received, so tampering with it is detected
//! like tampering with any other byte.

use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{
    ACDC_PROTOCOL, DIGEST_PLACEHOLDER, KERI_PROTOCOL, SERIALIZATION_KIND, VERSION_MAJOR,
    VERSION_MINOR, VERSION_SIZE_DIGITS, VERSION_STRING_LENGTH, VERSION_TERMINATOR,
};
use crate::crypto::codec::{Matter, MatterCode};
use crate::crypto::hash::digest;
use crate::error::{ChainError, Result, ValidationError};

/// Default label of the digest field.
pub const DEFAULT_LABEL: &str = "d";

/// Label of the version-string field.
pub const VERSION_LABEL: &str = "v";

// ---------------------------------------------------------------------------
// Version strings
// ---------------------------------------------------------------------------

/// A parsed version string such as `KERI10JSON00011c_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub protocol: &'static str,
    pub major: u8,
    pub minor: u8,
    pub size: usize,
}

impl Version {
    /// Render for `protocol` with the crate's version and a serialized size.
    pub fn render(protocol: &str, size: usize) -> String {
        format!(
            "{protocol}{VERSION_MAJOR:x}{VERSION_MINOR:x}{SERIALIZATION_KIND}{size:0width$x}{VERSION_TERMINATOR}",
            width = VERSION_SIZE_DIGITS
        )
    }

    /// Parse and validate a version string.
    pub fn parse(vs: &str) -> Result<Self> {
        let invalid = || ValidationError::InvalidVersion(vs.to_string());
        if vs.len() != VERSION_STRING_LENGTH || !vs.is_ascii() || !vs.ends_with(VERSION_TERMINATOR)
        {
            return Err(invalid().into());
        }
        let protocol = match &vs[..4] {
            KERI_PROTOCOL => KERI_PROTOCOL,
            ACDC_PROTOCOL => ACDC_PROTOCOL,
            _ => return Err(invalid().into()),
        };
        let major = u8::from_str_radix(&vs[4..5], 16).map_err(|_| invalid())?;
        let minor = u8::from_str_radix(&vs[5..6], 16).map_err(|_| invalid())?;
        if &vs[6..10] != SERIALIZATION_KIND {
            return Err(invalid().into());
        }
        let size = usize::from_str_radix(&vs[10..16], 16).map_err(|_| invalid())?;
        Ok(Self {
            protocol,
            major,
            minor,
            size,
        })
    }
}

/// Rewrite the size component of `map["v"]` to the length of the serialized
/// map, returning the final serialization.
///
/// The map must already hold its final field lengths (digest placeholders
/// in place), since the size is frozen into the version string.
pub fn sizeify(map: &mut Map<String, Value>) -> Result<Vec<u8>> {
    let protocol = match map.get(VERSION_LABEL) {
        Some(Value::String(vs)) => Version::parse(vs)?.protocol,
        Some(_) => return Err(ValidationError::InvalidVersion("non-string `v`".into()).into()),
        None => return Err(ValidationError::MissingField(VERSION_LABEL.into()).into()),
    };
    let size = serde_json::to_vec(map)?.len();
    map.insert(
        VERSION_LABEL.to_string(),
        Value::String(Version::render(protocol, size)),
    );
    let raw = serde_json::to_vec(map)?;
    debug_assert_eq!(raw.len(), size);
    Ok(raw)
}

// ---------------------------------------------------------------------------
// Saider
// ---------------------------------------------------------------------------

/// Computes and verifies self-addressing digests over JSON objects.
pub struct Saider;

impl Saider {
    /// The placeholder string for a digest of `code`.
    pub fn placeholder(code: MatterCode) -> String {
        std::iter::repeat(DIGEST_PLACEHOLDER)
            .take(code.full_size())
            .collect()
    }

    /// SAID `value` on a single field. Returns the updated value and the
    /// digest token.
    pub fn saidify(value: &Value, code: MatterCode, label: &str) -> Result<(Value, String)> {
        Self::saidify_labels(value, code, &[label])
    }

    /// SAID `value`, writing the same digest into every field in `labels`.
    ///
    /// Self-naming inceptions use this with `["i", "d"]`: the prefix and the
    /// event digest are the same value, computed with both blanked.
    pub fn saidify_labels(
        value: &Value,
        code: MatterCode,
        labels: &[&str],
    ) -> Result<(Value, String)> {
        if !code.is_digest() {
            return Err(ValidationError::Codec(crate::crypto::CodecError::UnexpectedCode {
                expected: "a digest code",
                got: code.code().to_string(),
            })
            .into());
        }
        let mut map = object(value)?.clone();
        let placeholder = Self::placeholder(code);
        for label in labels {
            if !map.contains_key(*label) {
                return Err(ValidationError::MissingField((*label).to_string()).into());
            }
            map.insert((*label).to_string(), Value::String(placeholder.clone()));
        }

        let raw = if map.contains_key(VERSION_LABEL) {
            sizeify(&mut map)?
        } else {
            serde_json::to_vec(&map)?
        };

        let said = digest(code, &raw)?.qb64();
        for label in labels {
            map.insert((*label).to_string(), Value::String(said.clone()));
        }
        debug!(code = %code, size = raw.len(), "computed self-addressing digest");
        Ok((Value::Object(map), said))
    }

    /// Verify the digest stored in `label`.
    pub fn verify(value: &Value, label: &str) -> Result<()> {
        Self::verify_labels(value, &[label])
    }

    /// Verify a digest shared by every field in `labels`. All fields must
    /// hold the same token and it must match recomputation.
    pub fn verify_labels(value: &Value, labels: &[&str]) -> Result<()> {
        let map = object(value)?;
        let first = labels
            .first()
            .ok_or_else(|| ValidationError::MissingField(DEFAULT_LABEL.into()))?;
        let stored = string_field(map, first)?;
        let code = Matter::from_qb64(stored)?.code();

        let mut blanked = map.clone();
        let placeholder = Self::placeholder(code);
        for label in labels {
            let other = string_field(map, label)?;
            if other != stored {
                return Err(ChainError::DigestMismatch {
                    label: (*label).to_string(),
                    stored: other.to_string(),
                    computed: stored.to_string(),
                }
                .into());
            }
            blanked.insert((*label).to_string(), Value::String(placeholder.clone()));
        }

        let raw = serde_json::to_vec(&blanked)?;
        let computed = digest(code, &raw)?.qb64();
        if computed != stored {
            return Err(ChainError::DigestMismatch {
                label: (*first).to_string(),
                stored: stored.to_string(),
                computed,
            }
            .into());
        }
        Ok(())
    }
}

fn object(value: &Value) -> Result<&Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        ValidationError::Serialization("self-addressed data must be a JSON object".into()).into()
    })
}

fn string_field<'a>(map: &'a Map<String, Value>, label: &str) -> Result<&'a str> {
    map.get(label)
        .ok_or_else(|| ValidationError::MissingField(label.to_string()))?
        .as_str()
        .ok_or_else(|| ValidationError::MalformedEvent(format!("`{label}` must be a string")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SignifyError;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "v": "KERI10JSON000000_",
            "t": "rpy",
            "d": "",
            "dt": "2024-01-01T00:00:00.000000+00:00",
            "r": "/end/role/add",
            "a": {"cid": "abc", "role": "agent"}
        })
    }

    #[test]
    fn test_version_render_and_parse() {
        let vs = Version::render(KERI_PROTOCOL, 0x11c);
        assert_eq!(vs, "KERI10JSON00011c_");
        let parsed = Version::parse(&vs).unwrap();
        assert_eq!(parsed.protocol, "KERI");
        assert_eq!(parsed.size, 0x11c);
    }

    #[test]
    fn test_bad_version_strings_rejected() {
        for vs in ["KERI10JSON00011c", "XXXX10JSON00011c_", "KERI10CBOR00011c_"] {
            assert!(Version::parse(vs).is_err(), "{vs} should be rejected");
        }
    }

    #[test]
    fn test_saidify_then_verify() {
        let (value, said) = Saider::saidify(&sample(), MatterCode::Blake3Digest, "d").unwrap();
        assert_eq!(said.len(), 44);
        assert!(said.starts_with('E'));
        assert_eq!(value["d"], said);
        assert!(Saider::verify(&value, "d").is_ok());
    }

    #[test]
    fn test_version_size_matches_serialization() {
        let (value, _) = Saider::saidify(&sample(), MatterCode::Blake3Digest, "d").unwrap();
        let raw = serde_json::to_vec(&value).unwrap();
        let version = Version::parse(value["v"].as_str().unwrap()).unwrap();
        assert_eq!(version.size, raw.len());
    }

    #[test]
    fn test_any_mutation_breaks_verification() {
        let (value, _) = Saider::saidify(&sample(), MatterCode::Blake3Digest, "d").unwrap();
        let mut tampered = value.clone();
        tampered["r"] = json!("/end/role/cut");
        assert!(matches!(
            Saider::verify(&tampered, "d"),
            Err(SignifyError::Chain(ChainError::DigestMismatch { .. }))
        ));

        let mut resized = value;
        resized["v"] = json!("KERI10JSON000001_");
        assert!(Saider::verify(&resized, "d").is_err());
    }

    #[test]
    fn test_sha256_code_is_honoured() {
        let (value, said) = Saider::saidify(&sample(), MatterCode::Sha256Digest, "d").unwrap();
        assert!(said.starts_with('I'));
        assert!(Saider::verify(&value, "d").is_ok());
    }

    #[test]
    fn test_missing_label_fails_validation() {
        let err = Saider::saidify(&json!({"x": 1}), MatterCode::Blake3Digest, "d").unwrap_err();
        assert!(matches!(
            err,
            SignifyError::Validation(ValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_multi_label_said() {
        let value = json!({"v": "KERI10JSON000000_", "t": "icp", "d": "", "i": "", "s": "0"});
        let (value, said) =
            Saider::saidify_labels(&value, MatterCode::Blake3Digest, &["i", "d"]).unwrap();
        assert_eq!(value["i"], said);
        assert!(Saider::verify_labels(&value, &["i", "d"]).is_ok());
        // Checked on `d` alone the blanked `i` is missing from the preimage.
        assert!(Saider::verify(&value, "d").is_err());
    }

    #[test]
    fn test_object_without_version_is_plain_digest() {
        let (value, _) =
            Saider::saidify(&json!({"d": "", "n": 1}), MatterCode::Blake3Digest, "d").unwrap();
        assert!(Saider::verify(&value, "d").is_ok());
    }
}
