//! # Derivation-Coded Text Tokens
//!
//! Every key, digest, salt and signature the engine handles travels as a
//! compact base64url token whose first one or two characters say what the
//! bytes are. The encoding is fixed-width per code:
//!
//! ```text
//! raw (n bytes) -> prepend ps = (3 - n % 3) % 3 zero bytes
//!              -> base64url without padding
//!              -> drop the first ps characters (they are all 'A')
//!              -> prepend the code (exactly ps characters long)
//! ```
//!
//! Because the code occupies the characters that only ever encoded zero
//! padding, the token length is a multiple of four and the raw bytes are
//! aligned on a 24-bit boundary. Decoding reverses the steps and refuses
//! tokens whose pad bits are not zero.
//!
//! Indexed signatures use a second table: the code is followed by the
//! signer's position in the key list (and, for the large form, a second
//! "ondex" position in the prior next-key list).

use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// base64url alphabet, in index order.
const B64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Errors raised while encoding or decoding tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("empty token")]
    Empty,

    #[error("unknown derivation code `{0}`")]
    UnknownCode(String),

    #[error("token for code `{code}` must be {expected} characters, got {got}")]
    InvalidTokenLength {
        code: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("raw material for code `{code}` must be {expected} bytes, got {got}")]
    InvalidRawLength {
        code: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid base64url text: {0}")]
    InvalidBase64(String),

    #[error("non-zero pad bits in token")]
    NonZeroPadding,

    #[error("signature index {0} out of range for code")]
    IndexOutOfRange(u32),

    #[error("token of code `{got}` used where {expected} was expected")]
    UnexpectedCode { expected: &'static str, got: String },
}

// ---------------------------------------------------------------------------
// Matter codes
// ---------------------------------------------------------------------------

/// Derivation codes for non-indexed primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatterCode {
    /// `A`: 32-byte Ed25519 private seed.
    Ed25519Seed,
    /// `B`: Ed25519 verification key of a non-transferable identifier.
    Ed25519NonTransferable,
    /// `D`: Ed25519 verification key of a transferable identifier.
    Ed25519,
    /// `E`: Blake3-256 digest.
    Blake3Digest,
    /// `I`: SHA2-256 digest.
    Sha256Digest,
    /// `0A`: 128-bit salt.
    Salt128,
    /// `0B`: detached Ed25519 signature.
    Ed25519Signature,
}

impl MatterCode {
    const ALL: [MatterCode; 7] = [
        MatterCode::Ed25519Seed,
        MatterCode::Ed25519NonTransferable,
        MatterCode::Ed25519,
        MatterCode::Blake3Digest,
        MatterCode::Sha256Digest,
        MatterCode::Salt128,
        MatterCode::Ed25519Signature,
    ];

    /// The code text.
    pub const fn code(self) -> &'static str {
        match self {
            MatterCode::Ed25519Seed => "A",
            MatterCode::Ed25519NonTransferable => "B",
            MatterCode::Ed25519 => "D",
            MatterCode::Blake3Digest => "E",
            MatterCode::Sha256Digest => "I",
            MatterCode::Salt128 => "0A",
            MatterCode::Ed25519Signature => "0B",
        }
    }

    /// Size of the raw material in bytes.
    pub const fn raw_size(self) -> usize {
        match self {
            MatterCode::Salt128 => 16,
            MatterCode::Ed25519Signature => 64,
            _ => 32,
        }
    }

    /// Size of the full qb64 token in characters.
    pub const fn full_size(self) -> usize {
        let raw = self.raw_size();
        (raw + pad_size(raw)) / 3 * 4
    }

    /// True for codes naming a digest algorithm.
    pub const fn is_digest(self) -> bool {
        matches!(self, MatterCode::Blake3Digest | MatterCode::Sha256Digest)
    }

    /// True for codes naming a verification key.
    pub const fn is_verification_key(self) -> bool {
        matches!(
            self,
            MatterCode::Ed25519 | MatterCode::Ed25519NonTransferable
        )
    }

    /// Look a code up from the start of a token.
    pub fn from_token(token: &str) -> Result<Self, CodecError> {
        let first = token.chars().next().ok_or(CodecError::Empty)?;
        let code_len = if first.is_ascii_digit() { 2 } else { 1 };
        let code = token
            .get(..code_len)
            .ok_or_else(|| CodecError::UnknownCode(token.to_string()))?;
        Self::from_code(code)
    }

    /// Look a code up from its exact text.
    pub fn from_code(code: &str) -> Result<Self, CodecError> {
        Self::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| CodecError::UnknownCode(code.to_string()))
    }
}

impl fmt::Display for MatterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for MatterCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for MatterCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        MatterCode::from_code(&code).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Matter
// ---------------------------------------------------------------------------

/// A raw primitive tagged with its derivation code.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Matter {
    code: MatterCode,
    raw: Vec<u8>,
}

impl Matter {
    /// Wrap raw bytes, checking their length against the code.
    pub fn new(code: MatterCode, raw: &[u8]) -> Result<Self, CodecError> {
        if raw.len() != code.raw_size() {
            return Err(CodecError::InvalidRawLength {
                code: code.code(),
                expected: code.raw_size(),
                got: raw.len(),
            });
        }
        Ok(Self {
            code,
            raw: raw.to_vec(),
        })
    }

    /// Wrap bytes whose length the caller's type already guarantees.
    pub(crate) fn from_fixed<const N: usize>(code: MatterCode, raw: &[u8; N]) -> Self {
        debug_assert_eq!(N, code.raw_size());
        Self {
            code,
            raw: raw.to_vec(),
        }
    }

    /// Parse a qb64 token.
    pub fn from_qb64(token: &str) -> Result<Self, CodecError> {
        ensure_ascii(token)?;
        let code = MatterCode::from_token(token)?;
        if token.len() != code.full_size() {
            return Err(CodecError::InvalidTokenLength {
                code: code.code(),
                expected: code.full_size(),
                got: token.len(),
            });
        }
        let ps = pad_size(code.raw_size());
        let raw = decode_body(&token[code.code().len()..], ps)?;
        Self::new(code, &raw)
    }

    /// Parse a qb64 token and insist on a particular code family.
    pub fn from_qb64_expecting(
        token: &str,
        expected: &'static str,
        accept: impl Fn(MatterCode) -> bool,
    ) -> Result<Self, CodecError> {
        let matter = Self::from_qb64(token)?;
        if !accept(matter.code) {
            return Err(CodecError::UnexpectedCode {
                expected,
                got: matter.code.code().to_string(),
            });
        }
        Ok(matter)
    }

    pub fn code(&self) -> MatterCode {
        self.code
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Render as a qb64 token.
    pub fn qb64(&self) -> String {
        let ps = pad_size(self.raw.len());
        let mut out = String::with_capacity(self.code.full_size());
        out.push_str(self.code.code());
        out.push_str(&encode_body(&self.raw, ps));
        out
    }
}

impl fmt::Debug for Matter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            // Secrets never make it into debug output.
            MatterCode::Ed25519Seed | MatterCode::Salt128 => {
                write!(f, "Matter({}, <redacted>)", self.code)
            }
            _ => write!(f, "Matter({})", self.qb64()),
        }
    }
}

// ---------------------------------------------------------------------------
// Indexed signatures
// ---------------------------------------------------------------------------

/// Derivation codes for indexed signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexerCode {
    /// `A` + one index character: signer position below 64.
    Ed25519Sig,
    /// `2A` + two index characters + two ondex characters.
    Ed25519BigSig,
}

impl IndexerCode {
    pub const fn code(self) -> &'static str {
        match self {
            IndexerCode::Ed25519Sig => "A",
            IndexerCode::Ed25519BigSig => "2A",
        }
    }

    /// Characters spent on the index (and ondex) after the code.
    const fn index_chars(self) -> usize {
        match self {
            IndexerCode::Ed25519Sig => 1,
            IndexerCode::Ed25519BigSig => 2,
        }
    }

    const fn header_size(self) -> usize {
        match self {
            IndexerCode::Ed25519Sig => 2,
            IndexerCode::Ed25519BigSig => 6,
        }
    }

    pub const fn full_size(self) -> usize {
        match self {
            IndexerCode::Ed25519Sig => 88,
            IndexerCode::Ed25519BigSig => 92,
        }
    }

    /// Pick the smallest code that can carry `index`.
    pub fn for_index(index: u32) -> Result<Self, CodecError> {
        match index {
            0..=63 => Ok(IndexerCode::Ed25519Sig),
            64..=4095 => Ok(IndexerCode::Ed25519BigSig),
            _ => Err(CodecError::IndexOutOfRange(index)),
        }
    }
}

/// An indexed signature token: code, signer index, optional ondex, 64 raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Indexed {
    code: IndexerCode,
    index: u32,
    ondex: u32,
    raw: Vec<u8>,
}

impl Indexed {
    pub fn new(raw: &[u8], index: u32, ondex: Option<u32>) -> Result<Self, CodecError> {
        if raw.len() != 64 {
            return Err(CodecError::InvalidRawLength {
                code: "A",
                expected: 64,
                got: raw.len(),
            });
        }
        let mut code = IndexerCode::for_index(index)?;
        let ondex = ondex.unwrap_or(index);
        if ondex != index {
            // Only the large form has room for a distinct ondex.
            code = IndexerCode::Ed25519BigSig;
            if ondex > 4095 {
                return Err(CodecError::IndexOutOfRange(ondex));
            }
        }
        Ok(Self {
            code,
            index,
            ondex,
            raw: raw.to_vec(),
        })
    }

    pub fn from_qb64(token: &str) -> Result<Self, CodecError> {
        ensure_ascii(token)?;
        let code = if token.starts_with("2A") {
            IndexerCode::Ed25519BigSig
        } else if token.starts_with('A') {
            IndexerCode::Ed25519Sig
        } else {
            return Err(CodecError::UnknownCode(
                token.chars().take(2).collect::<String>(),
            ));
        };
        if token.len() != code.full_size() {
            return Err(CodecError::InvalidTokenLength {
                code: code.code(),
                expected: code.full_size(),
                got: token.len(),
            });
        }
        let hs = code.code().len();
        let n = code.index_chars();
        let index = b64_to_int(&token[hs..hs + n])?;
        let ondex = match code {
            IndexerCode::Ed25519Sig => index,
            IndexerCode::Ed25519BigSig => b64_to_int(&token[hs + n..hs + 2 * n])?,
        };
        let raw = decode_body(&token[code.header_size()..], 2)?;
        Ok(Self {
            code,
            index,
            ondex,
            raw,
        })
    }

    pub fn code(&self) -> IndexerCode {
        self.code
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn ondex(&self) -> u32 {
        self.ondex
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn qb64(&self) -> String {
        let mut out = String::with_capacity(self.code.full_size());
        out.push_str(self.code.code());
        let n = self.code.index_chars();
        out.push_str(&int_to_b64(self.index, n));
        if self.code == IndexerCode::Ed25519BigSig {
            out.push_str(&int_to_b64(self.ondex, n));
        }
        out.push_str(&encode_body(&self.raw, 2));
        out
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Number of zero bytes needed to align `raw_len` on a 24-bit boundary.
pub const fn pad_size(raw_len: usize) -> usize {
    (3 - raw_len % 3) % 3
}

fn encode_body(raw: &[u8], ps: usize) -> String {
    let mut padded = vec![0u8; ps];
    padded.extend_from_slice(raw);
    let text = URL_SAFE_NO_PAD.encode(&padded);
    text[ps..].to_string()
}

fn decode_body(body: &str, ps: usize) -> Result<Vec<u8>, CodecError> {
    let mut text = "A".repeat(ps);
    text.push_str(body);
    let bytes = URL_SAFE_NO_PAD
        .decode(text.as_bytes())
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
    if bytes.len() < ps || bytes[..ps].iter().any(|b| *b != 0) {
        return Err(CodecError::NonZeroPadding);
    }
    Ok(bytes[ps..].to_vec())
}

/// Encode `n` as exactly `len` base64 digits (most significant first).
pub fn int_to_b64(mut n: u32, len: usize) -> String {
    let mut digits = vec![b'A'; len];
    for slot in digits.iter_mut().rev() {
        *slot = B64_ALPHABET[(n % 64) as usize];
        n /= 64;
    }
    String::from_utf8_lossy(&digits).into_owned()
}

/// Decode a run of base64 digits into an integer.
pub fn b64_to_int(text: &str) -> Result<u32, CodecError> {
    text.bytes().try_fold(0u32, |acc, ch| {
        let digit = B64_ALPHABET
            .iter()
            .position(|c| *c == ch)
            .ok_or_else(|| CodecError::InvalidBase64(text.to_string()))?;
        Ok(acc * 64 + digit as u32)
    })
}

/// Tokens are sliced by byte offset, which is only sound for ASCII text.
fn ensure_ascii(token: &str) -> Result<(), CodecError> {
    if token.is_ascii() {
        Ok(())
    } else {
        Err(CodecError::InvalidBase64(format!("non-ASCII token {token:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sizes_match_table() {
        assert_eq!(MatterCode::Ed25519Seed.full_size(), 44);
        assert_eq!(MatterCode::Blake3Digest.full_size(), 44);
        assert_eq!(MatterCode::Salt128.full_size(), 24);
        assert_eq!(MatterCode::Ed25519Signature.full_size(), 88);
    }

    #[test]
    fn token_starts_with_code() {
        let matter = Matter::new(MatterCode::Ed25519, &[7u8; 32]).unwrap();
        let qb64 = matter.qb64();
        assert_eq!(qb64.len(), 44);
        assert!(qb64.starts_with('D'));
        assert_eq!(Matter::from_qb64(&qb64).unwrap(), matter);
    }

    #[test]
    fn zero_salt_has_known_form() {
        let salt = Matter::new(MatterCode::Salt128, &[0u8; 16]).unwrap();
        assert_eq!(salt.qb64(), "0AAAAAAAAAAAAAAAAAAAAAAA");
    }

    #[test]
    fn wrong_raw_length_rejected() {
        let err = Matter::new(MatterCode::Blake3Digest, &[1u8; 31]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidRawLength { got: 31, .. }));
    }

    #[test]
    fn truncated_token_rejected() {
        let qb64 = Matter::new(MatterCode::Blake3Digest, &[9u8; 32])
            .unwrap()
            .qb64();
        let err = Matter::from_qb64(&qb64[..43]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidTokenLength { .. }));
    }

    #[test]
    fn unknown_code_rejected() {
        let token = format!("Z{}", "A".repeat(43));
        assert!(matches!(
            Matter::from_qb64(&token),
            Err(CodecError::UnknownCode(_))
        ));
    }

    #[test]
    fn nonzero_pad_bits_rejected() {
        // The character after a one-char code carries the two pad bits.
        let token = format!("E_{}", "A".repeat(42));
        assert_eq!(Matter::from_qb64(&token), Err(CodecError::NonZeroPadding));
    }

    #[test]
    fn indexed_small_and_big_forms() {
        let raw = [5u8; 64];
        let small = Indexed::new(&raw, 3, None).unwrap();
        assert_eq!(small.code(), IndexerCode::Ed25519Sig);
        assert_eq!(small.qb64().len(), 88);
        assert!(small.qb64().starts_with("AD"));
        assert_eq!(Indexed::from_qb64(&small.qb64()).unwrap(), small);

        let big = Indexed::new(&raw, 70, Some(2)).unwrap();
        assert_eq!(big.code(), IndexerCode::Ed25519BigSig);
        let parsed = Indexed::from_qb64(&big.qb64()).unwrap();
        assert_eq!(parsed.index(), 70);
        assert_eq!(parsed.ondex(), 2);
        assert_eq!(parsed.raw(), &raw[..]);
    }

    #[test]
    fn index_beyond_big_form_rejected() {
        assert!(Indexed::new(&[0u8; 64], 5000, None).is_err());
    }

    #[test]
    fn b64_integer_helpers() {
        assert_eq!(int_to_b64(0, 1), "A");
        assert_eq!(int_to_b64(63, 1), "_");
        assert_eq!(int_to_b64(64, 2), "BA");
        assert_eq!(b64_to_int("BA").unwrap(), 64);
    }

    #[test]
    fn debug_redacts_secrets() {
        let seed = Matter::new(MatterCode::Ed25519Seed, &[1u8; 32]).unwrap();
        assert!(format!("{:?}", seed).contains("redacted"));
    }

    #[test]
    fn non_ascii_tokens_are_errors() {
        let siger = format!("Aé{}", "A".repeat(85));
        assert_eq!(siger.len(), 88);
        assert!(matches!(
            Indexed::from_qb64(&siger),
            Err(CodecError::InvalidBase64(_))
        ));

        let matter = format!("Dé{}", "A".repeat(41));
        assert!(matches!(
            Matter::from_qb64(&matter),
            Err(CodecError::InvalidBase64(_))
        ));
    }
}
