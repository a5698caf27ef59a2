//! # Hashing Utilities
//!
//! Two digest algorithms are understood, and the derivation code on every
//! digest token says which one produced it:
//!
//! - **BLAKE3-256** (`E`): the default for everything we create: event
//!   SAIDs, identifier prefixes, next-key commitments.
//! - **SHA2-256** (`I`): accepted and produced on request, for peers that
//!   committed with it.
//!
//! Verification always recomputes with the algorithm named by the stored
//! token's code, never with a hard-wired default. That is what lets a log
//! mix digest algorithms across events without anyone having to configure
//! anything.

use sha2::{Digest, Sha256};

use super::codec::{CodecError, Matter, MatterCode};

/// SHA2-256 of `data`.
///
/// ```
/// use signify_protocol::crypto::sha256;
///
/// assert_eq!(sha256(b"").len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// BLAKE3-256 of `data`.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    blake3::hash(data).into()
}

/// BLAKE3 in `derive_key` mode: a 32-byte key for `context` drawn from
/// `material`. Keeper secret sealing keys come from here.
pub fn domain_separated_hash(context: &str, material: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, material)
}

/// Digest `data` with the algorithm named by `code`, returning the coded
/// digest.
///
/// Fails with [`CodecError::UnexpectedCode`] when `code` is not a digest code.
pub fn digest(code: MatterCode, data: &[u8]) -> Result<Matter, CodecError> {
    let raw = match code {
        MatterCode::Blake3Digest => blake3_hash(data),
        MatterCode::Sha256Digest => sha256(data),
        other => {
            return Err(CodecError::UnexpectedCode {
                expected: "a digest code",
                got: other.code().to_string(),
            })
        }
    };
    Matter::new(code, &raw)
}

/// Check `data` against a stored qb64 digest, using the stored token's own
/// algorithm.
pub fn verify_digest(stored: &str, data: &[u8]) -> Result<bool, CodecError> {
    let stored = Matter::from_qb64_expecting(stored, "a digest", MatterCode::is_digest)?;
    let computed = digest(stored.code(), data)?;
    Ok(computed.raw() == stored.raw())
}
