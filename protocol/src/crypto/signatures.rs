//! # Digital Signatures
//!
//! Two signature forms travel over the wire:
//!
//! - [`Cigar`]: a detached Ed25519 signature, code `0B`. Used for HTTP
//!   request signing where there is exactly one key and no list to index into.
//! - [`Siger`]: an indexed signature. The index says which key in the
//!   signed event's key list produced it, so a verifier facing a multi-key
//!   event knows which verification key to try without guessing.
//!
//! Verification is strict (ed25519-dalek's default) and never panics: a
//! malformed signature is simply "not valid".

use std::collections::BTreeSet;

use super::codec::{CodecError, Indexed, Matter, MatterCode};
use super::keys::Verfer;

/// A detached signature plus, when known, the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cigar {
    raw: [u8; 64],
    verfer: Option<Verfer>,
}

impl Cigar {
    pub fn new(raw: [u8; 64], verfer: Option<Verfer>) -> Self {
        Self { raw, verfer }
    }

    /// Parse a `0B` token. The verifying key is not part of the token and
    /// must be supplied separately.
    pub fn from_qb64(token: &str, verfer: Option<Verfer>) -> Result<Self, CodecError> {
        let matter = Matter::from_qb64_expecting(token, "a detached signature", |c| {
            c == MatterCode::Ed25519Signature
        })?;
        let mut raw = [0u8; 64];
        raw.copy_from_slice(matter.raw());
        Ok(Self { raw, verfer })
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn verfer(&self) -> Option<&Verfer> {
        self.verfer.as_ref()
    }

    pub fn qb64(&self) -> String {
        Matter::from_fixed(MatterCode::Ed25519Signature, &self.raw).qb64()
    }

    /// Verify against the attached key. `false` when no key is attached.
    pub fn verify(&self, message: &[u8]) -> bool {
        self.verfer
            .as_ref()
            .is_some_and(|verfer| verfer.verify(&self.raw, message))
    }
}

/// An indexed signature over a key event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Siger {
    indexed: Indexed,
    verfer: Option<Verfer>,
}

impl Siger {
    pub(crate) fn from_indexed(indexed: Indexed, verfer: Option<Verfer>) -> Self {
        Self { indexed, verfer }
    }

    pub fn from_qb64(token: &str) -> Result<Self, CodecError> {
        Ok(Self {
            indexed: Indexed::from_qb64(token)?,
            verfer: None,
        })
    }

    /// Position of the signing key in the event's current key list.
    pub fn index(&self) -> u32 {
        self.indexed.index()
    }

    /// Position of the signing key's digest in the prior next-key list.
    pub fn ondex(&self) -> u32 {
        self.indexed.ondex()
    }

    pub fn raw(&self) -> &[u8] {
        self.indexed.raw()
    }

    pub fn verfer(&self) -> Option<&Verfer> {
        self.verfer.as_ref()
    }

    pub fn qb64(&self) -> String {
        self.indexed.qb64()
    }
}

/// Verify a batch of indexed signatures against an ordered key list.
///
/// Returns the set of key indices that produced a valid signature over
/// `message`. Signatures whose index falls outside `verfers`, or that do
/// not verify, are silently dropped; the caller decides whether the
/// surviving set satisfies its threshold. Duplicate indices count once.
pub fn verify_indexed(sigers: &[Siger], verfers: &[Verfer], message: &[u8]) -> BTreeSet<usize> {
    sigers
        .iter()
        .filter_map(|siger| {
            let index = siger.index() as usize;
            let verfer = verfers.get(index)?;
            verfer.verify(siger.raw(), message).then_some(index)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Signer;

    #[test]
    fn test_cigar_token_shape() {
        let signer = Signer::random(true);
        let cigar = signer.sign(b"request");
        let qb64 = cigar.qb64();
        assert_eq!(qb64.len(), 88);
        assert!(qb64.starts_with("0B"));

        let parsed = Cigar::from_qb64(&qb64, Some(signer.verfer())).unwrap();
        assert!(parsed.verify(b"request"));
    }

    #[test]
    fn test_cigar_without_key_never_verifies() {
        let signer = Signer::random(true);
        let parsed = Cigar::from_qb64(&signer.sign(b"x").qb64(), None).unwrap();
        assert!(!parsed.verify(b"x"));
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = Signer::random(true);
        let b = Signer::random(true);
        let cigar = a.sign(b"payload");
        assert!(!b.verfer().verify(cigar.raw(), b"payload"));
    }

    #[test]
    fn test_deterministic_signatures() {
        let signer = Signer::from_seed(&[9u8; 32], true);
        assert_eq!(signer.sign(b"same").qb64(), signer.sign(b"same").qb64());
    }

    #[test]
    fn test_verify_indexed_collects_valid_indices() {
        let signers: Vec<Signer> = (0..3).map(|_| Signer::random(true)).collect();
        let verfers: Vec<Verfer> = signers.iter().map(Signer::verfer).collect();
        let msg = b"event bytes";

        let sigers = vec![
            signers[0].sign_indexed(msg, 0, None).unwrap(),
            // Signed by key 2 but claims index 1: must not count.
            signers[2].sign_indexed(msg, 1, None).unwrap(),
            signers[2].sign_indexed(msg, 2, None).unwrap(),
            // Duplicate of index 0.
            signers[0].sign_indexed(msg, 0, None).unwrap(),
        ];
        let verified = verify_indexed(&sigers, &verfers, msg);
        assert_eq!(verified.into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_verify_indexed_ignores_out_of_range_index() {
        let signer = Signer::random(true);
        let siger = signer.sign_indexed(b"m", 5, None).unwrap();
        assert!(verify_indexed(&[siger], &[signer.verfer()], b"m").is_empty());
    }

    #[test]
    fn test_siger_parses_back() {
        let signer = Signer::random(true);
        let siger = signer.sign_indexed(b"m", 0, None).unwrap();
        let parsed = Siger::from_qb64(&siger.qb64()).unwrap();
        assert_eq!(parsed.index(), 0);
        assert!(signer.verfer().verify(parsed.raw(), b"m"));
    }
}
