//! # Key Primitives
//!
//! Ed25519 signing and verification keys in their coded forms.
//!
//! A [`Signer`] holds a 32-byte seed (code `A`) and knows whether the
//! identifier it serves is transferable. That flag decides the code of its
//! public half: a [`Verfer`] coded `D` belongs to a transferable identifier
//! whose keys may later be rotated, one coded `B` to a non-transferable
//! identifier whose prefix *is* the key.
//!
//! ## Security considerations
//!
//! - Seeds are zeroized on drop (ed25519-dalek does this for us).
//! - Fresh seeds come from `OsRng`.
//! - Seed bytes are never logged and never appear in `Debug` output.

use ed25519_dalek::{Signature as DalekSignature, Signer as _, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

use super::codec::{CodecError, Indexed, Matter, MatterCode};
use super::signatures::{Cigar, Siger};
use crate::config::SEED_LENGTH;

/// A private signing key plus the code its verification key will carry.
///
/// `Signer` deliberately does not implement `Serialize`. The only way seed
/// material leaves this type is [`Signer::qb64`], which callers must ask for
/// by name (the keepers do, right before encrypting it).
///
/// # Examples
///
/// ```
/// use signify_protocol::crypto::Signer;
///
/// let signer = Signer::random(true);
/// let cigar = signer.sign(b"hello");
/// assert!(signer.verfer().verify(cigar.raw(), b"hello"));
/// ```
pub struct Signer {
    signing_key: SigningKey,
    transferable: bool,
}

impl Signer {
    /// Generate a fresh signer from the OS RNG.
    pub fn random(transferable: bool) -> Self {
        let mut seed = [0u8; SEED_LENGTH];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed, transferable)
    }

    /// Build a signer deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SEED_LENGTH], transferable: bool) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
            transferable,
        }
    }

    /// Parse a qb64 seed token (code `A`).
    pub fn from_qb64(seed: &str, transferable: bool) -> Result<Self, CodecError> {
        let matter = Matter::from_qb64_expecting(seed, "an Ed25519 seed", |c| {
            c == MatterCode::Ed25519Seed
        })?;
        let mut bytes = [0u8; SEED_LENGTH];
        bytes.copy_from_slice(matter.raw());
        Ok(Self::from_seed(&bytes, transferable))
    }

    /// The seed as a qb64 token. Handle with care.
    pub fn qb64(&self) -> String {
        Matter::from_fixed(MatterCode::Ed25519Seed, &self.signing_key.to_bytes()).qb64()
    }

    pub fn is_transferable(&self) -> bool {
        self.transferable
    }

    /// The matching verification key.
    pub fn verfer(&self) -> Verfer {
        let code = if self.transferable {
            MatterCode::Ed25519
        } else {
            MatterCode::Ed25519NonTransferable
        };
        Verfer {
            key: self.signing_key.verifying_key(),
            code,
        }
    }

    /// Produce a detached (non-indexed) signature.
    pub fn sign(&self, message: &[u8]) -> Cigar {
        let sig = self.signing_key.sign(message);
        Cigar::new(sig.to_bytes(), Some(self.verfer()))
    }

    /// Produce an indexed signature. `ondex` defaults to `index`.
    pub fn sign_indexed(
        &self,
        message: &[u8],
        index: u32,
        ondex: Option<u32>,
    ) -> Result<Siger, CodecError> {
        let sig = self.signing_key.sign(message);
        let indexed = Indexed::new(&sig.to_bytes(), index, ondex)?;
        Ok(Siger::from_indexed(indexed, Some(self.verfer())))
    }
}

impl Clone for Signer {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes(), self.transferable)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signer(verfer={})", self.verfer().qb64())
    }
}

impl PartialEq for Signer {
    /// Compared by public half only.
    fn eq(&self, other: &Self) -> bool {
        self.verfer() == other.verfer()
    }
}

impl Eq for Signer {}

// ---------------------------------------------------------------------------
// Verfer
// ---------------------------------------------------------------------------

/// A coded Ed25519 verification key.
#[derive(Clone, PartialEq, Eq)]
pub struct Verfer {
    key: VerifyingKey,
    code: MatterCode,
}

impl Verfer {
    /// Parse a qb64 verification key (code `D` or `B`).
    ///
    /// Besides the token shape this checks that the bytes are a valid curve
    /// point, so a `Verfer` can always be used for verification.
    pub fn from_qb64(token: &str) -> Result<Self, CodecError> {
        let matter = Matter::from_qb64_expecting(
            token,
            "an Ed25519 verification key",
            MatterCode::is_verification_key,
        )?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(matter.raw());
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| CodecError::UnexpectedCode {
            expected: "a valid Ed25519 point",
            got: token.chars().take(1).collect(),
        })?;
        Ok(Self {
            key,
            code: matter.code(),
        })
    }

    pub fn code(&self) -> MatterCode {
        self.code
    }

    pub fn is_transferable(&self) -> bool {
        self.code == MatterCode::Ed25519
    }

    pub fn raw(&self) -> [u8; 32] {
        self.key.to_bytes()
    }

    pub fn qb64(&self) -> String {
        Matter::from_fixed(self.code, &self.key.to_bytes()).qb64()
    }

    /// Verify a raw 64-byte signature over `message`.
    ///
    /// Returns `false` for anything that is not a valid signature, including
    /// input of the wrong length. Never panics.
    pub fn verify(&self, signature: &[u8], message: &[u8]) -> bool {
        let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(&bytes);
        self.key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for Verfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Verfer({})", self.qb64())
    }
}

impl fmt::Display for Verfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qb64())
    }
}
