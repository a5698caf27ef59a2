//! # Salt-Based Key Derivation
//!
//! A [`Salter`] turns one 128-bit salt plus a textual derivation path into
//! an Ed25519 seed by stretching the path with Argon2id. The same salt and
//! path always give the same key, which is how a client recovers every key
//! it ever used from nothing but a passcode.
//!
//! ## Tiers
//!
//! Argon2's work factor is selected by [`Tier`]. The three production tiers
//! match libsodium's interactive, moderate and sensitive presets so that a
//! passcode derives identical keys in every client. `Temp` is the minimum
//! Argon2 allows and exists only to keep tests fast.
//!
//! ## Passcodes
//!
//! A passcode ("bran") is 21 base64 characters. Prefixing it with `0AA`
//! yields a valid salt token (`0A` code plus one zero-bit pad character),
//! so the passcode *is* the salt.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::codec::{CodecError, Matter, MatterCode};
use super::keys::Signer;
use crate::config::{
    ARGON2_HIGH, ARGON2_LOW, ARGON2_MED, ARGON2_TEMP, PASSCODE_LENGTH, SALT_LENGTH, SEED_LENGTH,
};
use crate::error::{Result, ValidationError};

/// Argon2id work-factor tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Low,
    Med,
    High,
    /// Test-only minimum work factor.
    Temp,
}

impl Tier {
    /// `(passes, memory in KiB)`.
    pub const fn work_factor(self) -> (u32, u32) {
        match self {
            Tier::Low => ARGON2_LOW,
            Tier::Med => ARGON2_MED,
            Tier::High => ARGON2_HIGH,
            Tier::Temp => ARGON2_TEMP,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Med => "med",
            Tier::High => "high",
            Tier::Temp => "temp",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 128-bit salt plus the tier used to stretch paths with it.
#[derive(Clone, PartialEq, Eq)]
pub struct Salter {
    raw: [u8; SALT_LENGTH],
    tier: Tier,
}

impl Salter {
    pub fn new(raw: [u8; SALT_LENGTH], tier: Tier) -> Self {
        Self { raw, tier }
    }

    /// Fresh random salt.
    pub fn random(tier: Tier) -> Self {
        let mut raw = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut raw);
        Self::new(raw, tier)
    }

    /// Parse a `0A` salt token.
    pub fn from_qb64(qb64: &str, tier: Tier) -> std::result::Result<Self, CodecError> {
        let matter =
            Matter::from_qb64_expecting(qb64, "a 128-bit salt", |c| c == MatterCode::Salt128)?;
        let mut raw = [0u8; SALT_LENGTH];
        raw.copy_from_slice(matter.raw());
        Ok(Self::new(raw, tier))
    }

    /// Build the salt from a passcode. Characters past the 21st are ignored.
    pub fn from_bran(bran: &str, tier: Tier) -> Result<Self> {
        if bran.len() < PASSCODE_LENGTH || !bran.is_char_boundary(PASSCODE_LENGTH) {
            return Err(ValidationError::InvalidPasscode(format!(
                "passcode must be at least {PASSCODE_LENGTH} characters"
            ))
            .into());
        }
        let qb64 = format!("0AA{}", &bran[..PASSCODE_LENGTH]);
        Self::from_qb64(&qb64, tier).map_err(|e| {
            ValidationError::InvalidPasscode(format!("passcode is not base64url text: {e}")).into()
        })
    }

    pub fn qb64(&self) -> String {
        Matter::from_fixed(MatterCode::Salt128, &self.raw).qb64()
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub(crate) fn raw(&self) -> &[u8; SALT_LENGTH] {
        &self.raw
    }

    /// Stretch `path` into a 32-byte seed. `tier` overrides the salter's own.
    pub fn stretch(&self, path: &str, tier: Option<Tier>) -> Result<[u8; SEED_LENGTH]> {
        let tier = tier.unwrap_or(self.tier);
        let (passes, memory_kib) = tier.work_factor();
        let params = Params::new(memory_kib, passes, 1, Some(SEED_LENGTH)).map_err(|e| {
            ValidationError::InvalidKeys(format!("argon2 parameters rejected: {e}"))
        })?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut seed = [0u8; SEED_LENGTH];
        argon
            .hash_password_into(path.as_bytes(), &self.raw, &mut seed)
            .map_err(|e| ValidationError::InvalidKeys(format!("argon2 stretch failed: {e}")))?;
        debug!(%tier, "stretched derivation path");
        Ok(seed)
    }

    /// Derive the signer at `path`.
    pub fn signer(&self, path: &str, transferable: bool, tier: Option<Tier>) -> Result<Signer> {
        let seed = self.stretch(path, tier)?;
        Ok(Signer::from_seed(&seed, transferable))
    }

    /// Derive `count` signers at `"{path}{i:x}"` for `i` in `start..start+count`.
    pub fn signers(
        &self,
        count: usize,
        start: usize,
        path: &str,
        transferable: bool,
        tier: Option<Tier>,
    ) -> Result<Vec<Signer>> {
        (start..start + count)
            .map(|i| self.signer(&format!("{path}{i:x}"), transferable, tier))
            .collect()
    }
}

impl fmt::Debug for Salter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salter(tier={}, <redacted>)", self.tier)
    }
}

/// A fresh 21-character passcode.
pub fn random_passcode() -> String {
    let qb64 = Salter::random(Tier::Low).qb64();
    qb64[2..2 + PASSCODE_LENGTH].to_string()
}
