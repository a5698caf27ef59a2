//! # Key-Derivation Strategies ("Keepers")
//!
//! A keeper owns the private keys of one managed identifier: its current
//! signing set and the next set it has already committed to. Two strategies
//! exist and both sit behind the [`Keeper`] trait:
//!
//! ```text
//! salty.rs : deterministic: every key is stretched from one salt + path
//! randy.rs : random: fresh seeds per generation, persisted by the caller
//! ```
//!
//! Neither strategy ever hands a private key out in the clear. What the
//! caller persists is [`KeeperParams`], whose secrets (the salt, or the
//! seeds) are sealed with a [`KeyCipher`] bound to the controller's
//! passcode. [`KeyManager`] is the only place keepers are created or
//! restored, so it is the only place that needs the controller's salter.
//!
//! ## Lifecycle
//!
//! 1. `incept` produces the inception key set plus the digests of the next set.
//! 2. `rotate` promotes next to current and generates a fresh next set.
//! 3. `sign` signs with the current set, indexed by key position.
//! 4. `params` exports enough state to rebuild the keeper later.

pub mod randy;
pub mod salty;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto::{KeyCipher, MatterCode, Salter, Signer, Verfer};
use crate::error::{Result, ValidationError};
use crate::eventing::next_digests;

pub use randy::{RandyKeeper, RandyOptions, RandyParams};
pub use salty::{SaltyKeeper, SaltyOptions, SaltyParams};

/// Which strategy a keeper uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algo {
    Salty,
    Randy,
}

/// Current keys plus the commitment to the next ones, ready for an
/// inception or rotation event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    /// Current verification keys (qb64).
    pub keys: Vec<String>,
    /// Digests of the next verification keys (qb64).
    pub ndigs: Vec<String>,
}

/// The capability every key-derivation strategy provides.
pub trait Keeper {
    fn algo(&self) -> Algo;

    /// Generate the inception key set and the next-key commitment.
    fn incept(&mut self, transferable: bool) -> Result<KeySet>;

    /// Promote the committed next keys to current and commit to `ncount`
    /// fresh next keys. A non-transferable rotation commits to nothing.
    fn rotate(&mut self, ncount: usize, transferable: bool) -> Result<KeySet>;

    /// Sign `ser` with every current key. Indexed signatures carry the key
    /// position; detached ones are plain `0B` tokens.
    fn sign(&self, ser: &[u8], indexed: bool) -> Result<Vec<String>>;

    /// State needed to rebuild this keeper, with secrets sealed.
    fn params(&self) -> KeeperParams;

    /// The current signing keys.
    fn signers(&self) -> &[Signer];
}

/// Exported keeper state, tagged by strategy: `{"salty": {...}}` or
/// `{"randy": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeeperParams {
    Salty(SaltyParams),
    Randy(RandyParams),
}

impl KeeperParams {
    pub fn algo(&self) -> Algo {
        match self {
            KeeperParams::Salty(_) => Algo::Salty,
            KeeperParams::Randy(_) => Algo::Randy,
        }
    }
}

/// A keeper of either strategy.
#[derive(Debug)]
pub enum AnyKeeper {
    Salty(SaltyKeeper),
    Randy(RandyKeeper),
}

impl Keeper for AnyKeeper {
    fn algo(&self) -> Algo {
        match self {
            AnyKeeper::Salty(k) => k.algo(),
            AnyKeeper::Randy(k) => k.algo(),
        }
    }

    fn incept(&mut self, transferable: bool) -> Result<KeySet> {
        match self {
            AnyKeeper::Salty(k) => k.incept(transferable),
            AnyKeeper::Randy(k) => k.incept(transferable),
        }
    }

    fn rotate(&mut self, ncount: usize, transferable: bool) -> Result<KeySet> {
        match self {
            AnyKeeper::Salty(k) => k.rotate(ncount, transferable),
            AnyKeeper::Randy(k) => k.rotate(ncount, transferable),
        }
    }

    fn sign(&self, ser: &[u8], indexed: bool) -> Result<Vec<String>> {
        match self {
            AnyKeeper::Salty(k) => k.sign(ser, indexed),
            AnyKeeper::Randy(k) => k.sign(ser, indexed),
        }
    }

    fn params(&self) -> KeeperParams {
        match self {
            AnyKeeper::Salty(k) => k.params(),
            AnyKeeper::Randy(k) => k.params(),
        }
    }

    fn signers(&self) -> &[Signer] {
        match self {
            AnyKeeper::Salty(k) => k.signers(),
            AnyKeeper::Randy(k) => k.signers(),
        }
    }
}

/// Creates keepers and restores them from exported parameters.
///
/// Borrows the controller's salter for as long as it lives; every secret a
/// keeper exports is sealed under a key derived from it.
#[derive(Debug)]
pub struct KeyManager<'a> {
    salter: &'a Salter,
}

impl<'a> KeyManager<'a> {
    pub fn new(salter: &'a Salter) -> Self {
        Self { salter }
    }

    fn cipher(&self) -> KeyCipher {
        KeyCipher::for_controller(self.salter)
    }

    /// A new deterministic keeper for the identifier at `pidx`.
    pub fn new_salty(&self, pidx: u64, options: SaltyOptions) -> Result<AnyKeeper> {
        Ok(AnyKeeper::Salty(SaltyKeeper::new(
            self.cipher(),
            pidx,
            options,
        )?))
    }

    /// A new random keeper.
    pub fn new_randy(&self, options: RandyOptions) -> Result<AnyKeeper> {
        Ok(AnyKeeper::Randy(RandyKeeper::new(self.cipher(), options)?))
    }

    /// Rebuild a keeper from parameters it exported earlier.
    pub fn restore(&self, params: &KeeperParams) -> Result<AnyKeeper> {
        debug!(algo = ?params.algo(), "restoring keeper");
        match params {
            KeeperParams::Salty(p) => Ok(AnyKeeper::Salty(SaltyKeeper::restore(self.cipher(), p)?)),
            KeeperParams::Randy(p) => Ok(AnyKeeper::Randy(RandyKeeper::restore(self.cipher(), p)?)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by both strategies
// ---------------------------------------------------------------------------

/// Only Ed25519 seeds can be generated.
fn check_key_codes(codes: &[MatterCode]) -> Result<()> {
    match codes.iter().find(|c| **c != MatterCode::Ed25519Seed) {
        Some(code) => Err(ValidationError::InvalidKeys(format!(
            "unsupported key derivation code {code}"
        ))
        .into()),
        None => Ok(()),
    }
}

fn check_digest_code(code: MatterCode) -> Result<()> {
    if !code.is_digest() {
        return Err(ValidationError::InvalidKeys(format!("{code} is not a digest code")).into());
    }
    Ok(())
}

/// Package `current` and the commitment to `next` as a [`KeySet`].
fn key_set(current: &[Signer], next: &[Signer], dcode: MatterCode) -> Result<KeySet> {
    let verfers: Vec<Verfer> = next.iter().map(Signer::verfer).collect();
    Ok(KeySet {
        keys: current.iter().map(|s| s.verfer().qb64()).collect(),
        ndigs: next_digests(dcode, &verfers)?,
    })
}

/// Refuse to hand back the key set that was current before the rotation.
fn check_reuse(previous: &[Signer], current: &[Signer]) -> Result<()> {
    if !current.is_empty() && previous == current {
        return Err(ValidationError::KeyReuse.into());
    }
    Ok(())
}

fn sign_all(signers: &[Signer], ser: &[u8], indexed: bool) -> Result<Vec<String>> {
    if signers.is_empty() {
        return Err(ValidationError::InvalidKeys("keeper holds no current keys".into()).into());
    }
    if !indexed {
        return Ok(signers.iter().map(|s| s.sign(ser).qb64()).collect());
    }
    signers
        .iter()
        .enumerate()
        .map(|(i, signer)| {
            let index = u32::try_from(i).map_err(|_| {
                ValidationError::InvalidKeys(format!("key index {i} out of range"))
            })?;
            Ok(signer.sign_indexed(ser, index, None)?.qb64())
        })
        .collect()
}
