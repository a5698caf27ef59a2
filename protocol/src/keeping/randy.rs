//! Random keeper.
//!
//! Each generation of keys is drawn fresh from the OS RNG and has no
//! relationship to any other. Nothing can be re-derived, so the sealed seeds
//! in [`RandyParams`] are the only copy and the caller must persist them after
//! every inception and rotation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_digest_code, check_reuse, key_set, sign_all};
use super::{Algo, KeeperParams, KeySet, Keeper};
use crate::crypto::{KeyCipher, MatterCode, Signer};
use crate::error::{Result, ValidationError};

/// Options for a new random keeper.
#[derive(Debug, Clone)]
pub struct RandyOptions {
    /// Number of current keys at inception. Default: 1.
    pub count: usize,
    /// Number of next keys committed at inception. Default: 1.
    pub ncount: usize,
    /// Digest code for next-key commitments. Default: Blake3-256.
    pub dcode: MatterCode,
}

impl Default for RandyOptions {
    fn default() -> Self {
        Self {
            count: 1,
            ncount: 1,
            dcode: MatterCode::Blake3Digest,
        }
    }
}

/// Exported state of a [`RandyKeeper`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandyParams {
    /// Current seeds, each sealed.
    pub prxs: Vec<String>,
    /// Next seeds, each sealed.
    pub nxts: Vec<String>,
    pub dcode: MatterCode,
    pub transferable: bool,
}

/// Keeper holding independently random keys.
#[derive(Debug)]
pub struct RandyKeeper {
    cipher: KeyCipher,
    count: usize,
    ncount: usize,
    dcode: MatterCode,
    transferable: bool,
    signers: Vec<Signer>,
    nsigners: Vec<Signer>,
    prxs: Vec<String>,
    nxts: Vec<String>,
}

impl RandyKeeper {
    pub(crate) fn new(cipher: KeyCipher, options: RandyOptions) -> Result<Self> {
        check_digest_code(options.dcode)?;
        if options.count == 0 {
            return Err(
                ValidationError::InvalidKeys("at least one current key is required".into()).into(),
            );
        }
        Ok(Self {
            cipher,
            count: options.count,
            ncount: options.ncount,
            dcode: options.dcode,
            transferable: true,
            signers: Vec::new(),
            nsigners: Vec::new(),
            prxs: Vec::new(),
            nxts: Vec::new(),
        })
    }

    pub(crate) fn restore(cipher: KeyCipher, params: &RandyParams) -> Result<Self> {
        check_digest_code(params.dcode)?;
        let open = |sealed: &String| -> Result<Signer> {
            let seed = cipher.open(sealed)?;
            Ok(Signer::from_qb64(&seed, params.transferable)?)
        };
        let signers = params.prxs.iter().map(open).collect::<Result<Vec<_>>>()?;
        let nsigners = params.nxts.iter().map(open).collect::<Result<Vec<_>>>()?;
        Ok(Self {
            count: signers.len().max(1),
            ncount: nsigners.len(),
            dcode: params.dcode,
            transferable: params.transferable,
            signers,
            nsigners,
            prxs: params.prxs.clone(),
            nxts: params.nxts.clone(),
            cipher,
        })
    }

    fn generate(count: usize, transferable: bool) -> Vec<Signer> {
        (0..count).map(|_| Signer::random(transferable)).collect()
    }

    fn seal(&self, signers: &[Signer]) -> Result<Vec<String>> {
        signers
            .iter()
            .map(|s| Ok(self.cipher.seal(&s.qb64())?))
            .collect()
    }
}

impl Keeper for RandyKeeper {
    fn algo(&self) -> Algo {
        Algo::Randy
    }

    fn incept(&mut self, transferable: bool) -> Result<KeySet> {
        let ncount = if transferable { self.ncount } else { 0 };
        let signers = Self::generate(self.count, transferable);
        let nsigners = Self::generate(ncount, transferable);
        let prxs = self.seal(&signers)?;
        let nxts = self.seal(&nsigners)?;
        debug!(count = signers.len(), ncount, "generated random key sets");

        self.transferable = transferable;
        self.ncount = ncount;
        self.signers = signers;
        self.nsigners = nsigners;
        self.prxs = prxs;
        self.nxts = nxts;
        key_set(&self.signers, &self.nsigners, self.dcode)
    }

    fn rotate(&mut self, ncount: usize, transferable: bool) -> Result<KeySet> {
        if self.nsigners.is_empty() {
            return Err(ValidationError::NonTransferable.into());
        }
        check_reuse(&self.signers, &self.nsigners)?;

        let ncount = if transferable { ncount } else { 0 };
        let next = Self::generate(ncount, transferable);
        let nxts = self.seal(&next)?;
        debug!(count = self.nsigners.len(), ncount, "rotated random key sets");

        self.transferable = transferable;
        self.ncount = ncount;
        self.signers = std::mem::replace(&mut self.nsigners, next);
        self.prxs = std::mem::replace(&mut self.nxts, nxts);
        key_set(&self.signers, &self.nsigners, self.dcode)
    }

    fn sign(&self, ser: &[u8], indexed: bool) -> Result<Vec<String>> {
        sign_all(&self.signers, ser, indexed)
    }

    fn params(&self) -> KeeperParams {
        KeeperParams::Randy(RandyParams {
            prxs: self.prxs.clone(),
            nxts: self.nxts.clone(),
            dcode: self.dcode,
            transferable: self.transferable,
        })
    }

    fn signers(&self) -> &[Signer] {
        &self.signers
    }
}
