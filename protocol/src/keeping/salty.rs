//! Deterministic keeper.
//!
//! Every key is stretched from the identifier's salt and a path
//! `"{stem}{ridx:x}{kidx:x}"`, where `ridx` counts rotations and `kidx` is the
//! running index of the key across all generations. Only the salt and the two
//! counters have to be stored; every key the identifier ever used can be
//! re-derived from them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_digest_code, check_key_codes, check_reuse, key_set, sign_all};
use super::{Algo, KeeperParams, KeySet, Keeper};
use crate::config::AID_STEM;
use crate::crypto::{KeyCipher, MatterCode, Salter, Signer, Tier};
use crate::error::{Result, ValidationError};

/// Options for a new deterministic keeper.
#[derive(Debug, Clone)]
pub struct SaltyOptions {
    /// Passcode to use as the identifier salt. Default: a fresh random salt.
    pub bran: Option<String>,
    /// Path stem. Default: `signify:aid`. An empty stem derives from the
    /// identifier index instead.
    pub stem: Option<String>,
    /// Argon2 work factor. Default: [`Tier::Low`].
    pub tier: Tier,
    /// Number of current keys at inception. Default: 1.
    pub count: usize,
    /// Number of next keys committed at inception. Default: 1.
    pub ncount: usize,
    /// Digest code for next-key commitments. Default: Blake3-256.
    pub dcode: MatterCode,
}

impl Default for SaltyOptions {
    fn default() -> Self {
        Self {
            bran: None,
            stem: None,
            tier: Tier::Low,
            count: 1,
            ncount: 1,
            dcode: MatterCode::Blake3Digest,
        }
    }
}

/// Exported state of a [`SaltyKeeper`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaltyParams {
    /// Identifier salt, sealed.
    pub sxlt: String,
    pub pidx: u64,
    pub kidx: u64,
    pub ridx: u64,
    pub stem: String,
    pub tier: Tier,
    /// Codes of the current keys; their count is the current set size.
    pub icodes: Vec<MatterCode>,
    /// Codes of the committed next keys.
    pub ncodes: Vec<MatterCode>,
    pub dcode: MatterCode,
    pub transferable: bool,
}

/// Keeper deriving every key from one salt.
#[derive(Debug)]
pub struct SaltyKeeper {
    salter: Salter,
    sxlt: String,
    stem: String,
    pidx: u64,
    ridx: u64,
    kidx: u64,
    icount: usize,
    ncount: usize,
    dcode: MatterCode,
    transferable: bool,
    signers: Vec<Signer>,
    nsigners: Vec<Signer>,
}

impl SaltyKeeper {
    pub(crate) fn new(cipher: KeyCipher, pidx: u64, options: SaltyOptions) -> Result<Self> {
        check_digest_code(options.dcode)?;
        if options.count == 0 {
            return Err(
                ValidationError::InvalidKeys("at least one current key is required".into()).into(),
            );
        }
        let salter = match &options.bran {
            Some(bran) => Salter::from_bran(bran, options.tier)?,
            None => Salter::random(options.tier),
        };
        let sxlt = cipher.seal(&salter.qb64())?;
        Ok(Self {
            salter,
            sxlt,
            stem: options.stem.unwrap_or_else(|| AID_STEM.to_string()),
            pidx,
            ridx: 0,
            kidx: 0,
            icount: options.count,
            ncount: options.ncount,
            dcode: options.dcode,
            transferable: true,
            signers: Vec::new(),
            nsigners: Vec::new(),
        })
    }

    pub(crate) fn restore(cipher: KeyCipher, params: &SaltyParams) -> Result<Self> {
        check_digest_code(params.dcode)?;
        check_key_codes(&params.icodes)?;
        check_key_codes(&params.ncodes)?;
        let salter = Salter::from_qb64(&cipher.open(&params.sxlt)?, params.tier)?;

        let mut keeper = Self {
            salter,
            sxlt: params.sxlt.clone(),
            stem: params.stem.clone(),
            pidx: params.pidx,
            ridx: params.ridx,
            kidx: params.kidx,
            icount: params.icodes.len(),
            ncount: params.ncodes.len(),
            dcode: params.dcode,
            transferable: params.transferable,
            signers: Vec::new(),
            nsigners: Vec::new(),
        };
        let transferable = keeper.transferable;
        keeper.signers = keeper.derive(keeper.ridx, keeper.kidx, keeper.icount, transferable)?;
        keeper.nsigners = keeper.derive(
            keeper.ridx + 1,
            keeper.kidx + keeper.icount as u64,
            keeper.ncount,
            transferable,
        )?;
        Ok(keeper)
    }

    pub fn pidx(&self) -> u64 {
        self.pidx
    }

    pub fn ridx(&self) -> u64 {
        self.ridx
    }

    pub fn kidx(&self) -> u64 {
        self.kidx
    }

    /// Path prefix for rotation `ridx`. Key indices are appended by the salter.
    fn path(&self, ridx: u64) -> String {
        if self.stem.is_empty() {
            format!("{:x}{ridx:x}", self.pidx)
        } else {
            format!("{}{ridx:x}", self.stem)
        }
    }

    fn derive(&self, ridx: u64, kidx: u64, count: usize, transferable: bool) -> Result<Vec<Signer>> {
        let start = usize::try_from(kidx)
            .map_err(|_| ValidationError::InvalidKeys(format!("key index {kidx} out of range")))?;
        debug!(pidx = self.pidx, ridx, kidx, count, "deriving salty key set");
        self.salter
            .signers(count, start, &self.path(ridx), transferable, None)
    }
}

impl Keeper for SaltyKeeper {
    fn algo(&self) -> Algo {
        Algo::Salty
    }

    fn incept(&mut self, transferable: bool) -> Result<KeySet> {
        let ncount = if transferable { self.ncount } else { 0 };
        let signers = self.derive(0, 0, self.icount, transferable)?;
        let nsigners = self.derive(1, self.icount as u64, ncount, transferable)?;

        self.transferable = transferable;
        self.ridx = 0;
        self.kidx = 0;
        self.ncount = ncount;
        self.signers = signers;
        self.nsigners = nsigners;
        key_set(&self.signers, &self.nsigners, self.dcode)
    }

    fn rotate(&mut self, ncount: usize, transferable: bool) -> Result<KeySet> {
        if self.nsigners.is_empty() {
            return Err(ValidationError::NonTransferable.into());
        }
        check_reuse(&self.signers, &self.nsigners)?;

        let ridx = self.ridx + 1;
        let kidx = self.kidx + self.signers.len() as u64;
        let current = self.nsigners.clone();
        let ncount = if transferable { ncount } else { 0 };
        let next = self.derive(ridx + 1, kidx + current.len() as u64, ncount, transferable)?;

        self.transferable = transferable;
        self.ridx = ridx;
        self.kidx = kidx;
        self.icount = current.len();
        self.ncount = next.len();
        self.signers = current;
        self.nsigners = next;
        key_set(&self.signers, &self.nsigners, self.dcode)
    }

    fn sign(&self, ser: &[u8], indexed: bool) -> Result<Vec<String>> {
        sign_all(&self.signers, ser, indexed)
    }

    fn params(&self) -> KeeperParams {
        KeeperParams::Salty(SaltyParams {
            sxlt: self.sxlt.clone(),
            pidx: self.pidx,
            kidx: self.kidx,
            ridx: self.ridx,
            stem: self.stem.clone(),
            tier: self.salter.tier(),
            icodes: vec![MatterCode::Ed25519Seed; self.icount],
            ncodes: vec![MatterCode::Ed25519Seed; self.ncount],
            dcode: self.dcode,
            transferable: self.transferable,
        })
    }

    fn signers(&self) -> &[Signer] {
        &self.signers
    }
}
