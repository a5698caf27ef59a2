//! Accumulated key state of one identifier.
//!
//! A [`KeyState`] is what you get from folding a key event log: the current
//! keys and thresholds, the next-key commitments, witnesses and
//! configuration, and the digest and sequence number of the latest event.
//! Applying an event never mutates the state in place. It returns the next
//! state, so a rejected event leaves the caller holding exactly what it had.
//!
//! Field names follow the key state notices remote agents publish
//! (`i s p d et kt k nt n bt b c di ee`), which lets a state fetched from an
//! agent deserialize straight into this type.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use super::event::{hex_num, Ilk, InceptionEvent, KeyEvent, RotationEvent};
use super::{find_duplicate, validate_keys, validate_toad};
use crate::config::TRAIT_ESTABLISHMENT_ONLY;
use crate::crypto::codec::Matter;
use crate::crypto::hash::digest;
use crate::crypto::signatures::{verify_indexed, Siger};
use crate::crypto::Verfer;
use crate::error::{ChainError, Result, SignifyError, ValidationError};
use crate::tholder::{Sith, Tholder};

/// The latest establishment event, as summarized in a key state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstablishmentState {
    #[serde(with = "hex_num")]
    pub s: u64,
    pub d: String,
    #[serde(default)]
    pub br: Vec<String>,
    #[serde(default)]
    pub ba: Vec<String>,
}

/// Key state after the latest accepted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyState {
    pub i: String,
    #[serde(with = "hex_num")]
    pub s: u64,
    #[serde(default)]
    pub p: String,
    pub d: String,
    pub et: Ilk,
    pub kt: Sith,
    pub k: Vec<String>,
    pub nt: Sith,
    pub n: Vec<String>,
    #[serde(with = "hex_num")]
    pub bt: u64,
    pub b: Vec<String>,
    pub c: Vec<String>,
    pub ee: EstablishmentState,
    #[serde(default, with = "empty_as_none")]
    pub di: Option<String>,
}

/// Agents publish a missing delegator as `""`.
mod empty_as_none {
    use super::*;

    pub fn serialize<S: Serializer>(
        di: &Option<String>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(di.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<String>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        Ok(text.filter(|t| !t.is_empty()))
    }
}

impl KeyState {
    /// Start a state from an inception event, verifying its SAID and
    /// configuration.
    pub fn incept(event: &KeyEvent) -> Result<Self> {
        let KeyEvent::Inception(icp) = event else {
            warn!(ilk = %event.ilk(), "log does not start with an inception");
            return Err(ChainError::UnexpectedEvent(format!(
                "expected inception, got {}",
                event.ilk()
            ))
            .into());
        };
        if icp.s != 0 {
            return Err(ChainError::SequenceGap {
                expected: 0,
                got: icp.s,
            }
            .into());
        }
        verify_prefix(icp)?;
        if let Err(err) = event.verify_said() {
            warn!(prefix = %icp.i, error = %err, "inception failed SAID verification");
            return Err(err);
        }
        validate_keys(&icp.k, &icp.kt, &icp.n, &icp.nt)?;
        validate_toad(icp.b.len(), icp.bt)?;

        debug!(prefix = %icp.i, "incepted key state");
        Ok(Self {
            i: icp.i.clone(),
            s: 0,
            p: String::new(),
            d: icp.d.clone(),
            et: icp.t,
            kt: icp.kt.clone(),
            k: icp.k.clone(),
            nt: icp.nt.clone(),
            n: icp.n.clone(),
            bt: icp.bt,
            b: icp.b.clone(),
            c: icp.c.clone(),
            ee: EstablishmentState {
                s: 0,
                d: icp.d.clone(),
                br: Vec::new(),
                ba: Vec::new(),
            },
            di: icp.di.clone(),
        })
    }

    /// Apply the next event and return the resulting state.
    ///
    /// Checks prefix, sequence continuity, prior-digest linkage, the SAID,
    /// and for rotations the next-key commitment and witness changes.
    pub fn apply(&self, event: &KeyEvent) -> Result<KeyState> {
        let result = self.apply_unchecked_signatures(event);
        if let Err(err) = &result {
            warn!(prefix = %self.i, sn = event.sn(), ilk = %event.ilk(), error = %err, "rejected event");
        }
        result
    }

    fn apply_unchecked_signatures(&self, event: &KeyEvent) -> Result<KeyState> {
        if event.prefix() != self.i {
            return Err(ChainError::PrefixMismatch {
                expected: self.i.clone(),
                got: event.prefix().to_string(),
            }
            .into());
        }
        let expected = self.s + 1;
        if event.sn() != expected {
            return Err(ChainError::SequenceGap {
                expected,
                got: event.sn(),
            }
            .into());
        }
        match event.prior() {
            Some(p) if p == self.d => {}
            Some(p) => {
                return Err(ChainError::PriorDigestMismatch {
                    expected: self.d.clone(),
                    got: p.to_string(),
                }
                .into())
            }
            None => {
                return Err(
                    ChainError::UnexpectedEvent("inception after start of log".into()).into(),
                )
            }
        }
        event.verify_said()?;

        match event {
            KeyEvent::Rotation(rot) => self.apply_rotation(rot),
            KeyEvent::Interaction(ixn) => {
                if !self.is_transferable() {
                    return Err(ValidationError::NonTransferable.into());
                }
                if self.is_establishment_only() {
                    return Err(ChainError::UnexpectedEvent(
                        "interaction on an establishment-only identifier".into(),
                    )
                    .into());
                }
                Ok(KeyState {
                    s: ixn.s,
                    p: ixn.p.clone(),
                    d: ixn.d.clone(),
                    ..self.clone()
                })
            }
            KeyEvent::Inception(_) => {
                Err(ChainError::UnexpectedEvent("inception after start of log".into()).into())
            }
        }
    }

    fn apply_rotation(&self, rot: &RotationEvent) -> Result<KeyState> {
        let expected_ilk = if self.di.is_some() { Ilk::Drt } else { Ilk::Rot };
        if rot.t != expected_ilk {
            return Err(ChainError::UnexpectedEvent(format!(
                "expected {expected_ilk}, got {}",
                rot.t
            ))
            .into());
        }
        self.verify_next_keys(&rot.k)?;
        validate_keys(&rot.k, &rot.kt, &rot.n, &rot.nt)?;
        let wits = self.rotate_witnesses(&rot.br, &rot.ba)?;
        validate_toad(wits.len(), rot.bt)?;

        Ok(KeyState {
            s: rot.s,
            p: rot.p.clone(),
            d: rot.d.clone(),
            et: rot.t,
            kt: rot.kt.clone(),
            k: rot.k.clone(),
            nt: rot.nt.clone(),
            n: rot.n.clone(),
            bt: rot.bt,
            b: wits,
            ee: EstablishmentState {
                s: rot.s,
                d: rot.d.clone(),
                br: rot.br.clone(),
                ba: rot.ba.clone(),
            },
            ..self.clone()
        })
    }

    /// Apply an event and require its signatures to satisfy the signing
    /// threshold of the resulting state.
    ///
    /// A rotation must also satisfy the prior next threshold: each verified
    /// signature counts at the position its key held in the prior next-key
    /// commitment, so exposing keys is not enough without their signatures.
    pub fn apply_signed(&self, event: &KeyEvent, sigers: &[Siger]) -> Result<KeyState> {
        let next = self.apply(event)?;
        let verified = next.check_signatures(event, sigers)?;
        if let KeyEvent::Rotation(rot) = event {
            let positions = self.committed_positions(&rot.k)?;
            let ondices: Vec<usize> = verified
                .iter()
                .filter_map(|&index| positions.get(index).copied())
                .collect();
            if !self.next_tholder()?.satisfy(ondices.iter().copied()) {
                warn!(prefix = %self.i, sn = rot.s, signed = ondices.len(), "prior next threshold not met by signatures");
                return Err(ChainError::ThresholdNotMet {
                    verified: ondices.len(),
                    total: self.n.len(),
                }
                .into());
            }
        }
        Ok(next)
    }

    /// Build a state from a signed inception.
    pub fn incept_signed(event: &KeyEvent, sigers: &[Siger]) -> Result<Self> {
        let state = Self::incept(event)?;
        state.check_signatures(event, sigers)?;
        Ok(state)
    }

    /// Key indices with a valid signature, once they meet the current threshold.
    fn check_signatures(&self, event: &KeyEvent, sigers: &[Siger]) -> Result<BTreeSet<usize>> {
        let verfers = self.verfers()?;
        let verified = verify_indexed(sigers, &verfers, &event.raw()?);
        if !self.tholder()?.satisfy(verified.iter().copied()) {
            warn!(prefix = %self.i, sn = self.s, verified = verified.len(), "signature threshold not met");
            return Err(ChainError::ThresholdNotMet {
                verified: verified.len(),
                total: verfers.len(),
            }
            .into());
        }
        Ok(verified)
    }

    /// Fold an ordered log from its inception onward.
    pub fn verify_chain(events: &[KeyEvent]) -> Result<KeyState> {
        let (first, rest) = events.split_first().ok_or(ChainError::EmptyLog)?;
        rest.iter()
            .try_fold(Self::incept(first)?, |state, event| state.apply(event))
    }

    /// Fold an ordered log of signed events, checking thresholds at every step.
    pub fn verify_signed_chain(events: &[(KeyEvent, Vec<Siger>)]) -> Result<KeyState> {
        let ((first, sigs), rest) = events.split_first().ok_or(ChainError::EmptyLog)?;
        rest.iter().try_fold(
            Self::incept_signed(first, sigs)?,
            |state, (event, sigs)| state.apply_signed(event, sigs),
        )
    }

    // -----------------------------------------------------------------------
    // Rules shared with the event builders
    // -----------------------------------------------------------------------

    /// Check that `keys` fulfil this state's next-key commitment.
    ///
    /// Every key must digest (with the committing digest's own algorithm) to
    /// one of the published next digests, and the positions so exposed must
    /// satisfy the published next threshold.
    pub fn verify_next_keys(&self, keys: &[String]) -> Result<()> {
        let exposed = self.committed_positions(keys)?;
        if !self.next_tholder()?.satisfy(exposed.iter().copied()) {
            return Err(ValidationError::NextKeyMismatch(
                "exposed keys do not satisfy the prior next threshold".into(),
            )
            .into());
        }
        Ok(())
    }

    /// Position of each key in the published next-digest list.
    fn committed_positions(&self, keys: &[String]) -> Result<Vec<usize>> {
        if !self.is_transferable() {
            return Err(ValidationError::NonTransferable.into());
        }
        let commitments = self
            .n
            .iter()
            .map(|n| Matter::from_qb64(n))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        keys.iter()
            .map(|key| {
                commitments
                    .iter()
                    .position(|commitment| {
                        digest(commitment.code(), key.as_bytes())
                            .is_ok_and(|d| d.raw() == commitment.raw())
                    })
                    .ok_or_else(|| {
                        ValidationError::NextKeyMismatch(format!(
                            "key {key} was not committed to by {}",
                            self.i
                        ))
                        .into()
                    })
            })
            .collect()
    }

    /// Witness list after removing `cuts` and adding `adds`.
    pub fn rotate_witnesses(&self, cuts: &[String], adds: &[String]) -> Result<Vec<String>> {
        let invalid = |reason: String| -> SignifyError {
            ValidationError::InvalidWitnesses(reason).into()
        };
        if find_duplicate(cuts).is_some() || find_duplicate(adds).is_some() {
            return Err(invalid("duplicate witness in cuts or adds".into()));
        }
        if let Some(cut) = cuts.iter().find(|c| !self.b.contains(c)) {
            return Err(invalid(format!("cut {cut} is not a current witness")));
        }
        if let Some(add) = adds.iter().find(|a| self.b.contains(a) || cuts.contains(a)) {
            return Err(invalid(format!("add {add} is already a witness or being cut")));
        }
        let mut wits: Vec<String> = self
            .b
            .iter()
            .filter(|w| !cuts.contains(w))
            .cloned()
            .collect();
        wits.extend(adds.iter().cloned());
        Ok(wits)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn tholder(&self) -> Result<Tholder> {
        Tholder::from_sith(&self.kt)
    }

    pub fn next_tholder(&self) -> Result<Tholder> {
        Tholder::from_sith(&self.nt)
    }

    pub fn verfers(&self) -> Result<Vec<Verfer>> {
        self.k
            .iter()
            .map(|k| Verfer::from_qb64(k).map_err(SignifyError::from))
            .collect()
    }

    /// An identifier with no next-key commitment can never rotate again.
    pub fn is_transferable(&self) -> bool {
        !self.n.is_empty()
    }

    pub fn is_establishment_only(&self) -> bool {
        self.c.iter().any(|c| c == TRAIT_ESTABLISHMENT_ONLY)
    }

    pub fn delegator(&self) -> Option<&str> {
        self.di.as_deref()
    }
}

/// A self-addressing prefix equals the SAID. A basic prefix is the single
/// signing key itself and is never delegated.
fn verify_prefix(icp: &InceptionEvent) -> Result<()> {
    if icp.i == icp.d {
        return Ok(());
    }
    if icp.k.len() == 1 && icp.k[0] == icp.i && icp.di.is_none() {
        return Ok(());
    }
    Err(ChainError::PrefixMismatch {
        expected: icp.d.clone(),
        got: icp.i.clone(),
    }
    .into())
}
