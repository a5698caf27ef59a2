//! # Key Event Construction
//!
//! Builders for the three key events plus the reply message:
//!
//! - [`incept`]: creates an identifier. With a digest derivation code the
//!   prefix is the SAID of the event itself (both `i` and `d` blanked while
//!   digesting); with a key code the prefix is the single signing key.
//! - [`rotate`]: replaces the keys with the ones committed to by the prior
//!   establishment event and publishes a fresh commitment.
//! - [`interact`]: anchors data (seals) without touching keys.
//! - [`reply`]: a routed, self-addressed reply message.
//!
//! The builders take the [`KeyState`] accumulated through the prior event:
//! it carries the prior digest and sequence number the new event must link
//! to, and the commitments and configuration that decide whether the new
//! event is allowed at all. Every rule a verifier would check in
//! [`KeyState::apply`] is already checked here, so a builder never hands out
//! an event its own state machine would reject.

pub mod event;
pub mod state;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

pub use event::{
    EventSeal, Ilk, InceptionEvent, InteractionEvent, KeyEvent, ReplyEvent, RotationEvent,
};
pub use state::{EstablishmentState, KeyState};

use crate::config::{KERI_PROTOCOL, TIMESTAMP_FORMAT};
use crate::crypto::codec::{Matter, MatterCode};
use crate::crypto::hash::digest;
use crate::crypto::{Siger, Verfer};
use crate::error::{ChainError, Result, SignifyError, ValidationError};
use crate::said::{Saider, Version};
use crate::tholder::{Sith, Tholder};

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Inputs to [`incept`].
#[derive(Debug, Clone)]
pub struct InceptArgs {
    /// Current verification keys (qb64). Required, non-empty.
    pub keys: Vec<String>,
    /// Current signing threshold. Default: simple majority of `keys`.
    pub isith: Option<Sith>,
    /// Next-key digests. Empty makes the identifier non-transferable.
    pub ndigs: Vec<String>,
    /// Next signing threshold. Default: `ceil(len(ndigs) / 2)`.
    pub nsith: Option<Sith>,
    /// Witness prefixes. Default: none.
    pub wits: Vec<String>,
    /// Witness threshold. Default: `ample(len(wits))`.
    pub toad: Option<u64>,
    /// Configuration traits (`EO`, `DND`). Default: none.
    pub cnfg: Vec<String>,
    /// Anchored seals. Default: none.
    pub data: Vec<Value>,
    /// Prefix derivation. A digest code gives a self-addressing prefix, a
    /// key code a basic prefix. Default: Blake3-256.
    pub code: MatterCode,
    /// Delegator prefix. Makes the event a `dip`. Default: none.
    pub delpre: Option<String>,
}

impl Default for InceptArgs {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            isith: None,
            ndigs: Vec::new(),
            nsith: None,
            wits: Vec::new(),
            toad: None,
            cnfg: Vec::new(),
            data: Vec::new(),
            code: MatterCode::Blake3Digest,
            delpre: None,
        }
    }
}

/// Inputs to [`rotate`].
#[derive(Debug, Clone, Default)]
pub struct RotateArgs {
    /// New current keys; must fulfil the prior next-key commitment.
    pub keys: Vec<String>,
    /// New signing threshold. Default: the prior next threshold.
    pub isith: Option<Sith>,
    /// New next-key digests. Empty abandons transferability.
    pub ndigs: Vec<String>,
    /// New next threshold. Default: `isith`, or `0` when `ndigs` is empty.
    pub nsith: Option<Sith>,
    /// Witnesses to remove.
    pub cuts: Vec<String>,
    /// Witnesses to add.
    pub adds: Vec<String>,
    /// Witness threshold. Default: `ample` of the resulting witness count.
    pub toad: Option<u64>,
    /// Anchored seals.
    pub data: Vec<Value>,
}

/// An event together with the indexed signatures (qb64) of its signers,
/// the unit handed to the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedEvent {
    pub event: KeyEvent,
    pub sigs: Vec<String>,
}

impl SignedEvent {
    /// Parse the signatures back into [`Siger`]s.
    pub fn sigers(&self) -> Result<Vec<Siger>> {
        self.sigs
            .iter()
            .map(|s| Ok(Siger::from_qb64(s)?))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Build an inception (or delegated inception) event.
pub fn incept(args: InceptArgs) -> Result<KeyEvent> {
    let basic = args.code.is_verification_key();
    if !basic && !args.code.is_digest() {
        return Err(ValidationError::InvalidKeys(format!(
            "`{}` is not a prefix derivation code",
            args.code
        ))
        .into());
    }
    if basic {
        check_basic_prefix(&args)?;
    }

    let kt = args
        .isith
        .unwrap_or_else(|| Tholder::default_for(args.keys.len()).sith());
    let nt = args
        .nsith
        .unwrap_or_else(|| default_next_sith(args.ndigs.len()));
    validate_keys(&args.keys, &kt, &args.ndigs, &nt)?;
    if let Some(dup) = find_duplicate(&args.wits) {
        return Err(ValidationError::InvalidWitnesses(format!("duplicate witness {dup}")).into());
    }
    let toad = args.toad.unwrap_or_else(|| ample(args.wits.len()) as u64);
    validate_toad(args.wits.len(), toad)?;

    let ilk = if args.delpre.is_some() { Ilk::Dip } else { Ilk::Icp };
    let prefix = if basic { args.keys[0].clone() } else { String::new() };
    let icp = InceptionEvent {
        v: Version::render(KERI_PROTOCOL, 0),
        t: ilk,
        d: String::new(),
        i: prefix,
        s: 0,
        kt,
        k: args.keys,
        nt,
        n: args.ndigs,
        bt: toad,
        b: args.wits,
        c: args.cnfg,
        a: args.data,
        di: args.delpre,
    };

    let value = serde_json::to_value(&icp)?;
    let (value, said) = if basic {
        Saider::saidify(&value, MatterCode::Blake3Digest, "d")?
    } else {
        Saider::saidify_labels(&value, args.code, &["i", "d"])?
    };
    let event = KeyEvent::from_value(value)?;
    info!(prefix = %event.prefix(), said = %said, ilk = %ilk, "built inception event");
    Ok(event)
}

/// Build a rotation (or delegated rotation) following `state`.
pub fn rotate(state: &KeyState, args: RotateArgs) -> Result<KeyEvent> {
    if !state.is_transferable() {
        warn!(prefix = %state.i, "rotation requested for non-transferable identifier");
        return Err(ValidationError::NonTransferable.into());
    }
    let kt = args.isith.unwrap_or_else(|| state.nt.clone());
    let nt = match args.nsith {
        Some(nt) => nt,
        None if args.ndigs.is_empty() => Sith::from(0),
        None => kt.clone(),
    };
    validate_keys(&args.keys, &kt, &args.ndigs, &nt)?;
    state.verify_next_keys(&args.keys).map_err(|err| {
        warn!(prefix = %state.i, error = %err, "rotation keys do not fulfil commitment");
        err
    })?;
    let wits = state.rotate_witnesses(&args.cuts, &args.adds)?;
    let toad = args.toad.unwrap_or_else(|| ample(wits.len()) as u64);
    validate_toad(wits.len(), toad)?;

    let ilk = if state.delegator().is_some() {
        Ilk::Drt
    } else {
        Ilk::Rot
    };
    let rot = RotationEvent {
        v: Version::render(KERI_PROTOCOL, 0),
        t: ilk,
        d: String::new(),
        i: state.i.clone(),
        s: state.s + 1,
        p: state.d.clone(),
        kt,
        k: args.keys,
        nt,
        n: args.ndigs,
        bt: toad,
        br: args.cuts,
        ba: args.adds,
        a: args.data,
    };
    let (value, said) =
        Saider::saidify(&serde_json::to_value(&rot)?, MatterCode::Blake3Digest, "d")?;
    info!(prefix = %state.i, sn = state.s + 1, said = %said, "built rotation event");
    KeyEvent::from_value(value)
}

/// Build an interaction anchoring `data` after `state`.
///
/// Establishment-only identifiers cannot interact; that is reported as
/// [`SignifyError::Unsupported`] and no rotation is substituted.
pub fn interact(state: &KeyState, data: Vec<Value>) -> Result<KeyEvent> {
    if state.is_establishment_only() {
        warn!(prefix = %state.i, "interaction requested for establishment-only identifier");
        return Err(SignifyError::Unsupported(format!(
            "{} is establishment-only; interaction events are not allowed",
            state.i
        )));
    }
    if !state.is_transferable() {
        return Err(ValidationError::NonTransferable.into());
    }
    let ixn = InteractionEvent {
        v: Version::render(KERI_PROTOCOL, 0),
        t: Ilk::Ixn,
        d: String::new(),
        i: state.i.clone(),
        s: state.s + 1,
        p: state.d.clone(),
        a: data,
    };
    let (value, said) =
        Saider::saidify(&serde_json::to_value(&ixn)?, MatterCode::Blake3Digest, "d")?;
    info!(prefix = %state.i, sn = state.s + 1, said = %said, "built interaction event");
    KeyEvent::from_value(value)
}

/// Build a reply on `route`. `stamp` defaults to now.
pub fn reply(route: &str, data: Value, stamp: Option<DateTime<Utc>>) -> Result<ReplyEvent> {
    let rpy = ReplyEvent {
        v: Version::render(KERI_PROTOCOL, 0),
        t: Ilk::Rpy,
        d: String::new(),
        dt: timestamp(stamp.unwrap_or_else(Utc::now)),
        r: route.to_string(),
        a: data,
    };
    let (value, _) =
        Saider::saidify(&serde_json::to_value(&rpy)?, MatterCode::Blake3Digest, "d")?;
    Ok(serde_json::from_value(value)?)
}

/// Check that `delegator_events` approve the delegated inception `dip`:
/// some event of the delegator must anchor the seal `{i, s, d}` of `dip`.
pub fn verify_delegation(dip: &KeyEvent, delegator_events: &[KeyEvent]) -> Result<()> {
    let KeyEvent::Inception(InceptionEvent {
        di: Some(delegator),
        ..
    }) = dip
    else {
        return Err(ChainError::UnexpectedEvent(format!(
            "{} is not a delegated inception",
            dip.said()
        ))
        .into());
    };
    let seal = dip.seal();
    let approved = delegator_events
        .iter()
        .filter(|event| event.prefix() == delegator.as_str())
        .any(|event| event.anchors().iter().any(|anchor| seal.matches(anchor)));
    if !approved {
        warn!(prefix = %dip.prefix(), delegator = %delegator, "delegation not approved");
        return Err(ChainError::DelegationNotApproved(dip.prefix().to_string()).into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Digest each key's qb64 text with `code`: the next-key commitment.
pub fn next_digests(code: MatterCode, keys: &[Verfer]) -> Result<Vec<String>> {
    keys.iter()
        .map(|k| Ok(digest(code, k.qb64().as_bytes())?.qb64()))
        .collect()
}

/// Default witness threshold for `n` witnesses: the smallest count that
/// still guarantees a majority of honest witnesses agree, tolerating
/// `f = (n - 1) / 3` faulty ones.
pub fn ample(n: usize) -> usize {
    let f1 = (n.saturating_sub(1) / 3).max(1);
    let f2 = n.saturating_sub(1).div_ceil(3).max(1);
    n.min((n + f1 + 1).div_ceil(2)).min((n + f2 + 1).div_ceil(2))
}

/// Render a timestamp in the protocol's microsecond UTC format.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn default_next_sith(count: usize) -> Sith {
    Sith::from(count.div_ceil(2) as u64)
}

/// Key and threshold rules shared by inception and rotation.
pub(crate) fn validate_keys(
    keys: &[String],
    kt: &Sith,
    ndigs: &[String],
    nt: &Sith,
) -> Result<()> {
    if keys.is_empty() {
        return Err(
            ValidationError::InvalidKeys("at least one current key is required".into()).into(),
        );
    }
    for key in keys {
        Verfer::from_qb64(key)?;
    }
    if let Some(dup) = find_duplicate(keys) {
        return Err(ValidationError::InvalidKeys(format!("duplicate key {dup}")).into());
    }
    let current = Tholder::from_sith(kt)?;
    if current.size() == 0 {
        return Err(ValidationError::MalformedThreshold(
            "current threshold must be at least 1".into(),
        )
        .into());
    }
    if current.size() > keys.len() {
        return Err(ValidationError::InvalidKeys(format!(
            "threshold addresses {} keys but only {} given",
            current.size(),
            keys.len()
        ))
        .into());
    }
    for dig in ndigs {
        Matter::from_qb64_expecting(dig, "a next-key digest", MatterCode::is_digest)?;
    }
    let next = Tholder::from_sith(nt)?;
    if next.size() > ndigs.len() {
        return Err(ValidationError::InvalidKeys(format!(
            "next threshold addresses {} keys but only {} digests given",
            next.size(),
            ndigs.len()
        ))
        .into());
    }
    Ok(())
}

/// Witness threshold rules: zero without witnesses, otherwise `1..=n`.
pub(crate) fn validate_toad(witnesses: usize, toad: u64) -> Result<()> {
    let ok = if witnesses == 0 {
        toad == 0
    } else {
        toad >= 1 && toad as usize <= witnesses
    };
    if !ok {
        return Err(ValidationError::InvalidWitnesses(format!(
            "threshold {toad} invalid for {witnesses} witnesses"
        ))
        .into());
    }
    Ok(())
}

pub(crate) fn find_duplicate(items: &[String]) -> Option<&String> {
    items
        .iter()
        .enumerate()
        .find(|(i, item)| items[..*i].contains(item))
        .map(|(_, item)| item)
}

fn check_basic_prefix(args: &InceptArgs) -> Result<()> {
    if args.keys.len() != 1 || args.delpre.is_some() {
        return Err(ValidationError::InvalidKeys(
            "a basic prefix needs exactly one key and no delegator".into(),
        )
        .into());
    }
    let key = Matter::from_qb64(&args.keys[0])?;
    if key.code() != args.code {
        return Err(ValidationError::InvalidKeys(format!(
            "key code {} does not match prefix code {}",
            key.code(),
            args.code
        ))
        .into());
    }
    if args.code == MatterCode::Ed25519NonTransferable
        && (!args.ndigs.is_empty() || !args.wits.is_empty())
    {
        return Err(ValidationError::InvalidKeys(
            "non-transferable prefix cannot commit to next keys or witnesses".into(),
        )
        .into());
    }
    Ok(())
}
