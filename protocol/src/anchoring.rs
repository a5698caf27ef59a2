//! # Anchored Registry & Credential Events
//!
//! Credential registries and credentials live in their own transaction
//! event logs (TELs), but every TEL event must be anchored in the issuer's
//! key event log: the issuer emits an interaction whose data is a seal
//! `{i, s, d}` naming the TEL event. This module builds both halves.
//!
//! - [`registry_inception`]: `vcp`: a backerless registry (`NB`).
//! - [`issue_credential`]: the credential itself (an ACDC with a
//!   self-addressed subject) plus its `iss` event.
//! - [`revoke_credential`]: `rev`, chained to the credential's `iss`.
//!
//! Establishment-only identifiers cannot emit interactions, and anchoring in
//! a rotation instead is not supported: such requests fail with
//! [`SignifyError::Unsupported`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::{ACDC_PROTOCOL, KERI_PROTOCOL, TRAIT_NO_BACKERS};
use crate::crypto::{MatterCode, Salter, Tier};
use crate::error::{Result, SignifyError, ValidationError};
use crate::eventing::{interact, timestamp, KeyState, SignedEvent};
use crate::keeping::Keeper;
use crate::said::{Saider, Version};

const ILK_VCP: &str = "vcp";
const ILK_ISS: &str = "iss";
const ILK_REV: &str = "rev";

/// A registry inception and the interaction anchoring it.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryInception {
    pub vcp: Value,
    pub ixn: SignedEvent,
}

impl RegistryInception {
    /// Registry prefix (equal to the `vcp` SAID).
    pub fn registry(&self) -> &str {
        self.vcp["i"].as_str().unwrap_or_default()
    }
}

/// Inputs to [`issue_credential`].
#[derive(Debug, Clone, Default)]
pub struct CredentialArgs {
    /// Registry prefix the credential is issued in. Required.
    pub registry: String,
    /// Schema SAID. Required; not validated.
    pub schema: String,
    /// Issuee prefix. Default: none (an untargeted credential).
    pub recipient: Option<String>,
    /// Subject attributes, merged after `d`, `u`, `i` and `dt`.
    pub data: Map<String, Value>,
    /// Edges section. Default: none.
    pub source: Option<Value>,
    /// Rules section. Default: none.
    pub rules: Option<Value>,
    /// Add salty nonces (`u`) to credential and subject. Default: false.
    pub private: bool,
    /// Issuance time. Default: now.
    pub dt: Option<DateTime<Utc>>,
}

/// A credential, its issuance event and the interaction anchoring it.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    pub acdc: Value,
    /// Issuer signatures over the serialized credential.
    pub csigs: Vec<String>,
    pub iss: Value,
    pub ixn: SignedEvent,
}

impl IssuedCredential {
    /// Credential SAID.
    pub fn said(&self) -> &str {
        self.acdc["d"].as_str().unwrap_or_default()
    }
}

/// A revocation and the interaction anchoring it.
#[derive(Debug, Clone, Serialize)]
pub struct RevokedCredential {
    pub rev: Value,
    pub ixn: SignedEvent,
}

/// Build a backerless registry inception for the identifier in `state`.
///
/// `nonce` makes registries of the same issuer distinct; a fresh random one
/// is used when `None`.
pub fn registry_inception(
    state: &KeyState,
    keeper: &dyn Keeper,
    nonce: Option<String>,
) -> Result<RegistryInception> {
    ensure_interactive(state, "registry inception")?;
    let nonce = nonce.unwrap_or_else(|| Salter::random(Tier::Low).qb64());
    let vcp = json!({
        "v": Version::render(KERI_PROTOCOL, 0),
        "t": ILK_VCP,
        "d": "",
        "i": "",
        "ii": state.i,
        "s": "0",
        "c": [TRAIT_NO_BACKERS],
        "bt": "0",
        "b": [],
        "n": nonce,
    });
    let (vcp, registry) = Saider::saidify_labels(&vcp, MatterCode::Blake3Digest, &["i", "d"])?;

    let ixn = anchor(state, keeper, seal(&registry, "0", &registry))?;
    info!(issuer = %state.i, %registry, "built registry inception");
    Ok(RegistryInception { vcp, ixn })
}

/// Build a credential issued by the identifier in `state`.
pub fn issue_credential(
    state: &KeyState,
    keeper: &dyn Keeper,
    args: CredentialArgs,
) -> Result<IssuedCredential> {
    ensure_interactive(state, "credential issuance")?;
    if args.registry.is_empty() || args.schema.is_empty() {
        return Err(ValidationError::MissingField(
            "credential issuance needs a registry and a schema".into(),
        )
        .into());
    }
    let dt = timestamp(args.dt.unwrap_or_else(Utc::now));

    let mut subject = Map::new();
    subject.insert("d".into(), Value::from(""));
    if args.private {
        subject.insert("u".into(), Value::from(Salter::random(Tier::Low).qb64()));
    }
    if let Some(recipient) = &args.recipient {
        subject.insert("i".into(), Value::from(recipient.as_str()));
    }
    subject.insert("dt".into(), Value::from(dt.as_str()));
    subject.extend(args.data);
    let (subject, _) =
        Saider::saidify(&Value::Object(subject), MatterCode::Blake3Digest, "d")?;

    let mut acdc = Map::new();
    acdc.insert("v".into(), Value::from(Version::render(ACDC_PROTOCOL, 0)));
    acdc.insert("d".into(), Value::from(""));
    if args.private {
        acdc.insert("u".into(), Value::from(Salter::random(Tier::Low).qb64()));
    }
    acdc.insert("i".into(), Value::from(state.i.as_str()));
    acdc.insert("ri".into(), Value::from(args.registry.as_str()));
    acdc.insert("s".into(), Value::from(args.schema.as_str()));
    acdc.insert("a".into(), subject);
    if let Some(source) = args.source {
        acdc.insert("e".into(), source);
    }
    if let Some(rules) = args.rules {
        acdc.insert("r".into(), rules);
    }
    let (acdc, said) = Saider::saidify(&Value::Object(acdc), MatterCode::Blake3Digest, "d")?;
    let csigs = keeper.sign(&serde_json::to_vec(&acdc)?, true)?;

    let iss = json!({
        "v": Version::render(KERI_PROTOCOL, 0),
        "t": ILK_ISS,
        "d": "",
        "i": said,
        "s": "0",
        "ri": args.registry,
        "dt": dt,
    });
    let (iss, iss_said) = Saider::saidify(&iss, MatterCode::Blake3Digest, "d")?;

    let ixn = anchor(state, keeper, seal(&said, "0", &iss_said))?;
    info!(issuer = %state.i, credential = %said, "built credential issuance");
    Ok(IssuedCredential {
        acdc,
        csigs,
        iss,
        ixn,
    })
}

/// Build the revocation of credential `said`, whose current TEL status has
/// digest `prior` (the `iss` SAID).
pub fn revoke_credential(
    state: &KeyState,
    keeper: &dyn Keeper,
    said: &str,
    registry: &str,
    prior: &str,
    dt: Option<DateTime<Utc>>,
) -> Result<RevokedCredential> {
    ensure_interactive(state, "credential revocation")?;
    let rev = json!({
        "v": Version::render(KERI_PROTOCOL, 0),
        "t": ILK_REV,
        "d": "",
        "i": said,
        "s": "1",
        "p": prior,
        "ri": registry,
        "dt": timestamp(dt.unwrap_or_else(Utc::now)),
    });
    let (rev, rev_said) = Saider::saidify(&rev, MatterCode::Blake3Digest, "d")?;

    let ixn = anchor(state, keeper, seal(said, "1", &rev_said))?;
    info!(issuer = %state.i, credential = %said, "built credential revocation");
    Ok(RevokedCredential { rev, ixn })
}

fn ensure_interactive(state: &KeyState, operation: &str) -> Result<()> {
    if state.is_establishment_only() {
        warn!(prefix = %state.i, operation, "establishment-only identifier cannot anchor");
        return Err(SignifyError::Unsupported(format!(
            "{operation} for establishment-only identifier {}",
            state.i
        )));
    }
    Ok(())
}

fn seal(i: &str, s: &str, d: &str) -> Value {
    json!({ "i": i, "s": s, "d": d })
}

/// Interaction anchoring `seal`, signed by the keeper's current keys.
fn anchor(state: &KeyState, keeper: &dyn Keeper, seal: Value) -> Result<SignedEvent> {
    let event = interact(state, vec![seal])?;
    let sigs = keeper.sign(&event.raw()?, true)?;
    Ok(SignedEvent { event, sigs })
}
