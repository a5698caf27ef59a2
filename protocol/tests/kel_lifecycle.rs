//! Integration tests for key event logs built from keepers.
//!
//! Each test drives the public API only: a keeper produces keys, the event
//! builders produce events, and `KeyState` folds them back into a verified
//! state. Every failure path must leave the prior state untouched.

use serde_json::json;

use signify_protocol::anchoring::{issue_credential, registry_inception, CredentialArgs};
use signify_protocol::crypto::{Salter, Siger, Tier};
use signify_protocol::eventing::{
    incept, interact, rotate, verify_delegation, EventSeal, InceptArgs, KeyEvent, KeyState,
    RotateArgs, SignedEvent,
};
use signify_protocol::keeping::{AnyKeeper, Keeper, KeyManager, SaltyOptions};
use signify_protocol::tholder::Sith;
use signify_protocol::{ChainError, SignifyError, ValidationError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn controller_salt() -> Salter {
    Salter::new([42u8; 16], Tier::Temp)
}

fn salty(salter: &Salter, pidx: u64, count: usize) -> AnyKeeper {
    KeyManager::new(salter)
        .new_salty(
            pidx,
            SaltyOptions {
                tier: Tier::Temp,
                count,
                ncount: count,
                ..SaltyOptions::default()
            },
        )
        .unwrap()
}

fn signed(keeper: &AnyKeeper, event: KeyEvent) -> SignedEvent {
    let sigs = keeper.sign(&event.raw().unwrap(), true).unwrap();
    SignedEvent { event, sigs }
}

/// A three-key identifier whose current and next thresholds need any two keys.
fn weighted_identifier(keeper: &mut AnyKeeper) -> SignedEvent {
    let keys = keeper.incept(true).unwrap();
    let half = || Sith::from(vec![vec!["1/2", "1/2", "1/2"]]);
    let event = incept(InceptArgs {
        keys: keys.keys,
        isith: Some(half()),
        ndigs: keys.ndigs,
        nsith: Some(half()),
        ..InceptArgs::default()
    })
    .unwrap();
    signed(keeper, event)
}

fn pairs(log: &[SignedEvent]) -> Vec<(KeyEvent, Vec<Siger>)> {
    log.iter()
        .map(|s| (s.event.clone(), s.sigers().unwrap()))
        .collect()
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn weighted_log_rotates_and_verifies() {
    let salter = controller_salt();
    let mut keeper = salty(&salter, 0, 3);
    let icp = weighted_identifier(&mut keeper);
    let state = KeyState::incept_signed(&icp.event, &icp.sigers().unwrap()).unwrap();

    let ixn = signed(&keeper, interact(&state, vec![json!({"note": "hello"})]).unwrap());
    let state = state.apply_signed(&ixn.event, &ixn.sigers().unwrap()).unwrap();

    let keys = keeper.rotate(3, true).unwrap();
    let rot = signed(
        &keeper,
        rotate(
            &state,
            RotateArgs {
                keys: keys.keys,
                ndigs: keys.ndigs,
                ..RotateArgs::default()
            },
        )
        .unwrap(),
    );
    let state = state.apply_signed(&rot.event, &rot.sigers().unwrap()).unwrap();
    assert_eq!(state.s, 2);
    assert_eq!(state.ee.s, 2);

    let log = vec![icp, ixn, rot];
    let folded = KeyState::verify_signed_chain(&pairs(&log)).unwrap();
    assert_eq!(folded, state);

    let unsigned: Vec<KeyEvent> = log.iter().map(|s| s.event.clone()).collect();
    assert_eq!(KeyState::verify_chain(&unsigned).unwrap(), state);
}

#[test]
fn two_of_three_signatures_satisfy_half_weights() {
    let salter = controller_salt();
    let mut keeper = salty(&salter, 0, 3);
    let icp = weighted_identifier(&mut keeper);
    let sigers = icp.sigers().unwrap();

    assert!(KeyState::incept_signed(&icp.event, &sigers[..2]).is_ok());
    assert!(matches!(
        KeyState::incept_signed(&icp.event, &sigers[..1]),
        Err(SignifyError::Chain(ChainError::ThresholdNotMet { .. }))
    ));
}

#[test]
fn events_survive_the_wire() {
    let salter = controller_salt();
    let mut keeper = salty(&salter, 0, 1);
    let keys = keeper.incept(true).unwrap();
    let icp = incept(InceptArgs {
        keys: keys.keys,
        ndigs: keys.ndigs,
        ..InceptArgs::default()
    })
    .unwrap();

    let raw = icp.raw().unwrap();
    let parsed = KeyEvent::from_json(&raw).unwrap();
    assert_eq!(parsed, icp);
    parsed.verify_said().unwrap();

    // Same length, same fields, different order.
    let text = String::from_utf8(raw.clone()).unwrap();
    let reordered = text.replacen(r#""s":"0","kt":"1""#, r#""kt":"1","s":"0""#, 1);
    assert_ne!(reordered, text);
    assert_eq!(reordered.len(), text.len());
    assert!(matches!(
        KeyEvent::from_json(reordered.as_bytes()),
        Err(SignifyError::Validation(ValidationError::MalformedEvent(_)))
    ));

    let mut tampered: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    tampered["bt"] = json!("1");
    let tampered = KeyEvent::from_value(tampered).unwrap();
    assert!(KeyState::incept(&tampered).is_err());
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

#[test]
fn out_of_order_events_are_rejected() {
    let salter = controller_salt();
    let mut keeper = salty(&salter, 0, 1);
    let keys = keeper.incept(true).unwrap();
    let icp = incept(InceptArgs {
        keys: keys.keys,
        ndigs: keys.ndigs,
        ..InceptArgs::default()
    })
    .unwrap();
    let s0 = KeyState::incept(&icp).unwrap();
    let ixn1 = interact(&s0, vec![]).unwrap();
    let s1 = s0.apply(&ixn1).unwrap();
    let ixn2 = interact(&s1, vec![]).unwrap();

    assert!(matches!(
        s0.apply(&ixn2),
        Err(SignifyError::Chain(ChainError::SequenceGap { expected: 1, got: 2 }))
    ));
    assert!(matches!(
        KeyState::verify_chain(&[icp.clone(), ixn2]),
        Err(SignifyError::Chain(_))
    ));
    assert!(matches!(s1.apply(&icp), Err(SignifyError::Chain(_))));
    assert_eq!(s1.s, 1);
    assert!(matches!(
        KeyState::verify_chain(&[]),
        Err(SignifyError::Chain(ChainError::EmptyLog))
    ));
}

#[test]
fn uncommitted_rotation_is_rejected() {
    let salter = controller_salt();
    let mut keeper = salty(&salter, 0, 1);
    let keys = keeper.incept(true).unwrap();
    let icp = incept(InceptArgs {
        keys: keys.keys,
        ndigs: keys.ndigs,
        ..InceptArgs::default()
    })
    .unwrap();
    let state = KeyState::incept(&icp).unwrap();

    // Keys from an unrelated keeper were never committed to.
    let mut stranger = salty(&salter, 7, 1);
    let foreign = stranger.incept(true).unwrap();
    let result = rotate(
        &state,
        RotateArgs {
            keys: foreign.keys,
            ndigs: foreign.ndigs,
            ..RotateArgs::default()
        },
    );
    assert!(matches!(
        result,
        Err(SignifyError::Validation(ValidationError::NextKeyMismatch(_)))
    ));
}

// ---------------------------------------------------------------------------
// Delegation and anchoring
// ---------------------------------------------------------------------------

#[test]
fn delegation_requires_an_anchoring_seal() {
    let salter = controller_salt();
    let mut delegator_keeper = salty(&salter, 0, 1);
    let keys = delegator_keeper.incept(true).unwrap();
    let delegator_icp = incept(InceptArgs {
        keys: keys.keys,
        ndigs: keys.ndigs,
        ..InceptArgs::default()
    })
    .unwrap();
    let delegator = KeyState::incept(&delegator_icp).unwrap();

    let mut delegate_keeper = salty(&salter, 1, 1);
    let keys = delegate_keeper.incept(true).unwrap();
    let dip = incept(InceptArgs {
        keys: keys.keys,
        ndigs: keys.ndigs,
        delpre: Some(delegator.i.clone()),
        ..InceptArgs::default()
    })
    .unwrap();

    assert!(matches!(
        verify_delegation(&dip, &[delegator_icp.clone()]),
        Err(SignifyError::Chain(ChainError::DelegationNotApproved(_)))
    ));

    let seal = EventSeal {
        i: dip.prefix().to_string(),
        s: 0,
        d: dip.said().to_string(),
    };
    let approval = interact(&delegator, vec![seal.to_value()]).unwrap();
    verify_delegation(&dip, &[delegator_icp, approval]).unwrap();
}

#[test]
fn credential_events_extend_the_issuer_log() {
    let salter = controller_salt();
    let mut keeper = salty(&salter, 0, 1);
    let keys = keeper.incept(true).unwrap();
    let icp = signed(
        &keeper,
        incept(InceptArgs {
            keys: keys.keys,
            ndigs: keys.ndigs,
            ..InceptArgs::default()
        })
        .unwrap(),
    );
    let state = KeyState::incept_signed(&icp.event, &icp.sigers().unwrap()).unwrap();

    let registry = registry_inception(&state, &keeper, None).unwrap();
    let state = state
        .apply_signed(&registry.ixn.event, &registry.ixn.sigers().unwrap())
        .unwrap();

    let issued = issue_credential(
        &state,
        &keeper,
        CredentialArgs {
            registry: registry.registry().to_string(),
            schema: "EBfdlu8R27Fbx-ehrqwImnK-8Cm79sqbAQ4MmvEAYqao".into(),
            ..CredentialArgs::default()
        },
    )
    .unwrap();
    let state = state
        .apply_signed(&issued.ixn.event, &issued.ixn.sigers().unwrap())
        .unwrap();
    assert_eq!(state.s, 2);
    assert_eq!(issued.acdc["ri"], registry.registry());
    assert_eq!(issued.csigs.len(), 1);

    let log = vec![icp, registry.ixn, issued.ixn];
    assert_eq!(KeyState::verify_signed_chain(&pairs(&log)).unwrap(), state);
}
