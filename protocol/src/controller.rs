//! # Controller & Agent
//!
//! The [`Controller`] is the client's own identifier. Its keys are derived
//! from the passcode with the stem `signify:controller`, so the passcode is
//! all a client needs to rebuild it. Its inception is created in memory
//! when the client starts and only becomes durable once the remote agent
//! accepts it at boot.
//!
//! The [`Agent`] is the remote custodial agent's identifier: a delegated
//! identifier whose delegator is the controller. Its current key verifies
//! every response the agent sends.
//!
//! ## Advancing state
//!
//! `approve_delegation` and `rotate` only *build* events. The controller
//! moves forward in [`Controller::accept`], which the caller invokes once
//! the agent has confirmed the event. That keeps the local view from ever
//! running ahead of the agent's.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CONTROLLER_STEM;
use crate::crypto::{MatterCode, Salter, Signer, Tier, Verfer};
use crate::error::{ChainError, Result, ValidationError};
use crate::eventing::{
    incept, interact, next_digests, rotate, EventSeal, Ilk, InceptArgs, KeyEvent, KeyState,
    RotateArgs, SignedEvent,
};
use crate::tholder::Sith;

/// The controller's state as recorded by the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// Key state after the latest accepted event.
    pub state: KeyState,
    /// The latest establishment event.
    pub ee: KeyEvent,
}

impl ControllerState {
    /// The establishment event must carry a valid SAID and be the one the
    /// state summarizes.
    fn check(&self) -> Result<()> {
        if let Err(err) = self.ee.verify_said() {
            warn!(prefix = %self.state.i, error = %err, "recorded establishment event fails SAID verification");
            return Err(err);
        }
        if self.ee.prefix() != self.state.i {
            return Err(ChainError::PrefixMismatch {
                expected: self.state.i.clone(),
                got: self.ee.prefix().to_string(),
            }
            .into());
        }
        if self.ee.said() != self.state.ee.d || self.ee.sn() != self.state.ee.s {
            warn!(prefix = %self.state.i, "recorded establishment event is not the one in the key state");
            return Err(ChainError::DigestMismatch {
                label: "ee".into(),
                stored: self.state.ee.d.clone(),
                computed: self.ee.said().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// The client's own identifier.
#[derive(Debug)]
pub struct Controller {
    salter: Salter,
    ridx: u64,
    signer: Signer,
    nsigner: Signer,
    event: KeyEvent,
    state: KeyState,
}

impl Controller {
    /// Derive the controller from a passcode and incept it in memory.
    pub fn new(bran: &str, tier: Tier) -> Result<Self> {
        Self::with_state(bran, tier, 0, None)
    }

    /// Derive the controller at rotation index `ridx`, adopting the agent's
    /// recorded state. While the last establishment event is still the
    /// inception, the inception is rebuilt locally and must reproduce the
    /// recorded prefix.
    ///
    /// A recorded state must belong to the keys this passcode derives;
    /// anything else means the passcode is wrong.
    pub fn with_state(
        bran: &str,
        tier: Tier,
        ridx: u64,
        recorded: Option<ControllerState>,
    ) -> Result<Self> {
        Self::from_salter(Salter::from_bran(bran, tier)?, ridx, recorded)
    }

    /// Rebuild this controller from the agent's record of it, keeping the
    /// passcode-derived salt.
    pub fn resume(&self, ridx: u64, recorded: ControllerState) -> Result<Self> {
        Self::from_salter(self.salter.clone(), ridx, Some(recorded))
    }

    fn from_salter(salter: Salter, ridx: u64, recorded: Option<ControllerState>) -> Result<Self> {
        if let Some(recorded) = &recorded {
            recorded.check()?;
        }
        let signer = derive_signer(&salter, ridx)?;
        let nsigner = derive_signer(&salter, ridx + 1)?;

        let (event, state) = match recorded {
            Some(recorded) if recorded.state.ee.s > 0 => {
                if recorded.state.k.first() != Some(&signer.verfer().qb64()) {
                    warn!(prefix = %recorded.state.i, ridx, "recorded controller keys do not match passcode");
                    return Err(ValidationError::InvalidState(format!(
                        "controller {} is not controlled by this passcode at rotation {ridx}",
                        recorded.state.i
                    ))
                    .into());
                }
                (recorded.ee, recorded.state)
            }
            recorded => {
                let event = incept(InceptArgs {
                    keys: vec![signer.verfer().qb64()],
                    isith: Some(Sith::from(1)),
                    ndigs: next_digests(MatterCode::Blake3Digest, &[nsigner.verfer()])?,
                    nsith: Some(Sith::from(1)),
                    toad: Some(0),
                    ..InceptArgs::default()
                })?;
                let state = KeyState::incept(&event)?;
                match recorded {
                    Some(recorded) if recorded.state.i != state.i => {
                        warn!(recorded = %recorded.state.i, derived = %state.i, "passcode derives a different controller");
                        return Err(ChainError::PrefixMismatch {
                            expected: recorded.state.i,
                            got: state.i,
                        }
                        .into());
                    }
                    // Interactions since inception (e.g. the delegation
                    // approval) are only known to the agent.
                    Some(recorded) => (event, recorded.state),
                    None => (event, state),
                }
            }
        };

        info!(prefix = %state.i, sn = state.s, ridx, "controller ready");
        Ok(Self {
            salter,
            ridx,
            signer,
            nsigner,
            event,
            state,
        })
    }

    /// Controller prefix.
    pub fn pre(&self) -> &str {
        &self.state.i
    }

    pub fn stem(&self) -> &'static str {
        CONTROLLER_STEM
    }

    pub fn tier(&self) -> Tier {
        self.salter.tier()
    }

    pub fn ridx(&self) -> u64 {
        self.ridx
    }

    pub fn salter(&self) -> &Salter {
        &self.salter
    }

    /// The current signing key.
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    pub fn state(&self) -> &KeyState {
        &self.state
    }

    /// The most recent event produced or accepted.
    pub fn event(&self) -> &KeyEvent {
        &self.event
    }

    /// The most recent event signed by the current key.
    pub fn signed_event(&self) -> Result<SignedEvent> {
        sign_with(&self.signer, self.event.clone())
    }

    /// Build the interaction that approves the agent's delegated inception.
    pub fn approve_delegation(&self, agent: &Agent) -> Result<SignedEvent> {
        let seal = EventSeal {
            i: agent.pre().to_string(),
            s: agent.state().ee.s,
            d: agent.state().ee.d.clone(),
        };
        let event = interact(&self.state, vec![seal.to_value()])?;
        info!(controller = %self.pre(), agent = %agent.pre(), "built delegation approval");
        sign_with(&self.signer, event)
    }

    /// Build a rotation to the pre-committed next key, committing to the
    /// key after it.
    pub fn rotate(&self) -> Result<SignedEvent> {
        let after = derive_signer(&self.salter, self.ridx + 2)?;
        let event = rotate(
            &self.state,
            RotateArgs {
                keys: vec![self.nsigner.verfer().qb64()],
                isith: Some(Sith::from(1)),
                ndigs: next_digests(MatterCode::Blake3Digest, &[after.verfer()])?,
                nsith: Some(Sith::from(1)),
                ..RotateArgs::default()
            },
        )?;
        sign_with(&self.nsigner, event)
    }

    /// Commit an event the agent has confirmed. Rotations advance the
    /// rotation index.
    pub fn accept(&mut self, event: KeyEvent) -> Result<()> {
        let state = self.state.apply(&event)?;
        if event.is_establishment() {
            let nsigner = derive_signer(&self.salter, self.ridx + 2)?;
            self.ridx += 1;
            self.signer = std::mem::replace(&mut self.nsigner, nsigner);
        }
        info!(prefix = %state.i, sn = state.s, ilk = %event.ilk(), "controller accepted event");
        self.state = state;
        self.event = event;
        Ok(())
    }
}

/// The controller key at rotation index `ridx`: path `{stem}{ridx:x}{ridx:x}`.
fn derive_signer(salter: &Salter, ridx: u64) -> Result<Signer> {
    let ridx = usize::try_from(ridx)
        .map_err(|_| ValidationError::InvalidKeys(format!("rotation index {ridx} out of range")))?;
    let path = format!("{CONTROLLER_STEM}{ridx:x}");
    let mut signers = salter.signers(1, ridx, &path, true, None)?;
    signers
        .pop()
        .ok_or_else(|| ValidationError::InvalidKeys("no controller key derived".into()).into())
}

fn sign_with(signer: &Signer, event: KeyEvent) -> Result<SignedEvent> {
    let siger = signer.sign_indexed(&event.raw()?, 0, None)?;
    Ok(SignedEvent {
        event,
        sigs: vec![siger.qb64()],
    })
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// The remote agent, as far as the client needs to know it.
#[derive(Debug, Clone)]
pub struct Agent {
    state: KeyState,
    verfer: Verfer,
}

impl Agent {
    /// Accept the agent's key state. The agent must be a delegated
    /// inception with exactly one key and one next-key commitment.
    pub fn from_state(state: KeyState) -> Result<Self> {
        if state.et != Ilk::Dip {
            return Err(ValidationError::InvalidState(format!(
                "agent {} was not incepted by delegation (et = {})",
                state.i, state.et
            ))
            .into());
        }
        if state.di.is_none() {
            return Err(ValidationError::InvalidState(format!(
                "agent {} has no delegator anchor",
                state.i
            ))
            .into());
        }
        if state.k.len() != 1 || state.n.len() != 1 {
            return Err(ValidationError::InvalidState(format!(
                "agent {} must have exactly one key and one next digest, has {} and {}",
                state.i,
                state.k.len(),
                state.n.len()
            ))
            .into());
        }
        let verfer = Verfer::from_qb64(&state.k[0])?;
        Ok(Self { state, verfer })
    }

    /// Agent prefix.
    pub fn pre(&self) -> &str {
        &self.state.i
    }

    /// The controller prefix this agent is delegated from.
    pub fn anchor(&self) -> &str {
        self.state.di.as_deref().unwrap_or_default()
    }

    pub fn verfer(&self) -> &Verfer {
        &self.verfer
    }

    pub fn state(&self) -> &KeyState {
        &self.state
    }

    /// Check the agent's delegated inception against the controller's log.
    pub fn verify_anchor(&self, controller: &Controller) -> Result<()> {
        if self.anchor() != controller.pre() {
            return Err(ChainError::PrefixMismatch {
                expected: controller.pre().to_string(),
                got: self.anchor().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::Siger;
    use crate::SignifyError;

    pub(crate) const BRAN: &str = "0123456789abcdefghijk";

    /// A delegated agent state anchored to `controller`.
    pub(crate) fn agent_state(controller: &str) -> KeyState {
        let key = Signer::from_seed(&[9u8; 32], true);
        let next = Signer::from_seed(&[10u8; 32], true);
        let event = incept(InceptArgs {
            keys: vec![key.verfer().qb64()],
            ndigs: next_digests(MatterCode::Blake3Digest, &[next.verfer()]).unwrap(),
            delpre: Some(controller.to_string()),
            ..InceptArgs::default()
        })
        .unwrap();
        KeyState::incept(&event).unwrap()
    }

    #[test]
    fn test_controller_is_reproducible() {
        let a = Controller::new(BRAN, Tier::Temp).unwrap();
        let b = Controller::new(BRAN, Tier::Temp).unwrap();
        assert_eq!(a.pre(), b.pre());
        assert_eq!(a.event(), b.event());
        assert_eq!(a.event().ilk(), Ilk::Icp);
    }

    #[test]
    fn test_controller_key_path() {
        let controller = Controller::new(BRAN, Tier::Temp).unwrap();
        let salter = Salter::from_bran(BRAN, Tier::Temp).unwrap();
        let expected = salter.signer("signify:controller00", true, None).unwrap();
        assert_eq!(controller.signer(), &expected);
        assert_eq!(controller.state().k, vec![expected.verfer().qb64()]);
    }

    #[test]
    fn test_signed_event_verifies() {
        let controller = Controller::new(BRAN, Tier::Temp).unwrap();
        let signed = controller.signed_event().unwrap();
        let sigers = signed.sigers().unwrap();
        KeyState::incept_signed(&signed.event, &sigers).unwrap();
    }

    #[test]
    fn test_approve_delegation_seals_agent() {
        let mut controller = Controller::new(BRAN, Tier::Temp).unwrap();
        let agent = Agent::from_state(agent_state(controller.pre())).unwrap();

        let approval = controller.approve_delegation(&agent).unwrap();
        assert_eq!(approval.event.ilk(), Ilk::Ixn);
        assert_eq!(controller.state().s, 0, "building must not commit");

        let seal = EventSeal {
            i: agent.pre().to_string(),
            s: 0,
            d: agent.state().d.clone(),
        };
        assert!(seal.matches(&approval.event.anchors()[0]));

        controller.accept(approval.event).unwrap();
        assert_eq!(controller.state().s, 1);
        assert_eq!(controller.ridx(), 0);
    }

    #[test]
    fn test_rotation_advances_rotation_index() {
        let mut controller = Controller::new(BRAN, Tier::Temp).unwrap();
        let before = controller.signer().clone();

        let rotation = controller.rotate().unwrap();
        let sigers: Vec<Siger> = rotation.sigers().unwrap();
        let applied = controller.state().apply_signed(&rotation.event, &sigers).unwrap();
        assert_eq!(applied.s, 1);

        controller.accept(rotation.event.clone()).unwrap();
        assert_eq!(controller.ridx(), 1);
        assert_ne!(controller.signer(), &before);

        // Accepting the same event twice is a sequence error.
        assert!(controller.accept(rotation.event).is_err());
        assert_eq!(controller.ridx(), 1);

        // A second rotation still fulfils the commitment.
        let second = controller.rotate().unwrap();
        controller.accept(second.event).unwrap();
        assert_eq!(controller.ridx(), 2);
    }

    #[test]
    fn test_adopts_recorded_state_after_rotation() {
        let mut controller = Controller::new(BRAN, Tier::Temp).unwrap();
        let rotation = controller.rotate().unwrap();
        controller.accept(rotation.event.clone()).unwrap();

        let recorded = ControllerState {
            state: controller.state().clone(),
            ee: rotation.event,
        };
        let restored = Controller::with_state(BRAN, Tier::Temp, 1, Some(recorded.clone())).unwrap();
        assert_eq!(restored.state(), controller.state());
        assert_eq!(restored.signer(), controller.signer());

        // Wrong rotation index: the recorded key is not ours.
        assert!(Controller::with_state(BRAN, Tier::Temp, 0, Some(recorded)).is_err());
    }

    #[test]
    fn test_recorded_event_must_match_state() {
        let mut controller = Controller::new(BRAN, Tier::Temp).unwrap();
        let inception = controller.event().clone();
        let rotation = controller.rotate().unwrap();
        controller.accept(rotation.event.clone()).unwrap();
        let recorded = ControllerState {
            state: controller.state().clone(),
            ee: rotation.event,
        };

        // An establishment event other than the one the state names.
        let mut stale = recorded.clone();
        stale.ee = inception;
        assert!(matches!(
            Controller::with_state(BRAN, Tier::Temp, 1, Some(stale)),
            Err(SignifyError::Chain(ChainError::DigestMismatch { .. }))
        ));

        // Edited after it was SAIDed.
        let mut forged = recorded;
        if let KeyEvent::Rotation(rot) = &mut forged.ee {
            rot.bt = 1;
        }
        assert!(matches!(
            Controller::with_state(BRAN, Tier::Temp, 1, Some(forged)),
            Err(SignifyError::Chain(ChainError::DigestMismatch { .. }))
        ));
    }

    #[test]
    fn test_recorded_inception_state_is_rebuilt_locally() {
        let controller = Controller::new(BRAN, Tier::Temp).unwrap();
        let recorded = ControllerState {
            state: controller.state().clone(),
            ee: controller.event().clone(),
        };
        let rebuilt = Controller::with_state(BRAN, Tier::Temp, 0, Some(recorded.clone())).unwrap();
        assert_eq!(rebuilt.event(), controller.event());

        let other = "kjihgfedcba9876543210";
        assert!(matches!(
            Controller::with_state(other, Tier::Temp, 0, Some(recorded)),
            Err(crate::SignifyError::Chain(ChainError::PrefixMismatch { .. }))
        ));
    }

    #[test]
    fn test_agent_requires_delegated_inception() {
        let controller = Controller::new(BRAN, Tier::Temp).unwrap();
        assert!(Agent::from_state(controller.state().clone()).is_err());

        let agent = Agent::from_state(agent_state(controller.pre())).unwrap();
        assert_eq!(agent.anchor(), controller.pre());
        agent.verify_anchor(&controller).unwrap();

        let stranger = Agent::from_state(agent_state(&agent.pre().to_string())).unwrap();
        assert!(stranger.verify_anchor(&controller).is_err());
    }

    #[test]
    fn test_agent_with_two_keys_rejected() {
        let mut state = agent_state("EAbcdefghijklmnopqrstuvwxyz0123456789ABCDEFG");
        state.k.push(state.k[0].clone());
        assert!(matches!(
            Agent::from_state(state),
            Err(crate::SignifyError::Validation(ValidationError::InvalidState(_)))
        ));
    }
}
