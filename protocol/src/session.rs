//! # Client Session
//!
//! A [`Session`] is one client connected (or about to connect) to its
//! remote agent. It owns the [`Controller`], the [`Agent`] once known and
//! the index of the next managed identifier. Authenticators and keepers are
//! built on demand and borrow from it.
//!
//! ```text
//! Session::new(bran)  ──boot_request()──▶  agent creates itself
//!        │
//!        └──connect(AgentState)──▶ pending approval? ──▶ accept(ixn)
//!                 │
//!                 ├── sign_request / verify_response
//!                 └── create / rotate / interact identifiers
//! ```
//!
//! Nothing here talks to the network. Every operation returns the body or
//! headers to send and leaves the transport to the caller.

use chrono::{DateTime, Utc};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::authing::{header_value, Authenticator};
use crate::config::{
    BOOT_PIDX, HEADER_RESOURCE, HEADER_TIMESTAMP, TIMESTAMP_FORMAT, TRAIT_DO_NOT_DELEGATE,
    TRAIT_ESTABLISHMENT_ONLY,
};
use crate::controller::{Agent, Controller, ControllerState};
use crate::crypto::{MatterCode, Tier};
use crate::error::{AuthError, Result, SignifyError, ValidationError};
use crate::eventing::{
    incept, interact, rotate, InceptArgs, KeyEvent, KeyState, RotateArgs, SignedEvent,
};
use crate::keeping::{
    Algo, AnyKeeper, KeeperParams, Keeper, KeyManager, RandyOptions, SaltyOptions,
};
use crate::tholder::Sith;

const CONTENT_TYPE_JSON: &str = "application/json";

/// Body the agent needs to create itself for a new controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootRequest {
    pub icp: KeyEvent,
    pub sig: String,
    pub stem: &'static str,
    pub pidx: u64,
    pub tier: Tier,
}

/// What the agent reports about itself and the controller on connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent: KeyState,
    pub controller: ControllerState,
    pub ridx: u64,
    pub pidx: u64,
}

/// Options for [`Session::create_identifier`].
#[derive(Debug, Clone)]
pub struct CreateIdentifierOptions {
    /// Key-derivation strategy. Default: salty.
    pub algo: Algo,
    /// Whether the identifier can ever rotate. Default: true.
    pub transferable: bool,
    /// Number of current keys. Default: 1.
    pub count: usize,
    /// Number of committed next keys. Default: 1.
    pub ncount: usize,
    /// Current signing threshold. Default: simple majority.
    pub isith: Option<Sith>,
    /// Next signing threshold. Default: simple majority of the next keys.
    pub nsith: Option<Sith>,
    pub wits: Vec<String>,
    /// Witness threshold. Default: `ample(len(wits))`.
    pub toad: Option<u64>,
    /// Add the `EO` trait. Default: false.
    pub establishment_only: bool,
    /// Add the `DND` trait. Default: false.
    pub do_not_delegate: bool,
    /// Delegator prefix; makes the inception a `dip`. Default: none.
    pub delpre: Option<String>,
    pub data: Vec<Value>,
    /// Salty only: passcode used as the identifier salt. Default: random.
    pub bran: Option<String>,
    /// Salty only: path stem. Default: `signify:aid`.
    pub stem: Option<String>,
    /// Salty only: Argon2 tier. Default: the controller's tier.
    pub tier: Option<Tier>,
    /// Digest code for next-key commitments. Default: Blake3-256.
    pub dcode: MatterCode,
}

impl Default for CreateIdentifierOptions {
    fn default() -> Self {
        Self {
            algo: Algo::Salty,
            transferable: true,
            count: 1,
            ncount: 1,
            isith: None,
            nsith: None,
            wits: Vec::new(),
            toad: None,
            establishment_only: false,
            do_not_delegate: false,
            delpre: None,
            data: Vec::new(),
            bran: None,
            stem: None,
            tier: None,
            dcode: MatterCode::Blake3Digest,
        }
    }
}

/// Options for [`Session::rotate_identifier`].
#[derive(Debug, Clone)]
pub struct RotateIdentifierOptions {
    /// Whether the rotated identifier stays transferable. Default: true.
    pub transferable: bool,
    /// Number of next keys to commit to. Default: the current next count.
    pub ncount: Option<usize>,
    /// Default: the prior next threshold.
    pub isith: Option<Sith>,
    pub nsith: Option<Sith>,
    pub cuts: Vec<String>,
    pub adds: Vec<String>,
    pub toad: Option<u64>,
    pub data: Vec<Value>,
}

impl Default for RotateIdentifierOptions {
    fn default() -> Self {
        Self {
            transferable: true,
            ncount: None,
            isith: None,
            nsith: None,
            cuts: Vec::new(),
            adds: Vec::new(),
            toad: None,
            data: Vec::new(),
        }
    }
}

/// A signed event for a managed identifier, the state it leads to once the
/// agent accepts it, and the keeper parameters to persist alongside.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifierEvent {
    #[serde(flatten)]
    pub event: SignedEvent,
    #[serde(skip)]
    pub state: KeyState,
    pub params: KeeperParams,
}

/// One client and its agent.
#[derive(Debug)]
pub struct Session {
    controller: Controller,
    agent: Option<Agent>,
    pidx: u64,
}

impl Session {
    /// Derive the controller from `bran`. The session is not connected yet.
    pub fn new(bran: &str, tier: Tier) -> Result<Self> {
        Ok(Self {
            controller: Controller::new(bran, tier)?,
            agent: None,
            pidx: 0,
        })
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn agent(&self) -> Option<&Agent> {
        self.agent.as_ref()
    }

    /// Index the next managed identifier will be derived at.
    pub fn pidx(&self) -> u64 {
        self.pidx
    }

    pub fn is_connected(&self) -> bool {
        self.agent.is_some()
    }

    /// The request that asks the agent service to create our agent.
    pub fn boot_request(&self) -> Result<BootRequest> {
        let signed = self.controller.signed_event()?;
        let sig = signed.sigs.into_iter().next().ok_or_else(|| {
            SignifyError::from(ValidationError::InvalidState(
                "controller inception is unsigned".into(),
            ))
        })?;
        Ok(BootRequest {
            icp: signed.event,
            sig,
            stem: self.controller.stem(),
            pidx: BOOT_PIDX,
            tier: self.controller.tier(),
        })
    }

    /// Adopt the agent's view of itself and of the controller.
    ///
    /// Returns the delegation approval the caller must send when the
    /// controller has not approved its agent yet. Nothing is changed when
    /// the agent is rejected.
    pub fn connect(&mut self, state: AgentState) -> Result<Option<SignedEvent>> {
        let agent = Agent::from_state(state.agent)?;
        let controller = self.controller.resume(state.ridx, state.controller)?;
        if agent.anchor() != controller.pre() {
            warn!(agent = %agent.pre(), anchor = %agent.anchor(), controller = %controller.pre(), "agent is not delegated from this controller");
            return Err(AuthError::UnanchoredAgent {
                controller: controller.pre().to_string(),
                anchor: agent.anchor().to_string(),
            }
            .into());
        }

        let approval = if controller.state().s == 0 {
            Some(controller.approve_delegation(&agent)?)
        } else {
            None
        };
        info!(controller = %controller.pre(), agent = %agent.pre(), pidx = state.pidx, pending = approval.is_some(), "connected to agent");
        self.controller = controller;
        self.agent = Some(agent);
        self.pidx = state.pidx;
        Ok(approval)
    }

    /// Commit a controller event the agent has confirmed.
    pub fn accept(&mut self, event: KeyEvent) -> Result<()> {
        self.controller.accept(event)
    }

    fn connected(&self) -> Result<&Agent> {
        self.agent
            .as_ref()
            .ok_or_else(|| SignifyError::Unsupported("session is not connected to an agent".into()))
    }

    /// Headers for a request to the agent, signed by the controller.
    pub fn sign_request(&self, method: &Method, path: &str, body_len: usize) -> Result<HeaderMap> {
        self.sign_request_at(method, path, body_len, Utc::now())
    }

    /// [`Session::sign_request`] at an explicit time.
    pub fn sign_request_at(
        &self,
        method: &Method,
        path: &str,
        body_len: usize,
        now: DateTime<Utc>,
    ) -> Result<HeaderMap> {
        let agent = self.connected()?;
        let headers = request_headers(self.controller.pre(), body_len, now)?;
        Authenticator::new(self.controller.signer(), agent.pre(), agent.verfer()).sign_at(
            &headers,
            method,
            strip_query(path),
            now.timestamp(),
        )
    }

    /// Authenticate a response from the agent to `method path`.
    pub fn verify_response(&self, method: &Method, path: &str, headers: &HeaderMap) -> Result<()> {
        let agent = self.connected()?;
        let verified = Authenticator::new(self.controller.signer(), agent.pre(), agent.verfer())
            .verify(headers, method, strip_query(path))?;
        if !verified {
            return Err(AuthError::VerificationFailed.into());
        }
        Ok(())
    }

    fn keeper_manager(&self) -> KeyManager<'_> {
        KeyManager::new(self.controller.salter())
    }

    /// Incept a new managed identifier. Consumes one identifier index.
    pub fn create_identifier(&mut self, options: CreateIdentifierOptions) -> Result<IdentifierEvent> {
        self.connected()?;
        let manager = self.keeper_manager();
        let mut keeper = match options.algo {
            Algo::Salty => manager.new_salty(
                self.pidx,
                SaltyOptions {
                    bran: options.bran,
                    stem: options.stem,
                    tier: options.tier.unwrap_or_else(|| self.controller.tier()),
                    count: options.count,
                    ncount: options.ncount,
                    dcode: options.dcode,
                },
            )?,
            Algo::Randy => manager.new_randy(RandyOptions {
                count: options.count,
                ncount: options.ncount,
                dcode: options.dcode,
            })?,
        };
        let keys = keeper.incept(options.transferable)?;

        let mut cnfg = Vec::new();
        if options.establishment_only {
            cnfg.push(TRAIT_ESTABLISHMENT_ONLY.to_string());
        }
        if options.do_not_delegate {
            cnfg.push(TRAIT_DO_NOT_DELEGATE.to_string());
        }
        let code = if options.transferable {
            MatterCode::Blake3Digest
        } else {
            MatterCode::Ed25519NonTransferable
        };
        let event = incept(InceptArgs {
            keys: keys.keys,
            isith: options.isith,
            ndigs: keys.ndigs,
            nsith: options.nsith,
            wits: options.wits,
            toad: options.toad,
            cnfg,
            data: options.data,
            code,
            delpre: options.delpre,
        })?;
        let state = KeyState::incept(&event)?;
        let signed = sign_event(&keeper, event)?;

        info!(prefix = %state.i, pidx = self.pidx, algo = ?keeper.algo(), "created identifier");
        self.pidx += 1;
        Ok(IdentifierEvent {
            event: signed,
            state,
            params: keeper.params(),
        })
    }

    /// Rotate a managed identifier to its committed next keys.
    pub fn rotate_identifier(
        &self,
        state: &KeyState,
        params: &KeeperParams,
        options: RotateIdentifierOptions,
    ) -> Result<IdentifierEvent> {
        self.connected()?;
        let mut keeper = self.keeper_manager().restore(params)?;
        let ncount = options.ncount.unwrap_or(state.n.len());
        let keys = keeper.rotate(ncount, options.transferable)?;
        let event = rotate(
            state,
            RotateArgs {
                keys: keys.keys,
                isith: options.isith,
                ndigs: keys.ndigs,
                nsith: options.nsith,
                cuts: options.cuts,
                adds: options.adds,
                toad: options.toad,
                data: options.data,
            },
        )?;
        let next = state.apply(&event)?;
        let signed = sign_event(&keeper, event)?;
        Ok(IdentifierEvent {
            event: signed,
            state: next,
            params: keeper.params(),
        })
    }

    /// Anchor `data` in a managed identifier's log.
    pub fn interact_identifier(
        &self,
        state: &KeyState,
        params: &KeeperParams,
        data: Vec<Value>,
    ) -> Result<IdentifierEvent> {
        self.connected()?;
        let keeper = self.keeper_manager().restore(params)?;
        let event = interact(state, data)?;
        let next = state.apply(&event)?;
        let signed = sign_event(&keeper, event)?;
        Ok(IdentifierEvent {
            event: signed,
            state: next,
            params: params.clone(),
        })
    }

    /// Headers for a request signed by a managed identifier's first current
    /// key instead of the controller.
    pub fn sign_request_as(
        &self,
        pre: &str,
        params: &KeeperParams,
        method: &Method,
        path: &str,
        body_len: usize,
    ) -> Result<HeaderMap> {
        let agent = self.connected()?;
        let keeper = self.keeper_manager().restore(params)?;
        let signer = keeper.signers().first().ok_or_else(|| {
            SignifyError::from(ValidationError::InvalidKeys(format!(
                "identifier {pre} has no current keys"
            )))
        })?;
        let now = Utc::now();
        let headers = request_headers(pre, body_len, now)?;
        Authenticator::new(signer, agent.pre(), agent.verfer()).sign_at(
            &headers,
            method,
            strip_query(path),
            now.timestamp(),
        )
    }
}

fn sign_event(keeper: &AnyKeeper, event: KeyEvent) -> Result<SignedEvent> {
    let sigs = keeper.sign(&event.raw()?, true)?;
    Ok(SignedEvent { event, sigs })
}

fn request_headers(resource: &str, body_len: usize, now: DateTime<Utc>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static(HEADER_RESOURCE),
        header_value(HEADER_RESOURCE, resource.to_string())?,
    );
    headers.insert(
        HeaderName::from_static(HEADER_TIMESTAMP),
        header_value(HEADER_TIMESTAMP, now.format(TIMESTAMP_FORMAT).to_string())?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
    Ok(headers)
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(path, _)| path)
}
