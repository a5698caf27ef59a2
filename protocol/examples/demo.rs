//! Interactive walkthrough of a client session.
//!
//! Boots a controller from a passcode, connects it to a simulated agent,
//! approves the delegation, signs a request, creates and rotates a managed
//! identifier, then issues a credential anchored in that identifier's log.
//! The output uses ANSI escape codes for colored terminal rendering.
//!
//! Run with:
//!   cargo run --example demo --release

use std::time::Instant;

use http::Method;

use signify_protocol::anchoring::{issue_credential, registry_inception, CredentialArgs};
use signify_protocol::authing::Authenticator;
use signify_protocol::controller::ControllerState;
use signify_protocol::crypto::{random_passcode, MatterCode, Signer, Tier};
use signify_protocol::eventing::{incept, next_digests, InceptArgs, KeyState};
use signify_protocol::keeping::KeyManager;
use signify_protocol::session::{AgentState, CreateIdentifierOptions, RotateIdentifierOptions, Session};

// ---------------------------------------------------------------------------
// ANSI color constants
// ---------------------------------------------------------------------------

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const MAGENTA: &str = "\x1b[35m";
const CYAN: &str = "\x1b[36m";
const WHITE: &str = "\x1b[37m";

const BG_BLUE: &str = "\x1b[44m";

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn banner() {
    println!();
    println!("{BG_BLUE}{BOLD}{WHITE}                                                              {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}    SIGNIFY  --  Client Session Walkthrough                   {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}    Ed25519 + BLAKE3 + Argon2id                               {RESET}");
    println!("{BG_BLUE}{BOLD}{WHITE}                                                              {RESET}");
    println!();
}

fn section(num: u32, title: &str) {
    println!();
    println!("{BOLD}{CYAN}===[{YELLOW} Step {num} {CYAN}]================================================={RESET}");
    println!("{BOLD}{WHITE}  {title}{RESET}");
}

fn success(text: &str) {
    println!("{GREEN}  [OK] {text}{RESET}");
}

fn info(label: &str, value: &str) {
    println!("{WHITE}  {BOLD}{label}:{RESET} {YELLOW}{value}{RESET}");
}

fn timing(label: &str, elapsed: std::time::Duration) {
    let ms = elapsed.as_secs_f64() * 1000.0;
    println!("{DIM}{MAGENTA}  [{label}: {ms:.2} ms]{RESET}");
}

// ---------------------------------------------------------------------------
// Walkthrough
// ---------------------------------------------------------------------------

fn main() {
    banner();

    section(1, "Derive the controller from a passcode");
    let bran = random_passcode();
    let start = Instant::now();
    let mut session = Session::new(&bran, Tier::Low).expect("controller derivation");
    timing("argon2id low", start.elapsed());
    info("passcode", &bran);
    info("controller", session.controller().pre());
    let boot = session.boot_request().expect("boot request");
    info("boot body", &serde_json::to_string(&boot).expect("serialize boot"));

    section(2, "Agent boots and the controller approves it");
    let agent_signer = Signer::from_seed(&[0x5a; 32], true);
    let agent_next = Signer::from_seed(&[0x5b; 32], true);
    let dip = incept(InceptArgs {
        keys: vec![agent_signer.verfer().qb64()],
        ndigs: next_digests(MatterCode::Blake3Digest, &[agent_next.verfer()]).expect("digest"),
        delpre: Some(session.controller().pre().to_string()),
        ..InceptArgs::default()
    })
    .expect("agent inception");
    let agent_state = KeyState::incept(&dip).expect("agent state");
    let report = AgentState {
        agent: agent_state.clone(),
        controller: ControllerState {
            state: session.controller().state().clone(),
            ee: session.controller().event().clone(),
        },
        ridx: 0,
        pidx: 0,
    };
    if let Some(approval) = session.connect(report).expect("connect") {
        info("approval", approval.event.said());
        session.accept(approval.event).expect("accept approval");
    }
    success(&format!("connected to agent {}", agent_state.i));

    section(3, "Sign a request, verify it the way the agent does");
    let headers = session
        .sign_request(&Method::GET, "/identifiers?last=10", 0)
        .expect("sign request");
    for (name, value) in &headers {
        info(name.as_str(), value.to_str().unwrap_or("<binary>"));
    }
    let controller_key = session.controller().signer().verfer();
    let accepted = Authenticator::new(&agent_signer, session.controller().pre(), &controller_key)
        .verify(&headers, &Method::GET, "/identifiers")
        .expect("well-formed request");
    success(&format!("agent accepts request: {accepted}"));

    section(4, "Create and rotate a managed identifier");
    let created = session
        .create_identifier(CreateIdentifierOptions {
            count: 3,
            ncount: 3,
            ..CreateIdentifierOptions::default()
        })
        .expect("create identifier");
    info("prefix", &created.state.i);
    info("keys", &created.state.k.join(", "));
    let rotated = session
        .rotate_identifier(&created.state, &created.params, RotateIdentifierOptions::default())
        .expect("rotate identifier");
    info("rotation", rotated.event.event.said());
    success(&format!("sequence number now {}", rotated.state.s));

    section(5, "Issue a credential anchored in the identifier's log");
    let manager = KeyManager::new(session.controller().salter());
    let keeper = manager.restore(&rotated.params).expect("restore keeper");
    let registry = registry_inception(&rotated.state, &keeper, None).expect("registry");
    let state = rotated
        .state
        .apply_signed(&registry.ixn.event, &registry.ixn.sigers().expect("sigers"))
        .expect("anchor registry");
    info("registry", registry.registry());

    let mut data = serde_json::Map::new();
    data.insert("name".into(), "demo".into());
    let issued = issue_credential(
        &state,
        &keeper,
        CredentialArgs {
            registry: registry.registry().to_string(),
            schema: "EBfdlu8R27Fbx-ehrqwImnK-8Cm79sqbAQ4MmvEAYqao".into(),
            data,
            ..CredentialArgs::default()
        },
    )
    .expect("issue credential");
    info("credential", issued.said());
    success("done");
    println!();
}
