// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Signify CLI
//!
//! Entry point for the `signify` binary. Parses arguments, initializes
//! logging, and runs one of four subcommands:
//!
//! - `passcode`  : print a fresh passcode
//! - `boot`      : print the controller boot request for a passcode
//! - `verify-kel`: verify a key event log read from a file
//! - `version`   : print build version information
//!
//! Results go to stdout as JSON; logs go to stderr.

mod cli;
mod logging;

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;

use signify_protocol::config;
use signify_protocol::crypto::{random_passcode, Siger};
use signify_protocol::eventing::{KeyEvent, KeyState};
use signify_protocol::session::Session;

use cli::{Commands, SignifyCli};

fn main() -> Result<()> {
    let cli = SignifyCli::parse();
    logging::init_logging(logging::DEFAULT_FILTER, cli.log_format);

    match cli.command {
        Commands::Passcode => {
            println!("{}", random_passcode());
            Ok(())
        }
        Commands::Boot(args) => {
            let session = Session::new(&args.passcode, args.tier.into())
                .context("failed to derive controller from passcode")?;
            let boot = session.boot_request()?;
            tracing::info!(controller = %session.controller().pre(), "built boot request");
            println!("{}", serde_json::to_string_pretty(&boot)?);
            Ok(())
        }
        Commands::VerifyKel(args) => {
            let state = verify_kel(&args.file)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Verify the log in `path`. Signed entries have their thresholds checked;
/// a log must be either fully signed or fully unsigned.
fn verify_kel(path: &Path) -> Result<KeyState> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key event log {}", path.display()))?;
    let entries: Vec<Value> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array", path.display()))?;

    let signed = entries.iter().all(|e| e.get("event").is_some());
    if !signed && entries.iter().any(|e| e.get("event").is_some()) {
        bail!("log mixes signed and unsigned entries");
    }

    let state = if signed {
        let events = entries
            .into_iter()
            .enumerate()
            .map(|(n, entry)| parse_signed(entry).with_context(|| format!("entry {n}")))
            .collect::<Result<Vec<_>>>()?;
        KeyState::verify_signed_chain(&events)?
    } else {
        let events = entries
            .into_iter()
            .enumerate()
            .map(|(n, entry)| KeyEvent::from_value(entry).with_context(|| format!("entry {n}")))
            .collect::<Result<Vec<_>>>()?;
        KeyState::verify_chain(&events)?
    };
    tracing::info!(prefix = %state.i, sn = state.s, "key event log verified");
    Ok(state)
}

fn parse_signed(mut entry: Value) -> Result<(KeyEvent, Vec<Siger>)> {
    let event = KeyEvent::from_value(entry["event"].take())?;
    let sigs = entry["sigs"]
        .as_array()
        .context("signed entry has no `sigs` array")?
        .iter()
        .map(|s| {
            let s = s.as_str().context("signature is not a string")?;
            Siger::from_qb64(s).with_context(|| format!("bad signature {s}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((event, sigs))
}

fn print_version() {
    println!("signify  {}", env!("CARGO_PKG_VERSION"));
    println!(
        "protocol {}{}.{}",
        config::KERI_PROTOCOL,
        config::VERSION_MAJOR,
        config::VERSION_MINOR
    );
    println!("rustc    {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

#[cfg(test)]
mod tests {
    use super::*;
    use signify_protocol::crypto::Tier;
    use std::io::Write;

    const BRAN: &str = "0123456789abcdefghijk";

    fn write_log(value: &Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    #[test]
    fn verifies_signed_controller_log() {
        let session = Session::new(BRAN, Tier::Temp).unwrap();
        let icp = session.controller().signed_event().unwrap();
        let rot = session.controller().rotate().unwrap();
        let log = serde_json::to_value(vec![icp, rot]).unwrap();

        let file = write_log(&log);
        let state = verify_kel(file.path()).unwrap();
        assert_eq!(state.i, session.controller().pre());
        assert_eq!(state.s, 1);
    }

    #[test]
    fn verifies_unsigned_log() {
        let session = Session::new(BRAN, Tier::Temp).unwrap();
        let log = serde_json::json!([session.controller().event()]);
        let file = write_log(&log);
        assert_eq!(verify_kel(file.path()).unwrap().s, 0);
    }

    #[test]
    fn rejects_mixed_and_broken_logs() {
        let session = Session::new(BRAN, Tier::Temp).unwrap();
        let icp = session.controller().signed_event().unwrap();
        let rot = session.controller().rotate().unwrap();

        let mixed = serde_json::json!([icp, rot.event]);
        assert!(verify_kel(write_log(&mixed).path()).is_err());

        let gap = serde_json::json!([session.controller().event(), rot.event, rot.event]);
        assert!(verify_kel(write_log(&gap).path()).is_err());

        assert!(verify_kel(write_log(&serde_json::json!([])).path()).is_err());
    }
}
