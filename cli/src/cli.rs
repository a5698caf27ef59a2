//! # CLI Interface
//!
//! Command-line structure for `signify`, using `clap` derive. Every flag can
//! also be set through a `SIGNIFY_*` environment variable.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use signify_protocol::crypto::Tier;

use crate::logging::LogFormat;

/// Client-side tooling for self-certifying identifiers.
///
/// Generates passcodes, prints the controller boot request a passcode
/// derives, and verifies key event logs offline.
#[derive(Parser, Debug)]
#[command(name = "signify", version, propagate_version = true)]
pub struct SignifyCli {
    /// Log output format (logs go to stderr).
    #[arg(long, global = true, env = "SIGNIFY_LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a fresh 21-character passcode.
    Passcode,
    /// Print the boot request for the controller a passcode derives.
    Boot(BootArgs),
    /// Verify a key event log and print the resulting key state.
    VerifyKel(VerifyKelArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Args, Debug)]
pub struct BootArgs {
    /// Controller passcode.
    ///
    /// Prefer the environment variable: flags end up in shell history.
    #[arg(long, env = "SIGNIFY_PASSCODE", hide_env_values = true)]
    pub passcode: String,

    /// Argon2id work factor used to stretch the passcode.
    #[arg(long, env = "SIGNIFY_TIER", value_enum, default_value_t = TierArg::Low)]
    pub tier: TierArg,
}

#[derive(Args, Debug)]
pub struct VerifyKelArgs {
    /// JSON array of events, or of `{"event": ..., "sigs": [...]}` objects
    /// to also check signing thresholds.
    #[arg(long, short = 'f', env = "SIGNIFY_KEL_FILE")]
    pub file: PathBuf,
}

/// Argon2id tiers selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TierArg {
    Low,
    Med,
    High,
}

impl From<TierArg> for Tier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Low => Tier::Low,
            TierArg::Med => Tier::Med,
            TierArg::High => Tier::High,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        SignifyCli::command().debug_assert();
    }

    #[test]
    fn parses_verify_kel() {
        let cli = SignifyCli::parse_from(["signify", "verify-kel", "--file", "kel.json"]);
        match cli.command {
            Commands::VerifyKel(args) => assert_eq!(args.file, PathBuf::from("kel.json")),
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.log_format, LogFormat::Pretty);
    }

    #[test]
    fn parses_boot_tier() {
        let cli = SignifyCli::parse_from([
            "signify",
            "--log-format",
            "json",
            "boot",
            "--passcode",
            "0123456789abcdefghijk",
            "--tier",
            "med",
        ]);
        let Commands::Boot(args) = cli.command else {
            panic!("expected boot");
        };
        assert_eq!(Tier::from(args.tier), Tier::Med);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
