// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Signify Protocol: Client-Side Key Event Engine
//!
//! Everything a client needs to own a self-certifying identifier without
//! ever handing its private keys to the server that hosts it: building and
//! verifying key event logs, deriving keys from a passcode, checking signing
//! thresholds, and authenticating every HTTP exchange with the remote agent.
//!
//! The library does no network I/O. It produces request bodies, signed
//! events and signature headers, and it verifies what comes back. Moving
//! bytes is the caller's job.
//!
//! ## Architecture
//!
//! Leaf-first:
//!
//! - **crypto**: qb64 codec, digests, Ed25519 keys and signatures, salts,
//!   and the cipher that seals keeper secrets.
//! - **said**: self-addressing digests and version strings.
//! - **tholder**: simple and weighted signing thresholds.
//! - **keeping**: deterministic and random key-derivation strategies.
//! - **eventing**: inception/rotation/interaction events and the rules
//!   that chain them into a verifiable log.
//! - **controller**: the client's own identifier and the remote agent it
//!   delegates to.
//! - **authing**: signature headers for HTTP requests and responses.
//! - **anchoring**: registry and credential events anchored in a log.
//! - **session**: ties the pieces together for one connected client.
//! - **config**: protocol constants.
//!
//! ## Design Philosophy
//!
//! 1. A digest or signature mismatch is always an error, never a warning.
//! 2. State advances only through a fully validated event; a rejected event
//!    leaves the prior state untouched.
//! 3. Private keys never leave a keeper unencrypted.
//! 4. Every operation is synchronous and single-threaded. Callers serialize
//!    rotations of the same identifier.

pub mod anchoring;
pub mod authing;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod error;
pub mod eventing;
pub mod keeping;
pub mod said;
pub mod session;
pub mod tholder;

pub use error::{AuthError, ChainError, Result, SignifyError, ValidationError};
