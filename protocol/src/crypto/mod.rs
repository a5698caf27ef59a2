//! # Cryptographic Primitives
//!
//! Everything security-related bottoms out here: coded tokens, digests,
//! Ed25519 keys and signatures, salt stretching and secret sealing.
//!
//! We deliberately chose boring, well-audited cryptography:
//!
//! - **Ed25519** for signatures.
//! - **BLAKE3** and **SHA2-256** for digests, selected per token by code.
//! - **Argon2id** for turning passcodes and paths into seeds.
//! - **AES-256-GCM** for sealing keeper secrets at rest.
//!
//! ## A note on "rolling your own crypto"
//!
//! We don't. Everything here is a thin, type-safe wrapper around audited
//! implementations. The only thing we own is the text encoding in
//! [`codec`], and that is a format, not a primitive.

pub mod codec;
pub mod encryption;
pub mod hash;
pub mod keys;
pub mod salter;
pub mod signatures;

pub use codec::{CodecError, Indexed, IndexerCode, Matter, MatterCode};
pub use encryption::KeyCipher;
pub use hash::{blake3_hash, digest, domain_separated_hash, sha256, verify_digest};
pub use keys::{Signer, Verfer};
pub use salter::{random_passcode, Salter, Tier};
pub use signatures::{verify_indexed, Cigar, Siger};
