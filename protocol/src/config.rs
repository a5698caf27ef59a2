//! # Protocol Configuration & Constants
//!
//! Every magic string the engine depends on lives here. Most of these are
//! fixed by the wire protocol: change one and every remote agent, witness
//! and verifier on the other side stops agreeing with us about what a
//! digest or a signature covers.

// ---------------------------------------------------------------------------
// Version strings
// ---------------------------------------------------------------------------

/// Protocol identifier for key event messages.
pub const KERI_PROTOCOL: &str = "KERI";

/// Protocol identifier for authentic chained data containers (credentials).
pub const ACDC_PROTOCOL: &str = "ACDC";

/// Major/minor protocol version, rendered as one hex digit each.
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

/// The only serialization kind we produce and accept.
pub const SERIALIZATION_KIND: &str = "JSON";

/// Total length of a version string: `KERI10JSON000000_`.
pub const VERSION_STRING_LENGTH: usize = 17;

/// Number of hex digits reserved for the serialized size.
pub const VERSION_SIZE_DIGITS: usize = 6;

/// Terminator character closing every version string.
pub const VERSION_TERMINATOR: char = '_';

/// Character used to fill digest fields while the digest is being computed.
pub const DIGEST_PLACEHOLDER: char = '#';

// ---------------------------------------------------------------------------
// Key derivation
// ---------------------------------------------------------------------------

/// Passcode ("bran") length in characters. Shorter passcodes are rejected;
/// longer ones are truncated, because only 21 base64 characters fit into a
/// 128-bit salt token.
pub const PASSCODE_LENGTH: usize = 21;

/// Derivation stem for the client's own controller keys.
pub const CONTROLLER_STEM: &str = "signify:controller";

/// Default derivation stem for managed identifier keys.
pub const AID_STEM: &str = "signify:aid";

/// Raw salt length (128 bits).
pub const SALT_LENGTH: usize = 16;

/// Ed25519 seed length in bytes.
pub const SEED_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Argon2id work factors `(passes, memory in KiB)` per tier. These mirror
/// libsodium's interactive/moderate/sensitive presets so that the same
/// passcode yields the same keys in every client implementation.
pub const ARGON2_LOW: (u32, u32) = (2, 64 * 1024);
pub const ARGON2_MED: (u32, u32) = (3, 256 * 1024);
pub const ARGON2_HIGH: (u32, u32) = (4, 1024 * 1024);

/// Minimal work factor. Only for tests; never for real passcodes.
pub const ARGON2_TEMP: (u32, u32) = (1, 8);

/// BLAKE3 `derive_key` context for the keeper-secret encryption key.
pub const KEEPER_ENCRYPTION_CONTEXT: &str = "signify-protocol 2024 keeper secret encryption";

/// AES-256-GCM nonce length in bytes.
pub const AES_NONCE_LENGTH: usize = 12;

// ---------------------------------------------------------------------------
// Configuration traits carried in inception events
// ---------------------------------------------------------------------------

/// Establishment-only: the identifier may not emit interaction events.
pub const TRAIT_ESTABLISHMENT_ONLY: &str = "EO";

/// Do-not-delegate: the identifier may not act as a delegator.
pub const TRAIT_DO_NOT_DELEGATE: &str = "DND";

/// No-backers: registry configuration trait for backerless credential registries.
pub const TRAIT_NO_BACKERS: &str = "NB";

// ---------------------------------------------------------------------------
// Request authentication
// ---------------------------------------------------------------------------

pub const HEADER_RESOURCE: &str = "signify-resource";
pub const HEADER_TIMESTAMP: &str = "signify-timestamp";
pub const HEADER_SIGNATURE_INPUT: &str = "signature-input";
pub const HEADER_SIGNATURE: &str = "signature";

/// Label of our entry inside the `Signature-Input`/`Signature` dictionaries.
pub const SIGNATURE_LABEL: &str = "signify";

/// Algorithm tag advertised in the signature parameters.
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

/// Fields covered by a request signature, in signing order.
pub const DEFAULT_COVERED_FIELDS: [&str; 4] =
    ["@method", "@path", HEADER_RESOURCE, HEADER_TIMESTAMP];

/// Timestamp format for `Signify-Timestamp` (microseconds, explicit UTC offset).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f+00:00";

/// `pidx` announced in the boot request: index 0 is the controller itself.
pub const BOOT_PIDX: u64 = 1;
