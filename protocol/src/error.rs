//! Error taxonomy for the engine.
//!
//! Every public operation returns [`SignifyError`]. Its four variants are the
//! four ways an operation can fail, and each carries a concern-specific enum
//! with the details. Nothing is retried internally and nothing degrades
//! silently: a digest or signature mismatch always fails the operation it
//! happened in.

use thiserror::Error;

use crate::crypto::codec::CodecError;
use crate::crypto::encryption::EncryptionError;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, SignifyError>;

/// Top-level error returned by every public operation.
#[derive(Debug, Error)]
pub enum SignifyError {
    /// Input rejected before any state was touched.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// An event does not extend the chain it was applied to.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// An HTTP exchange could not be authenticated.
    #[error("authentication error: {0}")]
    Authentication(#[from] AuthError),

    /// The operation is well-formed but not permitted in the current
    /// configuration (e.g. interaction on an establishment-only identifier).
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Malformed or inconsistent input.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed threshold: {0}")]
    MalformedThreshold(String),

    #[error("invalid {what} length: expected {expected}, got {got}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid passcode: {0}")]
    InvalidPasscode(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("missing field `{0}`")]
    MissingField(String),

    #[error("invalid version string: {0}")]
    InvalidVersion(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("invalid witness configuration: {0}")]
    InvalidWitnesses(String),

    #[error("invalid key configuration: {0}")]
    InvalidKeys(String),

    /// A rotation exposes a key that was never committed to, or the
    /// committed keys it does expose do not satisfy the prior next threshold.
    #[error("next key commitment not fulfilled: {0}")]
    NextKeyMismatch(String),

    #[error("identifier is non-transferable: no further establishment events are possible")]
    NonTransferable,

    #[error("rotation would reuse the current key set")]
    KeyReuse,

    #[error("invalid key state: {0}")]
    InvalidState(String),
}

/// Chain-linkage and integrity failures. The offending event is rejected;
/// the state it was applied to is left untouched.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("sequence gap: expected sn {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("prior digest mismatch: expected {expected}, got {got}")]
    PriorDigestMismatch { expected: String, got: String },

    #[error("self-addressing digest mismatch on `{label}`: stored {stored}, computed {computed}")]
    DigestMismatch {
        label: String,
        stored: String,
        computed: String,
    },

    #[error("prefix mismatch: expected {expected}, got {got}")]
    PrefixMismatch { expected: String, got: String },

    #[error("unexpected event: {0}")]
    UnexpectedEvent(String),

    #[error("empty key event log")]
    EmptyLog,

    #[error("signing threshold not satisfied: {verified} of {total} signatures verified")]
    ThresholdNotMet { verified: usize, total: usize },

    #[error("delegated inception {0} has no approving seal in the delegator's log")]
    DelegationNotApproved(String),
}

/// Failures authenticating a signed HTTP exchange.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("message from a different identity: expected {expected}, got {got}")]
    IdentityMismatch { expected: String, got: String },

    #[error("signature key id {got} is not the expected key {expected}")]
    KeyMismatch { expected: String, got: String },

    #[error("missing header `{0}`")]
    MissingHeader(&'static str),

    #[error("malformed header `{header}`: {reason}")]
    MalformedHeader {
        header: &'static str,
        reason: String,
    },

    #[error("agent is not anchored to controller {controller}: anchor is {anchor}")]
    UnanchoredAgent { controller: String, anchor: String },
}

impl From<CodecError> for SignifyError {
    fn from(err: CodecError) -> Self {
        SignifyError::Validation(ValidationError::Codec(err))
    }
}

impl From<EncryptionError> for SignifyError {
    fn from(err: EncryptionError) -> Self {
        SignifyError::Validation(ValidationError::Encryption(err))
    }
}

impl From<serde_json::Error> for SignifyError {
    fn from(err: serde_json::Error) -> Self {
        SignifyError::Validation(ValidationError::Serialization(err.to_string()))
    }
}

impl SignifyError {
    /// True for the failures a caller may want to surface as "someone is
    /// tampering with the exchange" rather than "your input is wrong".
    pub fn is_authentication(&self) -> bool {
        matches!(self, SignifyError::Authentication(_))
    }
}
