//! Call-related error types.

use serde::Serialize;
use tgcore::dh::DhError;
use tgcore::types::CallId;
use thiserror::Error;

/// Answers from the relay that mean someone else already settled the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceKind {
    AlreadyAccepted,
    AlreadyDeclined,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("call race: {0:?}")]
    Race(RaceKind),

    #[error("transport failure: {0}")]
    Failure(String),

    #[error("transport timed out")]
    Timeout,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandoffError {
    #[error("auth key must be 256 bytes, got {0}")]
    KeyLength(usize),

    #[error("no endpoints to connect to")]
    NoEndpoints,

    #[error("endpoint {0} has no address")]
    EndpointAddress(i64),

    #[error("endpoint {id} has a {len}-byte peer tag, expected 16")]
    PeerTag { id: i64, len: usize },

    #[error("media engine refused the session: {0}")]
    Engine(String),
}

/// Why a call ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    InvalidParameter,
    FingerprintMismatch,
    CommitmentMismatch,
    ProtocolViolation,
    TransportFailure,
    HandoffFailure,
    MissingField,
    MediaFailure,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidParameter => "invalid_parameter",
            Self::FingerprintMismatch => "fingerprint_mismatch",
            Self::CommitmentMismatch => "commitment_mismatch",
            Self::ProtocolViolation => "protocol_violation",
            Self::TransportFailure => "transport_failure",
            Self::HandoffFailure => "handoff_failure",
            Self::MissingField => "missing_field",
            Self::MediaFailure => "media_failure",
        }
    }

    /// Whether the peer should hear about the failure through a discard.
    /// Transport and handoff failures never go back to the relay.
    pub fn notifies_peer(&self) -> bool {
        !matches!(self, Self::TransportFailure | Self::HandoffFailure)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&DhError> for FailureReason {
    fn from(err: &DhError) -> Self {
        match err {
            DhError::InvalidParameter(_) | DhError::WeakDomain(_) | DhError::Codec(_) => {
                Self::InvalidParameter
            }
            DhError::CommitmentMismatch => Self::CommitmentMismatch,
            DhError::FingerprintMismatch => Self::FingerprintMismatch,
            DhError::SecretAlreadyDerived | DhError::ExponentConsumed => Self::ProtocolViolation,
        }
    }
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("call not found: {0}")]
    NotFound(CallId),

    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] super::state::InvalidTransition),

    #[error("call already exists: {0}")]
    AlreadyExists(String),

    #[error("key exchange failed: {0}")]
    Dh(#[from] DhError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("media handoff failed: {0}")]
    Handoff(#[from] HandoffError),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
}

impl CallError {
    /// The terminal reason a call records when this error aborts it.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Dh(e) => e.into(),
            Self::Transport(_) => FailureReason::TransportFailure,
            Self::Handoff(_) => FailureReason::HandoffFailure,
            Self::MissingField(_) => FailureReason::MissingField,
            Self::NotFound(_)
            | Self::InvalidTransition(_)
            | Self::AlreadyExists(_)
            | Self::InvalidRating(_) => FailureReason::ProtocolViolation,
        }
    }
}
