//! Call state machine implementation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tgcore::dh::KeyExchangeState;
use tgcore::server_config::ServerConfig;
use tgcore::types::{CallId, CallProtocol, CallRole, Endpoint, UserId};

use super::error::FailureReason;

/// Why a call ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    LocalHangup,
    PeerHangup,
    PeerDisconnect,
    Missed,
    /// Another device of ours answered first.
    AcceptedElsewhere,
    Declined,
}

/// Current state of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub enum CallState {
    #[default]
    Idle,
    /// Outgoing call: request being sent.
    Requesting { started_at: DateTime<Utc> },
    /// Outgoing call: relay has the request, waiting for the peer.
    WaitingAccept { requested_at: DateTime<Utc> },
    /// Incoming call: ringing locally.
    WaitingIncoming { received_at: DateTime<Utc> },
    ExchangingKeys { started_at: DateTime<Utc> },
    /// Keys agreed and media handed off.
    Established { connected_at: DateTime<Utc> },
    Ended {
        reason: EndReason,
        ended_at: DateTime<Utc>,
        duration_secs: i64,
    },
    Busy { ended_at: DateTime<Utc> },
    Failed {
        reason: FailureReason,
        failed_at: DateTime<Utc>,
    },
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Ended { .. } | Self::Busy { .. } | Self::Failed { .. }
        )
    }

    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established { .. })
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::WaitingAccept { .. } | Self::WaitingIncoming { .. })
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::WaitingIncoming { .. })
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting { .. } => "requesting",
            Self::WaitingAccept { .. } => "waiting_accept",
            Self::WaitingIncoming { .. } => "waiting_incoming",
            Self::ExchangingKeys { .. } => "exchanging_keys",
            Self::Established { .. } => "established",
            Self::Ended { .. } => "ended",
            Self::Busy { .. } => "busy",
            Self::Failed { .. } => "failed",
        }
    }
}

/// State transitions for calls.
#[derive(Debug, Clone)]
pub enum CallTransition {
    RequestSent,
    RequestAcknowledged,
    RequestReceived,
    PeerAccepted,
    LocalAccepted,
    KeysConfirmed,
    Ended { reason: EndReason },
    PeerBusy,
    Failed { reason: FailureReason },
}

/// What the embedding application may want to do after a call ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscardSummary {
    /// Seconds since the call was established, zero if it never was.
    pub duration_secs: i64,
    pub preferred_relay_id: Option<i64>,
    /// The relay asked for the media engine's debug log.
    pub need_debug: bool,
    /// A rating prompt should be shown.
    pub need_rating: bool,
}

/// Full call session information.
#[derive(Debug, Serialize)]
pub struct CallInfo {
    pub call_id: CallId,
    pub access_hash: i64,
    pub peer: UserId,
    pub role: CallRole,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub established_at: Option<DateTime<Utc>>,
    /// Layers we advertise.
    pub protocol: CallProtocol,
    pub peer_protocol: Option<CallProtocol>,
    pub endpoints: Vec<Endpoint>,
    pub p2p_allowed: bool,
    pub visualization: Option<[usize; 4]>,
    pub need_debug: bool,
    pub media_started: bool,
    pub summary: Option<DiscardSummary>,
    #[serde(skip)]
    pub key_exchange: Option<KeyExchangeState>,
    /// Commitment from an incoming request, held until we accept.
    #[serde(skip)]
    pub peer_commitment: Option<Vec<u8>>,
    #[serde(skip)]
    pub server_config: Option<Arc<ServerConfig>>,
}

impl CallInfo {
    pub fn new_outgoing(peer: UserId, protocol: CallProtocol) -> Self {
        Self::new(CallId(0), 0, peer, CallRole::Initiator, protocol)
    }

    pub fn new_incoming(
        call_id: CallId,
        access_hash: i64,
        caller: UserId,
        commitment: Vec<u8>,
        protocol: CallProtocol,
    ) -> Self {
        let mut info = Self::new(call_id, access_hash, caller, CallRole::Responder, protocol);
        info.peer_commitment = Some(commitment);
        info
    }

    fn new(
        call_id: CallId,
        access_hash: i64,
        peer: UserId,
        role: CallRole,
        protocol: CallProtocol,
    ) -> Self {
        Self {
            call_id,
            access_hash,
            peer,
            role,
            state: CallState::Idle,
            created_at: Utc::now(),
            established_at: None,
            protocol,
            peer_protocol: None,
            endpoints: Vec::new(),
            p2p_allowed: false,
            visualization: None,
            need_debug: false,
            media_started: false,
            summary: None,
            key_exchange: None,
            peer_commitment: None,
            server_config: None,
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.role == CallRole::Initiator
    }

    /// Take the relay's latest access token. Zero means "unchanged".
    pub fn refresh_access_hash(&mut self, access_hash: i64) {
        if access_hash != 0 {
            self.access_hash = access_hash;
        }
    }

    pub fn handle(&self) -> tgcore::types::CallHandle {
        tgcore::types::CallHandle {
            id: self.call_id,
            access_hash: self.access_hash,
        }
    }

    /// Seconds spent established so far, or zero.
    pub fn elapsed_secs(&self) -> i64 {
        self.established_at
            .map(|at| Utc::now().signed_duration_since(at).num_seconds().max(0))
            .unwrap_or(0)
    }

    /// Apply a state transition. Returns error if transition is invalid.
    ///
    /// Reaching a terminal state wipes all key material.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let now = Utc::now();
        let initiator = self.is_initiator();
        let elapsed = self.elapsed_secs();
        let new_state = match (&self.state, transition) {
            (current, transition) if current.is_terminal() => {
                return Err(InvalidTransition::new(current, &transition));
            }
            (CallState::Idle, CallTransition::RequestSent) if initiator => {
                CallState::Requesting { started_at: now }
            }
            (CallState::Requesting { .. }, CallTransition::RequestAcknowledged) => {
                CallState::WaitingAccept { requested_at: now }
            }
            (CallState::Idle, CallTransition::RequestReceived) if !initiator => {
                CallState::WaitingIncoming { received_at: now }
            }
            (CallState::WaitingAccept { .. }, CallTransition::PeerAccepted) => {
                CallState::ExchangingKeys { started_at: now }
            }
            (CallState::WaitingIncoming { .. }, CallTransition::LocalAccepted) => {
                CallState::ExchangingKeys { started_at: now }
            }
            (CallState::ExchangingKeys { .. }, CallTransition::KeysConfirmed) => {
                CallState::Established { connected_at: now }
            }
            (_, CallTransition::Ended { reason }) => CallState::Ended {
                reason,
                ended_at: now,
                duration_secs: elapsed,
            },
            (_, CallTransition::PeerBusy) => CallState::Busy { ended_at: now },
            (_, CallTransition::Failed { reason }) => CallState::Failed {
                reason,
                failed_at: now,
            },
            (current, transition) => {
                return Err(InvalidTransition::new(current, &transition));
            }
        };
        if new_state.is_established() {
            self.established_at = Some(now);
        }
        self.state = new_state;
        if self.state.is_terminal() {
            self.wipe_secrets();
        }
        Ok(())
    }

    pub fn wipe_secrets(&mut self) {
        if let Some(kx) = self.key_exchange.as_mut() {
            kx.wipe();
        }
        self.peer_commitment = None;
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            call_id: self.call_id,
            access_hash: self.access_hash,
            peer: self.peer,
            role: self.role,
            state: self.state.clone(),
            created_at: self.created_at,
            established_at: self.established_at,
            visualization: self.visualization,
            key_fingerprint: self.key_exchange.as_ref().and_then(|kx| kx.key_fingerprint()),
            summary: self.summary.clone(),
        }
    }
}

/// Read-only copy of a call, free of any key material.
#[derive(Debug, Clone, Serialize)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub access_hash: i64,
    pub peer: UserId,
    pub role: CallRole,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
    pub established_at: Option<DateTime<Utc>>,
    pub visualization: Option<[usize; 4]>,
    pub key_fingerprint: Option<i64>,
    pub summary: Option<DiscardSummary>,
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl InvalidTransition {
    fn new(current: &CallState, attempted: &CallTransition) -> Self {
        Self {
            current_state: current.name().to_string(),
            attempted: format!("{:?}", attempted),
        }
    }
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
