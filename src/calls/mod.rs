//! Call setup: key agreement, state machine and media handoff.
//!
//! # Architecture
//!
//! - [`CallState`] & [`CallInfo`]: Call state machine for tracking call lifecycle
//! - [`SignalingTransport`]: Request/response interface to the signaling relay
//! - [`CallManager`]: Orchestrates call lifecycle, key exchange and handoff
//! - [`CallEventBus`]: Lifecycle notifications for the embedding application
//! - [`media`]: Validation and ownership transfer of the key to a [`MediaEngine`]
//! - [`LoopbackRelay`]: In-process relay connecting managers to each other
//!
//! # Protocol Overview
//!
//! The caller commits to `g_a` by sending only its hash with the request. The
//! callee answers with `g_b`. The caller derives the key, then reveals `g_a`
//! together with the key fingerprint. The callee checks `g_a` against the
//! commitment, derives the same key and compares fingerprints. Both sides then
//! show four emojis computed from the key, and hand it to the media engine.

mod error;
pub mod events;
pub mod loopback;
mod manager;
pub mod media;
mod state;
pub mod transport;

pub use error::{CallError, FailureReason, HandoffError, RaceKind, TransportError};
pub use events::{CallEvent, CallEventBus};
pub use loopback::{LoopbackRelay, LoopbackTransport};
pub use manager::CallManager;
pub use media::{MediaEngine, MediaState};
pub use state::{
    CallInfo, CallSnapshot, CallState, CallTransition, DiscardSummary, EndReason,
    InvalidTransition,
};
pub use transport::SignalingTransport;
