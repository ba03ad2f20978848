//! Handoff to the external media engine.
//!
//! Once both sides hold the same key, everything audio related (codecs,
//! jitter, NAT traversal, packet encryption) belongs to a [`MediaEngine`].
//! This module validates what the engine needs and moves the key into it.
//!
//! - [`MediaEngine`]: the engine interface, one instance serving many calls
//! - [`MediaSessionConfig`]: everything an engine needs to start one call
//! - [`handoff`]: validation plus ownership transfer of the auth key
//! - [`LoggingMediaEngine`]: engine that records sessions and logs them

mod logging;
mod session;

pub use logging::{LoggingMediaEngine, SessionRecord};
pub use session::{
    AUTH_KEY_LEN, AuthKey, HandoffOptions, HandoffRequest, MediaSessionConfig, build_session,
    handoff,
};

use serde::Serialize;
use tgcore::types::CallId;

use super::error::HandoffError;

/// Connection state reported back by a media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaState {
    WaitInit,
    WaitInitAck,
    Established,
    Reconnecting,
    Failed,
}

/// A media engine. Calls are keyed by id; methods never block on the network.
pub trait MediaEngine: Send + Sync {
    /// Take ownership of the session (and its key) and start connecting.
    fn configure_and_start(&self, session: MediaSessionConfig) -> Result<(), HandoffError>;

    fn stop(&self, call_id: CallId);

    /// Relay the engine ended up using, reported with the discard.
    fn preferred_relay_id(&self, call_id: CallId) -> Option<i64>;

    /// The engine judged call quality poor enough to ask for a rating.
    fn need_rate(&self, call_id: CallId) -> bool;

    fn debug_log(&self, call_id: CallId) -> Option<String>;
}
