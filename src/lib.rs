//! Encrypted one-to-one voice call setup.
//!
//! Two clients agree on a 256-byte key through a committed Diffie-Hellman
//! exchange relayed by a signaling server, confirm it by fingerprint and an
//! emoji visualization, then hand it to a media engine.
//!
//! The protocol core (DH, fingerprints, visualization, wire records) lives in
//! [`tgcore`]; this crate adds the async call layer on top.

pub use tgcore;

pub mod calls;
pub mod config;

pub use calls::{
    CallError, CallEvent, CallManager, CallSnapshot, CallState, LoopbackRelay, MediaEngine,
    SignalingTransport,
};
pub use config::CallManagerConfig;
