//! Platform-independent core of the call setup protocol.
//!
//! Everything in this crate is synchronous and free of I/O: big-integer
//! encoding, Diffie-Hellman parameter checks, the key exchange itself, the
//! key fingerprint, the emoji visualization and the wire-level call records.
//! The async call layer lives in the `tgcall` crate.

pub mod bigint;
pub mod dh;
pub mod server_config;
pub mod types;
pub mod visualization;

pub use dh::{DhConfig, DhError, FingerprintScheme, KeyExchangeState};
pub use server_config::ServerConfig;
