use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tgcore::server_config::ServerConfig;
use tgcore::types::{CallId, CallRole, DataSaving, DspFlags, Endpoint, NetType, RelayConfig};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::MediaEngine;
use crate::calls::error::HandoffError;

pub const AUTH_KEY_LEN: usize = 256;

const PEER_TAG_LEN: usize = 16;

/// The call's symmetric key. Owned by exactly one holder at a time.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct AuthKey([u8; AUTH_KEY_LEN]);

impl AuthKey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, HandoffError> {
        if bytes.len() != AUTH_KEY_LEN {
            return Err(HandoffError::KeyLength(bytes.len()));
        }
        let mut key = [0u8; AUTH_KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; AUTH_KEY_LEN] {
        &self.0
    }

    /// Last 16 bytes of SHA-256 over the key.
    pub fn call_id_hash(&self) -> [u8; 16] {
        let digest = Sha256::digest(self.0);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[16..32]);
        out
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthKey(..)")
    }
}

/// Local media preferences applied to every session.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandoffOptions {
    pub data_saving: DataSaving,
    pub dsp: DspFlags,
    pub network_type: NetType,
}

/// Everything about the call except the key.
#[derive(Debug, Clone)]
pub struct HandoffRequest<'a> {
    pub call_id: CallId,
    pub role: CallRole,
    pub key_fingerprint: i64,
    pub endpoints: &'a [Endpoint],
    pub allow_p2p: bool,
    /// Highest layer both sides understand.
    pub max_layer: i32,
    pub relay: &'a RelayConfig,
    pub server_config: Arc<ServerConfig>,
    pub options: HandoffOptions,
}

/// Configuration for one media session.
pub struct MediaSessionConfig {
    pub call_id: CallId,
    pub auth_key: AuthKey,
    pub auth_key_id: i64,
    pub call_id_hash: [u8; 16],
    pub is_outgoing: bool,
    pub endpoints: Vec<Endpoint>,
    pub allow_p2p: bool,
    pub max_layer: i32,
    pub recv_timeout: Duration,
    pub init_timeout: Duration,
    pub data_saving: DataSaving,
    pub dsp: DspFlags,
    pub network_type: NetType,
    pub server_config: Arc<ServerConfig>,
}

impl std::fmt::Debug for MediaSessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSessionConfig")
            .field("call_id", &self.call_id)
            .field("auth_key_id", &self.auth_key_id)
            .field("call_id_hash", &hex::encode(self.call_id_hash))
            .field("is_outgoing", &self.is_outgoing)
            .field("endpoints", &self.endpoints.len())
            .field("allow_p2p", &self.allow_p2p)
            .field("max_layer", &self.max_layer)
            .field("recv_timeout", &self.recv_timeout)
            .field("init_timeout", &self.init_timeout)
            .finish()
    }
}

fn check_endpoints(endpoints: &[Endpoint]) -> Result<(), HandoffError> {
    if endpoints.is_empty() {
        return Err(HandoffError::NoEndpoints);
    }
    for endpoint in endpoints {
        if !endpoint.has_address() {
            return Err(HandoffError::EndpointAddress(endpoint.id));
        }
        let len = endpoint.peer_tag.len();
        if len != 0 && len != PEER_TAG_LEN {
            return Err(HandoffError::PeerTag {
                id: endpoint.id,
                len,
            });
        }
    }
    Ok(())
}

/// Validate the handoff inputs and build the session config.
///
/// `secret` is consumed; on error it is wiped here along with everything
/// else.
pub fn build_session(
    secret: Zeroizing<Vec<u8>>,
    request: HandoffRequest<'_>,
) -> Result<MediaSessionConfig, HandoffError> {
    let auth_key = AuthKey::from_slice(&secret)?;
    drop(secret);
    check_endpoints(request.endpoints)?;

    Ok(MediaSessionConfig {
        call_id: request.call_id,
        call_id_hash: auth_key.call_id_hash(),
        auth_key,
        auth_key_id: request.key_fingerprint,
        is_outgoing: request.role.is_outgoing(),
        endpoints: request.endpoints.to_vec(),
        allow_p2p: request.allow_p2p,
        max_layer: request.max_layer,
        recv_timeout: request.relay.packet_timeout,
        init_timeout: request.relay.connect_timeout,
        data_saving: request.options.data_saving,
        dsp: request.options.dsp,
        network_type: request.options.network_type,
        server_config: request.server_config,
    })
}

/// Hand the key and endpoints to `engine`. Nothing is retained here.
pub fn handoff(
    engine: &dyn MediaEngine,
    secret: Zeroizing<Vec<u8>>,
    request: HandoffRequest<'_>,
) -> Result<(), HandoffError> {
    let session = build_session(secret, request)?;
    engine.configure_and_start(session)
}
