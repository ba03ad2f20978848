use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type UserId = i64;

/// Relay-assigned identifier of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub i64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the relay needs to address a call: its id plus the opaque access
/// token that comes back with every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallHandle {
    pub id: CallId,
    pub access_hash: i64,
}

impl CallHandle {
    pub fn new(id: i64, access_hash: i64) -> Self {
        Self {
            id: CallId(id),
            access_hash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallRole {
    Initiator,
    Responder,
}

impl CallRole {
    pub fn is_outgoing(self) -> bool {
        self == CallRole::Initiator
    }
}

/// Protocol layers and transports a client supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallProtocol {
    pub min_layer: i32,
    pub max_layer: i32,
    pub udp_p2p: bool,
    pub udp_reflector: bool,
}

impl CallProtocol {
    pub const MIN_LAYER: i32 = 65;
    pub const MAX_LAYER: i32 = 92;
}

impl Default for CallProtocol {
    fn default() -> Self {
        Self {
            min_layer: Self::MIN_LAYER,
            max_layer: Self::MAX_LAYER,
            udp_p2p: true,
            udp_reflector: true,
        }
    }
}

/// A relay or peer address offered for the media session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: i64,
    pub ipv4: String,
    pub ipv6: String,
    pub port: u16,
    /// Empty, or exactly 16 bytes.
    #[serde(with = "hex_bytes")]
    pub peer_tag: Vec<u8>,
}

impl Endpoint {
    pub fn has_address(&self) -> bool {
        !self.ipv4.is_empty() || !self.ipv6.is_empty()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscardReason {
    Missed,
    Disconnect,
    Hangup,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataSaving {
    #[default]
    Never,
    Mobile,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NetType {
    #[default]
    Unknown,
    Gprs,
    Edge,
    Net3g,
    Hspa,
    Lte,
    Wifi,
    Ethernet,
    OtherHighSpeed,
    OtherLowSpeed,
    Dialup,
    OtherMobile,
}

/// Echo cancellation, noise suppression and gain control switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DspFlags {
    pub aec: bool,
    pub ns: bool,
    pub agc: bool,
}

impl Default for DspFlags {
    fn default() -> Self {
        Self {
            aec: true,
            ns: true,
            agc: true,
        }
    }
}

/// Relay-side timing and tuning needed to start media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub packet_timeout: Duration,
    pub connect_timeout: Duration,
    /// Raw JSON tuning blob, parsed into a `ServerConfig`.
    pub server_config_json: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            packet_timeout: Duration::from_millis(10_000),
            connect_timeout: Duration::from_millis(30_000),
            server_config_json: String::from("{}"),
        }
    }
}

/// A call record as the relay reports it, either in a response or in an
/// update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneCall {
    /// Request delivered; the callee has not answered yet.
    Waiting {
        handle: CallHandle,
        participant: UserId,
        protocol: CallProtocol,
    },
    /// Incoming request carrying the caller's commitment.
    Requested {
        handle: CallHandle,
        caller: UserId,
        g_a_hash: Vec<u8>,
        protocol: CallProtocol,
    },
    /// The callee answered with its public value.
    Accepted {
        handle: CallHandle,
        g_b: Vec<u8>,
        protocol: CallProtocol,
    },
    /// The caller revealed `g_a` and the fingerprint; endpoints are known.
    Confirmed {
        handle: CallHandle,
        g_a_or_b: Vec<u8>,
        key_fingerprint: i64,
        connections: Vec<Endpoint>,
        p2p_allowed: bool,
        protocol: CallProtocol,
    },
    Discarded {
        handle: CallHandle,
        reason: Option<DiscardReason>,
        need_debug: bool,
        need_rating: bool,
    },
}

impl PhoneCall {
    pub fn handle(&self) -> CallHandle {
        match self {
            PhoneCall::Waiting { handle, .. }
            | PhoneCall::Requested { handle, .. }
            | PhoneCall::Accepted { handle, .. }
            | PhoneCall::Confirmed { handle, .. }
            | PhoneCall::Discarded { handle, .. } => *handle,
        }
    }

    pub fn id(&self) -> CallId {
        self.handle().id
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PhoneCall::Waiting { .. } => "waiting",
            PhoneCall::Requested { .. } => "requested",
            PhoneCall::Accepted { .. } => "accepted",
            PhoneCall::Confirmed { .. } => "confirmed",
            PhoneCall::Discarded { .. } => "discarded",
        }
    }
}
