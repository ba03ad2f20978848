//! In-process relay that connects call managers to each other.
//!
//! It enforces the same ordering rules as the real relay: a call can be
//! accepted once, confirmed once after that, and discarded at any time.
//! Answers that lose a race come back as [`TransportError::Race`].

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use rand::RngCore;
use tgcore::dh::DhConfig;
use tgcore::types::{
    CallHandle, CallId, CallProtocol, DiscardReason, Endpoint, PhoneCall, RelayConfig, UserId,
};
use tokio::sync::broadcast;

use super::error::{RaceKind, TransportError};
use super::transport::SignalingTransport;

const UPDATE_CAPACITY: usize = 64;
const FIRST_CALL_ID: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Requested,
    Accepted,
    Confirmed,
    Discarded(DiscardReason),
}

#[derive(Debug)]
struct RelayCall {
    caller: UserId,
    callee: UserId,
    access_hash: i64,
    stage: Stage,
    g_b: Vec<u8>,
    protocol: CallProtocol,
}

impl RelayCall {
    fn other(&self, user: UserId) -> UserId {
        if user == self.caller {
            self.callee
        } else {
            self.caller
        }
    }

    fn is_live(&self) -> bool {
        !matches!(self.stage, Stage::Discarded(_))
    }
}

/// Shared relay state. Each client talks to it through its own
/// [`LoopbackTransport`].
///
/// Meant for tests and demos. Discarded calls are kept so late answers still
/// lose their race; [`LoopbackRelay::prune_discarded`] forgets them.
#[derive(Debug)]
pub struct LoopbackRelay {
    users: DashMap<UserId, broadcast::Sender<PhoneCall>>,
    calls: DashMap<CallId, RelayCall>,
    next_id: AtomicI64,
    server_config_json: String,
    debug_logs: DashMap<CallId, Vec<String>>,
    ratings: DashMap<CallId, (u8, String)>,
}

impl LoopbackRelay {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            calls: DashMap::new(),
            next_id: AtomicI64::new(FIRST_CALL_ID),
            server_config_json: "{}".to_string(),
            debug_logs: DashMap::new(),
            ratings: DashMap::new(),
        }
    }

    /// Raw server config handed out with every relay config.
    pub fn with_server_config(mut self, json: impl Into<String>) -> Self {
        self.server_config_json = json.into();
        self
    }

    pub fn connect(self: &Arc<Self>, user: UserId) -> LoopbackTransport {
        self.sender(user);
        LoopbackTransport {
            relay: Arc::clone(self),
            user,
        }
    }

    /// Deliver an arbitrary update to `user`, bypassing every check.
    /// Returns whether anyone was listening.
    pub fn inject(&self, user: UserId, update: PhoneCall) -> bool {
        self.sender(user).send(update).is_ok()
    }

    pub fn debug_logs(&self, call_id: CallId) -> Vec<String> {
        self.debug_logs
            .get(&call_id)
            .map(|logs| logs.clone())
            .unwrap_or_default()
    }

    pub fn rating(&self, call_id: CallId) -> Option<(u8, String)> {
        self.ratings.get(&call_id).map(|r| r.value().clone())
    }

    /// Whether the relay still considers the call live.
    pub fn is_live(&self, call_id: CallId) -> bool {
        self.calls.get(&call_id).is_some_and(|call| call.is_live())
    }

    /// Forget discarded calls along with their debug logs and ratings.
    /// Returns how many calls were removed.
    pub fn prune_discarded(&self) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, call| call.is_live());
        self.debug_logs.retain(|id, _| self.calls.contains_key(id));
        self.ratings.retain(|id, _| self.calls.contains_key(id));
        before - self.calls.len()
    }

    fn sender(&self, user: UserId) -> broadcast::Sender<PhoneCall> {
        self.users
            .entry(user)
            .or_insert_with(|| broadcast::channel(UPDATE_CAPACITY).0)
            .clone()
    }

    fn notify(&self, user: UserId, update: PhoneCall) {
        if self.sender(user).send(update).is_err() {
            debug!("User {} is not listening for call updates", user);
        }
    }

    fn is_busy(&self, user: UserId) -> bool {
        self.calls
            .iter()
            .any(|call| call.is_live() && (call.caller == user || call.callee == user))
    }

    fn endpoints() -> Vec<Endpoint> {
        let mut rng = rand::rng();
        (0..2)
            .map(|i| {
                let mut peer_tag = vec![0u8; 16];
                rng.fill_bytes(&mut peer_tag);
                Endpoint {
                    id: 50 + i,
                    ipv4: "127.0.0.1".to_string(),
                    ipv6: "::1".to_string(),
                    port: 1400 + i as u16,
                    peer_tag,
                }
            })
            .collect()
    }
}

impl Default for LoopbackRelay {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's connection to a [`LoopbackRelay`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    relay: Arc<LoopbackRelay>,
    user: UserId,
}

impl LoopbackTransport {
    pub fn user(&self) -> UserId {
        self.user
    }

    fn unknown(handle: CallHandle) -> TransportError {
        TransportError::Failure(format!("unknown call {}", handle.id))
    }

    /// Look up a call this user takes part in, with a matching access hash.
    fn check(&self, call: &RelayCall, handle: CallHandle) -> Result<(), TransportError> {
        if call.caller != self.user && call.callee != self.user {
            return Err(Self::unknown(handle));
        }
        if call.access_hash != handle.access_hash {
            return Err(TransportError::Failure("access hash invalid".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn get_dh_config(&self) -> Result<DhConfig, TransportError> {
        let mut salt = vec![0u8; 256];
        rand::rng().fill_bytes(&mut salt);
        Ok(DhConfig::relay_default().with_random(salt))
    }

    async fn request_call(
        &self,
        peer: UserId,
        g_a_hash: [u8; 32],
        protocol: CallProtocol,
    ) -> Result<PhoneCall, TransportError> {
        let id = CallId(self.relay.next_id.fetch_add(1, Ordering::Relaxed));
        let access_hash = rand::random::<i64>() | 1;
        let handle = CallHandle { id, access_hash };

        if self.relay.is_busy(peer) {
            info!("User {} is busy, rejecting call {}", peer, id);
            return Ok(PhoneCall::Discarded {
                handle,
                reason: Some(DiscardReason::Busy),
                need_debug: false,
                need_rating: false,
            });
        }

        self.relay.calls.insert(
            id,
            RelayCall {
                caller: self.user,
                callee: peer,
                access_hash,
                stage: Stage::Requested,
                g_b: Vec::new(),
                protocol,
            },
        );
        debug!("Relay: call {} from {} to {}", id, self.user, peer);
        self.relay.notify(
            peer,
            PhoneCall::Requested {
                handle,
                caller: self.user,
                g_a_hash: g_a_hash.to_vec(),
                protocol,
            },
        );
        Ok(PhoneCall::Waiting {
            handle,
            participant: peer,
            protocol,
        })
    }

    async fn accept_call(
        &self,
        handle: CallHandle,
        g_b: Vec<u8>,
        protocol: CallProtocol,
    ) -> Result<PhoneCall, TransportError> {
        let caller = {
            let mut call = self
                .relay
                .calls
                .get_mut(&handle.id)
                .ok_or_else(|| Self::unknown(handle))?;
            self.check(&call, handle)?;
            match call.stage {
                Stage::Accepted | Stage::Confirmed => {
                    return Err(TransportError::Race(RaceKind::AlreadyAccepted));
                }
                Stage::Discarded(reason) => {
                    return Ok(PhoneCall::Discarded {
                        handle,
                        reason: Some(reason),
                        need_debug: false,
                        need_rating: false,
                    });
                }
                Stage::Requested => {}
            }
            call.stage = Stage::Accepted;
            call.g_b = g_b.clone();
            call.caller
        };

        self.relay.notify(
            caller,
            PhoneCall::Accepted {
                handle,
                g_b,
                protocol,
            },
        );
        Ok(PhoneCall::Waiting {
            handle,
            participant: caller,
            protocol,
        })
    }

    async fn confirm_call(
        &self,
        handle: CallHandle,
        g_a: Vec<u8>,
        key_fingerprint: i64,
        protocol: CallProtocol,
    ) -> Result<PhoneCall, TransportError> {
        let (callee, g_b, callee_protocol) = {
            let mut call = self
                .relay
                .calls
                .get_mut(&handle.id)
                .ok_or_else(|| Self::unknown(handle))?;
            self.check(&call, handle)?;
            match call.stage {
                Stage::Discarded(_) => {
                    return Err(TransportError::Race(RaceKind::AlreadyDeclined));
                }
                Stage::Requested | Stage::Confirmed => {
                    return Err(TransportError::Failure(format!(
                        "call {} cannot be confirmed now",
                        handle.id
                    )));
                }
                Stage::Accepted => {}
            }
            call.stage = Stage::Confirmed;
            (call.callee, std::mem::take(&mut call.g_b), call.protocol)
        };

        let connections = LoopbackRelay::endpoints();
        self.relay.notify(
            callee,
            PhoneCall::Confirmed {
                handle,
                g_a_or_b: g_a,
                key_fingerprint,
                connections: connections.clone(),
                p2p_allowed: true,
                protocol,
            },
        );
        Ok(PhoneCall::Confirmed {
            handle,
            g_a_or_b: g_b,
            key_fingerprint,
            connections,
            p2p_allowed: true,
            protocol: callee_protocol,
        })
    }

    async fn discard_call(
        &self,
        handle: CallHandle,
        reason: DiscardReason,
        duration_secs: i64,
        connection_id: i64,
    ) -> Result<(), TransportError> {
        let other = {
            let mut call = self
                .relay
                .calls
                .get_mut(&handle.id)
                .ok_or_else(|| Self::unknown(handle))?;
            self.check(&call, handle)?;
            if !call.is_live() {
                return Ok(());
            }
            call.stage = Stage::Discarded(reason);
            call.other(self.user)
        };

        info!(
            "Relay: call {} discarded by {} ({:?}, {}s, relay {})",
            handle.id, self.user, reason, duration_secs, connection_id
        );
        self.relay.notify(
            other,
            PhoneCall::Discarded {
                handle,
                reason: Some(reason),
                need_debug: false,
                need_rating: duration_secs > 0,
            },
        );
        Ok(())
    }

    async fn save_call_debug(
        &self,
        handle: CallHandle,
        debug: String,
    ) -> Result<(), TransportError> {
        self.relay
            .debug_logs
            .entry(handle.id)
            .or_default()
            .push(debug);
        Ok(())
    }

    async fn set_call_rating(
        &self,
        handle: CallHandle,
        rating: u8,
        comment: String,
    ) -> Result<(), TransportError> {
        self.relay.ratings.insert(handle.id, (rating, comment));
        Ok(())
    }

    async fn fetch_relay_config(&self) -> Result<RelayConfig, TransportError> {
        Ok(RelayConfig {
            server_config_json: self.relay.server_config_json.clone(),
            ..RelayConfig::default()
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<PhoneCall> {
        self.relay.sender(self.user).subscribe()
    }
}
