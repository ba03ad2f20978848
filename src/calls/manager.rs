//! Call manager for orchestrating call lifecycle.
//!
//! Every call lives behind its own mutex inside the call table. Local actions
//! and inbound updates both take that mutex for the whole transition,
//! including the transport round trip, so the two never interleave. The table
//! lock itself is never held across a transport call.
//!
//! An outgoing call has no id until the relay answers the request. Updates
//! for ids the table does not know are parked while a request is in flight
//! and handed to the new call once it is recorded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tgcore::dh::KeyExchangeState;
use tgcore::server_config::ServerConfig;
use tgcore::types::{CallHandle, CallId, CallProtocol, DiscardReason, PhoneCall, UserId};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;

use super::error::{CallError, FailureReason, RaceKind, TransportError};
use super::events::{CallEvent, CallEventBus};
use super::media::{HandoffOptions, HandoffRequest, MediaEngine, MediaState, handoff};
use super::state::{
    CallInfo, CallSnapshot, CallState, CallTransition, DiscardSummary, EndReason,
    InvalidTransition,
};
use super::transport::SignalingTransport;
use crate::config::CallManagerConfig;

type CallEntry = Arc<Mutex<CallInfo>>;

/// Updates held for a single request beyond this are dropped.
const MAX_PARKED_UPDATES: usize = 32;

#[derive(Default)]
struct PendingRequests {
    in_flight: usize,
    parked: Vec<PhoneCall>,
}

/// One outgoing request counted as in flight until dropped.
struct RequestSlot<'a>(&'a StdMutex<PendingRequests>);

impl<'a> RequestSlot<'a> {
    fn reserve(pending: &'a StdMutex<PendingRequests>) -> Self {
        lock_pending(pending).in_flight += 1;
        Self(pending)
    }

    /// Take the parked updates addressed to `call_id`.
    fn claim(&self, call_id: CallId) -> Vec<PhoneCall> {
        let mut pending = lock_pending(self.0);
        let (ours, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut pending.parked)
            .into_iter()
            .partition(|update| update.id() == call_id);
        pending.parked = rest;
        ours
    }
}

impl Drop for RequestSlot<'_> {
    fn drop(&mut self) {
        let mut pending = lock_pending(self.0);
        pending.in_flight = pending.in_flight.saturating_sub(1);
        if pending.in_flight == 0 && !pending.parked.is_empty() {
            debug!(
                "Dropping {} updates no outgoing call claimed",
                pending.parked.len()
            );
            pending.parked.clear();
        }
    }
}

fn lock_pending(pending: &StdMutex<PendingRequests>) -> MutexGuard<'_, PendingRequests> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Manages calls and their state transitions.
pub struct CallManager {
    user_id: UserId,
    config: CallManagerConfig,
    transport: Arc<dyn SignalingTransport>,
    media: Arc<dyn MediaEngine>,
    calls: RwLock<HashMap<CallId, CallEntry>>,
    pending: StdMutex<PendingRequests>,
    events: CallEventBus,
}

impl CallManager {
    pub fn new(
        user_id: UserId,
        config: CallManagerConfig,
        transport: Arc<dyn SignalingTransport>,
        media: Arc<dyn MediaEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            user_id,
            config,
            transport,
            media,
            calls: RwLock::new(HashMap::new()),
            pending: StdMutex::new(PendingRequests::default()),
            events: CallEventBus::new(),
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn config(&self) -> &CallManagerConfig {
        &self.config
    }

    /// Lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Start dispatching transport updates into [`Self::handle_update`].
    ///
    /// The subscription is taken before this returns, so nothing sent after
    /// the call is missed. Calling it again after the task ends resubscribes.
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let mut updates = self.transport.subscribe();
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        manager.handle_update(update).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Call update stream lagged, {} updates dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Call update stream closed for user {}", manager.user_id);
                        break;
                    }
                }
            }
        })
    }

    /// Start an outgoing call.
    pub async fn place_call(&self, peer: UserId) -> Result<CallId, CallError> {
        let mut info = CallInfo::new_outgoing(peer, self.config.protocol);
        info.apply_transition(CallTransition::RequestSent)?;

        let dh = self.transport.get_dh_config().await?;
        debug!("Calling {} with DH config version {}", peer, dh.version());
        let kx = KeyExchangeState::new_initiator(&dh, self.config.fingerprint_scheme)?;
        let commitment = kx.commitment().ok_or(CallError::MissingField("g_a_hash"))?;
        info.key_exchange = Some(kx);

        let slot = {
            let calls = self.calls.write().await;
            let live = calls.values().filter(|entry| is_live(entry)).count();
            let in_flight = lock_pending(&self.pending).in_flight;
            if live + in_flight >= self.config.max_concurrent_calls {
                return Err(CallError::AlreadyExists(
                    "max concurrent calls reached".into(),
                ));
            }
            RequestSlot::reserve(&self.pending)
        };

        let response = self
            .transport
            .request_call(peer, commitment, self.config.protocol)
            .await?;
        let handle = response.handle();
        info.call_id = handle.id;
        info.access_hash = handle.access_hash;
        info!("Placed call {} to {}", handle.id, peer);

        let entry = Arc::new(Mutex::new(info));
        let mut info = entry.lock().await;
        let mut calls = self.calls.write().await;
        calls.insert(handle.id, Arc::clone(&entry));
        let parked = slot.claim(handle.id);
        drop(slot);
        drop(calls);

        match response {
            PhoneCall::Discarded {
                reason,
                need_debug,
                need_rating,
                ..
            } => {
                info.need_debug = need_debug;
                self.finish(&mut info, discard_transition(reason), need_rating);
            }
            _ => self.set_state(&mut info, CallTransition::RequestAcknowledged)?,
        }
        for update in parked {
            debug!("Replaying parked {} update for call {}", update.kind(), handle.id);
            self.dispatch(&mut info, update).await;
        }
        Ok(handle.id)
    }

    /// Answer an incoming call.
    ///
    /// A call that was already answered or declined elsewhere ends quietly
    /// and this returns `Ok`.
    pub async fn accept(&self, call_id: CallId) -> Result<(), CallError> {
        let entry = self.entry(call_id).await?;
        let mut info = entry.lock().await;
        self.set_state(&mut info, CallTransition::LocalAccepted)?;

        if let Err(e) = self.send_accept(&mut info).await {
            warn!("Accepting call {} failed: {}", call_id, e);
            self.fail(&mut info, e.failure_reason()).await;
            return Err(e);
        }
        Ok(())
    }

    async fn send_accept(&self, info: &mut CallInfo) -> Result<(), CallError> {
        let dh = self.transport.get_dh_config().await?;
        debug!(
            "Answering call {} with DH config version {}",
            info.call_id,
            dh.version()
        );
        let commitment = info
            .peer_commitment
            .take()
            .ok_or(CallError::MissingField("g_a_hash"))?;
        let kx = KeyExchangeState::new_responder(&dh, commitment, self.config.fingerprint_scheme)?;
        let g_b = kx.own_public_wire()?;
        info.key_exchange = Some(kx);

        let response = self
            .transport
            .accept_call(info.handle(), g_b, self.config.protocol)
            .await;
        match response {
            Ok(PhoneCall::Discarded {
                handle,
                reason,
                need_debug,
                need_rating,
            }) => {
                info.refresh_access_hash(handle.access_hash);
                info.need_debug = need_debug;
                self.finish(info, discard_transition(reason), need_rating);
                Ok(())
            }
            Ok(record) => {
                info.refresh_access_hash(record.handle().access_hash);
                debug!("Call {} accepted, waiting for confirmation", info.call_id);
                Ok(())
            }
            Err(TransportError::Race(kind)) => {
                self.absorb_race(info, kind);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Process one update from the transport.
    ///
    /// Returns `false` when the update is not for a live call of ours, so the
    /// caller can pass it on. An update parked for an outgoing request still
    /// in flight counts as handled.
    pub async fn handle_update(&self, update: PhoneCall) -> bool {
        if let PhoneCall::Requested {
            handle,
            caller,
            g_a_hash,
            protocol,
        } = update
        {
            return self
                .register_incoming(handle, caller, g_a_hash, protocol)
                .await;
        }

        let call_id = update.id();
        let entry = {
            let calls = self.calls.read().await;
            match calls.get(&call_id) {
                Some(entry) => Arc::clone(entry),
                // Parking happens under the table lock so a request cannot
                // record its call in between.
                None => return self.park(update),
            }
        };
        let mut info = entry.lock().await;
        self.dispatch(&mut info, update).await
    }

    fn park(&self, update: PhoneCall) -> bool {
        let mut pending = lock_pending(&self.pending);
        if pending.in_flight == 0 {
            debug!(
                "Ignoring {} update for unknown call {}",
                update.kind(),
                update.id()
            );
            return false;
        }
        if pending.parked.len() >= MAX_PARKED_UPDATES * pending.in_flight {
            warn!(
                "Too many updates for unknown calls, dropping {} for call {}",
                update.kind(),
                update.id()
            );
            return false;
        }
        debug!(
            "Parking {} update for call {} until a pending request resolves",
            update.kind(),
            update.id()
        );
        pending.parked.push(update);
        true
    }

    async fn dispatch(&self, info: &mut CallInfo, update: PhoneCall) -> bool {
        let call_id = info.call_id;
        if info.state.is_terminal() {
            debug!(
                "Ignoring {} update for call {} in state {}",
                update.kind(),
                call_id,
                info.state.name()
            );
            return false;
        }
        info.refresh_access_hash(update.handle().access_hash);

        match update {
            PhoneCall::Accepted { g_b, protocol, .. } if info.is_initiator() => {
                self.on_accepted(info, g_b, protocol).await;
                true
            }
            PhoneCall::Confirmed { .. }
                if !info.is_initiator() && !info.state.can_accept() =>
            {
                self.on_confirmed(info, update).await;
                true
            }
            PhoneCall::Discarded {
                reason,
                need_debug,
                need_rating,
                ..
            } => {
                info!("Call {} discarded by peer ({:?})", call_id, reason);
                info.need_debug = need_debug;
                self.finish(info, discard_transition(reason), need_rating);
                true
            }
            PhoneCall::Waiting { .. } => true,
            other => {
                debug!(
                    "Ignoring {} update for call {} in state {}",
                    other.kind(),
                    call_id,
                    info.state.name()
                );
                false
            }
        }
    }

    async fn register_incoming(
        &self,
        handle: CallHandle,
        caller: UserId,
        g_a_hash: Vec<u8>,
        protocol: CallProtocol,
    ) -> bool {
        let mut calls = self.calls.write().await;
        if calls.contains_key(&handle.id) {
            debug!("Ignoring repeated request for call {}", handle.id);
            return false;
        }

        let mut info = CallInfo::new_incoming(
            handle.id,
            handle.access_hash,
            caller,
            g_a_hash,
            self.config.protocol,
        );
        info.peer_protocol = Some(protocol);
        if let Err(e) = info.apply_transition(CallTransition::RequestReceived) {
            warn!("Cannot register call {}: {}", handle.id, e);
            return false;
        }
        let state = info.state.clone();
        calls.insert(handle.id, Arc::new(Mutex::new(info)));
        drop(calls);

        info!("Incoming call {} from {}", handle.id, caller);
        self.events.emit(CallEvent::IncomingCall {
            call_id: handle.id,
            caller,
        });
        self.events.emit(CallEvent::StateChanged {
            call_id: handle.id,
            state,
        });
        true
    }

    async fn on_accepted(&self, info: &mut CallInfo, g_b: Vec<u8>, protocol: CallProtocol) {
        if !matches!(info.state, CallState::WaitingAccept { .. }) {
            self.check_repeat(info, &g_b).await;
            return;
        }
        info.peer_protocol = Some(protocol);
        if let Err(e) = self.set_state(info, CallTransition::PeerAccepted) {
            warn!("Call {}: {}", info.call_id, e);
            return;
        }
        if let Err(e) = self.send_confirm(info, g_b).await {
            warn!("Confirming call {} failed: {}", info.call_id, e);
            self.fail(info, e.failure_reason()).await;
        }
    }

    async fn send_confirm(&self, info: &mut CallInfo, g_b: Vec<u8>) -> Result<(), CallError> {
        let kx = info
            .key_exchange
            .as_mut()
            .ok_or(CallError::MissingField("key exchange"))?;
        let key_fingerprint = kx.accept_peer_public(&g_b)?;
        let g_a = kx.own_public_wire()?;
        debug!(
            "Call {}: key derived from {}-byte g_b, sending confirmation",
            info.call_id,
            g_b.len()
        );

        let response = match self
            .transport
            .confirm_call(info.handle(), g_a, key_fingerprint, self.config.protocol)
            .await
        {
            Ok(response) => response,
            Err(TransportError::Race(kind)) => {
                self.absorb_race(info, kind);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match response {
            PhoneCall::Confirmed {
                handle,
                connections,
                p2p_allowed,
                protocol,
                ..
            } => {
                info.refresh_access_hash(handle.access_hash);
                info.endpoints = connections;
                info.p2p_allowed = p2p_allowed;
                info.peer_protocol = Some(protocol);
                self.establish(info).await
            }
            PhoneCall::Discarded {
                handle,
                reason,
                need_debug,
                need_rating,
            } => {
                info.refresh_access_hash(handle.access_hash);
                info.need_debug = need_debug;
                self.finish(info, discard_transition(reason), need_rating);
                Ok(())
            }
            other => {
                debug!(
                    "Confirmation of call {} answered with a {} record",
                    info.call_id,
                    other.kind()
                );
                Err(CallError::MissingField("connections"))
            }
        }
    }

    async fn on_confirmed(&self, info: &mut CallInfo, update: PhoneCall) {
        let PhoneCall::Confirmed {
            g_a_or_b,
            key_fingerprint,
            connections,
            p2p_allowed,
            protocol,
            ..
        } = update
        else {
            return;
        };

        let derived = info
            .key_exchange
            .as_ref()
            .is_some_and(|kx| kx.key_fingerprint().is_some());
        if derived {
            self.check_repeat(info, &g_a_or_b).await;
            return;
        }

        let result = match verify_confirmation(info, &g_a_or_b, key_fingerprint) {
            Ok(()) => {
                info.endpoints = connections;
                info.p2p_allowed = p2p_allowed;
                info.peer_protocol = Some(protocol);
                self.establish(info).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Call {} rejected confirmation: {}", info.call_id, e);
            self.fail(info, e.failure_reason()).await;
        }
    }

    /// Key material arrived again after the secret was derived. The same
    /// value is a harmless repeat; anything else aborts the call.
    async fn check_repeat(&self, info: &mut CallInfo, peer_value: &[u8]) {
        let same = info
            .key_exchange
            .as_ref()
            .and_then(|kx| kx.matches_peer_public(peer_value));
        if same == Some(true) {
            debug!("Ignoring repeated key material for call {}", info.call_id);
            return;
        }
        warn!(
            "Call {} received different key material in state {}",
            info.call_id,
            info.state.name()
        );
        self.fail(info, FailureReason::ProtocolViolation).await;
    }

    /// Visualization, relay config and media handoff, then `Established`.
    async fn establish(&self, info: &mut CallInfo) -> Result<(), CallError> {
        let relay = self.transport.fetch_relay_config().await?;
        let server_config = Arc::new(ServerConfig::from_json(&relay.server_config_json));

        let kx = info
            .key_exchange
            .as_mut()
            .ok_or(CallError::MissingField("key exchange"))?;
        let visualization = kx
            .visualization()?
            .ok_or(CallError::MissingField("shared secret"))?;
        let key_fingerprint = kx
            .key_fingerprint()
            .ok_or(CallError::MissingField("key fingerprint"))?;
        let secret = kx
            .take_shared_secret()
            .ok_or(CallError::MissingField("shared secret"))?;
        let auth_key = secret.to_zeroizing_vec();
        drop(secret);

        info.visualization = Some(visualization);
        info.server_config = Some(Arc::clone(&server_config));
        let own_max = info.protocol.max_layer;
        let max_layer = info
            .peer_protocol
            .map_or(own_max, |peer| peer.max_layer.min(own_max));

        handoff(
            self.media.as_ref(),
            auth_key,
            HandoffRequest {
                call_id: info.call_id,
                role: info.role,
                key_fingerprint,
                endpoints: &info.endpoints,
                allow_p2p: info.p2p_allowed,
                max_layer,
                relay: &relay,
                server_config,
                options: HandoffOptions {
                    data_saving: self.config.data_saving,
                    dsp: self.config.dsp,
                    network_type: self.config.network_type,
                },
            },
        )?;
        info.media_started = true;

        self.set_state(info, CallTransition::KeysConfirmed)?;
        info!("Call {} established", info.call_id);
        self.events.emit(CallEvent::Established {
            call_id: info.call_id,
            visualization,
        });
        Ok(())
    }

    /// Hang up. Discarding a call that already ended is a no-op.
    pub async fn discard(&self, call_id: CallId) -> Result<Option<DiscardSummary>, CallError> {
        let entry = self.entry(call_id).await?;
        let mut info = entry.lock().await;
        if info.state.is_terminal() {
            debug!("Call {} already {}, nothing to discard", call_id, info.state.name());
            return Ok(None);
        }
        let reason = match info.state {
            CallState::Established { .. } => DiscardReason::Hangup,
            CallState::Requesting { .. } | CallState::WaitingAccept { .. } => {
                DiscardReason::Missed
            }
            _ => DiscardReason::Disconnect,
        };
        self.hang_up(&mut info, reason, EndReason::LocalHangup).await
    }

    /// Turn down an incoming call before answering it.
    pub async fn decline(
        &self,
        call_id: CallId,
        reason: DiscardReason,
    ) -> Result<Option<DiscardSummary>, CallError> {
        let entry = self.entry(call_id).await?;
        let mut info = entry.lock().await;
        if info.state.is_terminal() {
            return Ok(None);
        }
        if !info.state.can_accept() {
            return Err(InvalidTransition {
                current_state: info.state.name().to_string(),
                attempted: "Decline".to_string(),
            }
            .into());
        }
        self.hang_up(&mut info, reason, EndReason::Declined).await
    }

    async fn hang_up(
        &self,
        info: &mut CallInfo,
        reason: DiscardReason,
        local_reason: EndReason,
    ) -> Result<Option<DiscardSummary>, CallError> {
        let duration_secs = info.elapsed_secs();
        let connection_id = self.relay_id(info).unwrap_or(0);
        let result = self
            .transport
            .discard_call(info.handle(), reason, duration_secs, connection_id)
            .await;
        match result {
            Ok(()) | Err(TransportError::Race(_)) => Ok(self.finish(
                info,
                CallTransition::Ended {
                    reason: local_reason,
                },
                false,
            )),
            Err(e) => {
                warn!("Discarding call {} failed: {}", info.call_id, e);
                self.finish(
                    info,
                    CallTransition::Failed {
                        reason: FailureReason::TransportFailure,
                    },
                    false,
                );
                Err(e.into())
            }
        }
    }

    /// Send the media engine's debug log if the relay asked for it.
    ///
    /// Returns whether a log was sent.
    pub async fn save_call_debug(&self, call_id: CallId) -> Result<bool, CallError> {
        let entry = self.entry(call_id).await?;
        let info = entry.lock().await;
        if !info.need_debug {
            return Ok(false);
        }
        let Some(log) = self.media.debug_log(call_id) else {
            return Ok(false);
        };
        self.transport.save_call_debug(info.handle(), log).await?;
        Ok(true)
    }

    /// Forward a 1 to 5 star rating.
    pub async fn rate_call(
        &self,
        call_id: CallId,
        rating: u8,
        comment: &str,
    ) -> Result<(), CallError> {
        if !(1..=5).contains(&rating) {
            return Err(CallError::InvalidRating(rating));
        }
        let entry = self.entry(call_id).await?;
        let info = entry.lock().await;
        self.transport
            .set_call_rating(info.handle(), rating, comment.to_string())
            .await?;
        Ok(())
    }

    /// Feed back a state change reported by the media engine.
    pub async fn handle_media_state(
        &self,
        call_id: CallId,
        state: MediaState,
    ) -> Result<(), CallError> {
        let entry = self.entry(call_id).await?;
        let mut info = entry.lock().await;
        match state {
            MediaState::Failed => self.fail(&mut info, FailureReason::MediaFailure).await,
            other => debug!("Call {} media state {:?}", call_id, other),
        }
        Ok(())
    }

    pub async fn get_call(&self, call_id: CallId) -> Option<CallSnapshot> {
        let entry = self.calls.read().await.get(&call_id).cloned()?;
        let info = entry.lock().await;
        Some(info.snapshot())
    }

    pub async fn get_active_calls(&self) -> Vec<CallSnapshot> {
        let entries: Vec<CallEntry> = self.calls.read().await.values().cloned().collect();
        let mut active = Vec::new();
        for entry in entries {
            let info = entry.lock().await;
            if !info.state.is_terminal() {
                active.push(info.snapshot());
            }
        }
        active
    }

    pub async fn has_active_call(&self) -> bool {
        !self.get_active_calls().await.is_empty()
    }

    /// Drop terminal calls from the table. Returns how many were removed.
    pub async fn cleanup_ended_calls(&self) -> usize {
        let mut calls = self.calls.write().await;
        let before = calls.len();
        calls.retain(|_, entry| is_live(entry));
        before - calls.len()
    }

    async fn entry(&self, call_id: CallId) -> Result<CallEntry, CallError> {
        self.calls
            .read()
            .await
            .get(&call_id)
            .cloned()
            .ok_or(CallError::NotFound(call_id))
    }

    fn set_state(&self, info: &mut CallInfo, transition: CallTransition) -> Result<(), CallError> {
        info.apply_transition(transition)?;
        debug!("Call {} is now {}", info.call_id, info.state.name());
        self.events.emit(CallEvent::StateChanged {
            call_id: info.call_id,
            state: info.state.clone(),
        });
        Ok(())
    }

    fn relay_id(&self, info: &CallInfo) -> Option<i64> {
        if info.media_started {
            self.media.preferred_relay_id(info.call_id)
        } else {
            None
        }
    }

    fn summarize(&self, info: &CallInfo, peer_need_rating: bool) -> DiscardSummary {
        let engine_need_rate = info.media_started && self.media.need_rate(info.call_id);
        let bad_call_rating = info
            .server_config
            .as_ref()
            .is_some_and(|config| config.bad_call_rating());
        DiscardSummary {
            duration_secs: info.elapsed_secs(),
            preferred_relay_id: self.relay_id(info),
            need_debug: info.need_debug,
            need_rating: peer_need_rating || (bad_call_rating && engine_need_rate),
        }
    }

    /// Move a live call to a terminal state, stop its media and publish the
    /// summary. Returns `None` if the call had already ended.
    fn finish(
        &self,
        info: &mut CallInfo,
        transition: CallTransition,
        peer_need_rating: bool,
    ) -> Option<DiscardSummary> {
        if info.state.is_terminal() {
            return None;
        }
        let summary = self.summarize(info, peer_need_rating);
        if let Err(e) = self.set_state(info, transition) {
            warn!("Call {}: {}", info.call_id, e);
            return None;
        }
        if info.media_started {
            self.media.stop(info.call_id);
        }
        info!(
            "Call {} finished as {} after {}s",
            info.call_id,
            info.state.name(),
            summary.duration_secs
        );
        info.summary = Some(summary.clone());
        self.events.emit(CallEvent::Terminated {
            call_id: info.call_id,
            state: info.state.clone(),
            summary: summary.clone(),
        });
        Some(summary)
    }

    /// Abort the call. Protocol failures are also reported to the peer
    /// through a best-effort discard.
    async fn fail(&self, info: &mut CallInfo, reason: FailureReason) {
        let Some(summary) = self.finish(info, CallTransition::Failed { reason }, false) else {
            return;
        };
        if !reason.notifies_peer() {
            return;
        }
        let result = self
            .transport
            .discard_call(
                info.handle(),
                DiscardReason::Disconnect,
                summary.duration_secs,
                summary.preferred_relay_id.unwrap_or(0),
            )
            .await;
        if let Err(e) = result {
            debug!("Discard after failed call {} not delivered: {}", info.call_id, e);
        }
    }

    fn absorb_race(&self, info: &mut CallInfo, kind: RaceKind) {
        let reason = match kind {
            RaceKind::AlreadyAccepted => EndReason::AcceptedElsewhere,
            RaceKind::AlreadyDeclined => EndReason::Declined,
        };
        info!("Call {} was settled elsewhere ({:?})", info.call_id, kind);
        self.finish(info, CallTransition::Ended { reason }, false);
    }
}

fn is_live(entry: &CallEntry) -> bool {
    // A locked call is mid-transition and counts as live.
    entry
        .try_lock()
        .map(|info| !info.state.is_terminal())
        .unwrap_or(true)
}

fn discard_transition(reason: Option<DiscardReason>) -> CallTransition {
    match reason {
        Some(DiscardReason::Busy) => CallTransition::PeerBusy,
        Some(DiscardReason::Disconnect) => CallTransition::Ended {
            reason: EndReason::PeerDisconnect,
        },
        Some(DiscardReason::Missed) => CallTransition::Ended {
            reason: EndReason::Missed,
        },
        Some(DiscardReason::Hangup) | None => CallTransition::Ended {
            reason: EndReason::PeerHangup,
        },
    }
}

/// Responder checks, in order: commitment, range, derivation, fingerprint.
fn verify_confirmation(
    info: &mut CallInfo,
    g_a: &[u8],
    key_fingerprint: i64,
) -> Result<(), CallError> {
    if g_a.is_empty() {
        return Err(CallError::MissingField("g_a_or_b"));
    }
    let kx = info
        .key_exchange
        .as_mut()
        .ok_or(CallError::MissingField("key exchange"))?;
    kx.verify_peer_commitment(g_a)?;
    kx.accept_peer_public(g_a)?;
    kx.verify_fingerprint(key_fingerprint)?;
    Ok(())
}
