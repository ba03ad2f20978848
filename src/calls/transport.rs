//! Signaling relay interface.
//!
//! Request/response methods suspend until the relay answers; there is no
//! timeout at this layer. Updates about calls arrive separately on the
//! channel returned by [`SignalingTransport::subscribe`], in order per call.

use async_trait::async_trait;
use tgcore::dh::DhConfig;
use tgcore::types::{CallHandle, CallProtocol, DiscardReason, PhoneCall, RelayConfig, UserId};
use tokio::sync::broadcast;

use super::error::TransportError;

#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Fresh domain parameters and relay salt for one exchange attempt.
    async fn get_dh_config(&self) -> Result<DhConfig, TransportError>;

    async fn request_call(
        &self,
        peer: UserId,
        g_a_hash: [u8; 32],
        protocol: CallProtocol,
    ) -> Result<PhoneCall, TransportError>;

    async fn accept_call(
        &self,
        handle: CallHandle,
        g_b: Vec<u8>,
        protocol: CallProtocol,
    ) -> Result<PhoneCall, TransportError>;

    async fn confirm_call(
        &self,
        handle: CallHandle,
        g_a: Vec<u8>,
        key_fingerprint: i64,
        protocol: CallProtocol,
    ) -> Result<PhoneCall, TransportError>;

    async fn discard_call(
        &self,
        handle: CallHandle,
        reason: DiscardReason,
        duration_secs: i64,
        connection_id: i64,
    ) -> Result<(), TransportError>;

    async fn save_call_debug(&self, handle: CallHandle, debug: String)
    -> Result<(), TransportError>;

    async fn set_call_rating(
        &self,
        handle: CallHandle,
        rating: u8,
        comment: String,
    ) -> Result<(), TransportError>;

    async fn fetch_relay_config(&self) -> Result<RelayConfig, TransportError>;

    /// A new receiver for call updates addressed to this client.
    fn subscribe(&self) -> broadcast::Receiver<PhoneCall>;
}

#[cfg(test)]
pub mod mock {
    //! Scripted transport for unit tests.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use tokio::sync::Semaphore;

    use super::*;

    /// A request the manager sent, as recorded by [`MockTransport`].
    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        Request { peer: UserId, g_a_hash: [u8; 32] },
        Accept { handle: CallHandle, g_b: Vec<u8> },
        Confirm { handle: CallHandle, g_a: Vec<u8>, key_fingerprint: i64 },
        Discard { handle: CallHandle, reason: DiscardReason, duration_secs: i64 },
        Debug { handle: CallHandle, debug: String },
        Rating { handle: CallHandle, rating: u8, comment: String },
    }

    pub struct MockTransport {
        dh: DhConfig,
        updates: broadcast::Sender<PhoneCall>,
        sent: Mutex<Vec<Sent>>,
        request_replies: Mutex<VecDeque<Result<PhoneCall, TransportError>>>,
        accept_replies: Mutex<VecDeque<Result<PhoneCall, TransportError>>>,
        confirm_replies: Mutex<VecDeque<Result<PhoneCall, TransportError>>>,
        discard_error: Mutex<Option<TransportError>>,
        request_gate: Mutex<Option<Arc<Semaphore>>>,
        relay_config: RelayConfig,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                dh: DhConfig::relay_default(),
                updates: broadcast::channel(32).0,
                sent: Mutex::new(Vec::new()),
                request_replies: Mutex::new(VecDeque::new()),
                accept_replies: Mutex::new(VecDeque::new()),
                confirm_replies: Mutex::new(VecDeque::new()),
                discard_error: Mutex::new(None),
                request_gate: Mutex::new(None),
                relay_config: RelayConfig::default(),
            }
        }

        pub fn with_server_config(mut self, json: &str) -> Self {
            self.relay_config.server_config_json = json.to_string();
            self
        }

        pub fn dh(&self) -> &DhConfig {
            &self.dh
        }

        pub fn push_request_reply(&self, reply: Result<PhoneCall, TransportError>) {
            self.request_replies.lock().unwrap().push_back(reply);
        }

        pub fn push_accept_reply(&self, reply: Result<PhoneCall, TransportError>) {
            self.accept_replies.lock().unwrap().push_back(reply);
        }

        pub fn push_confirm_reply(&self, reply: Result<PhoneCall, TransportError>) {
            self.confirm_replies.lock().unwrap().push_back(reply);
        }

        pub fn fail_discards(&self, err: TransportError) {
            *self.discard_error.lock().unwrap() = Some(err);
        }

        /// Park every later `request_call` until a permit is added to the
        /// returned semaphore.
        pub fn hold_requests(&self) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            *self.request_gate.lock().unwrap() = Some(Arc::clone(&gate));
            gate
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn count(&self, pred: impl Fn(&Sent) -> bool) -> usize {
            self.sent.lock().unwrap().iter().filter(|s| pred(s)).count()
        }

        fn record(&self, sent: Sent) {
            self.sent.lock().unwrap().push(sent);
        }

        fn pop(
            queue: &Mutex<VecDeque<Result<PhoneCall, TransportError>>>,
            what: &str,
        ) -> Result<PhoneCall, TransportError> {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Failure(format!("no scripted {what} reply"))))
        }
    }

    #[async_trait]
    impl SignalingTransport for MockTransport {
        async fn get_dh_config(&self) -> Result<DhConfig, TransportError> {
            Ok(self.dh.clone())
        }

        async fn request_call(
            &self,
            peer: UserId,
            g_a_hash: [u8; 32],
            _protocol: CallProtocol,
        ) -> Result<PhoneCall, TransportError> {
            self.record(Sent::Request { peer, g_a_hash });
            let gate = self.request_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.acquire().await.unwrap().forget();
            }
            Self::pop(&self.request_replies, "request")
        }

        async fn accept_call(
            &self,
            handle: CallHandle,
            g_b: Vec<u8>,
            _protocol: CallProtocol,
        ) -> Result<PhoneCall, TransportError> {
            self.record(Sent::Accept { handle, g_b });
            Self::pop(&self.accept_replies, "accept")
        }

        async fn confirm_call(
            &self,
            handle: CallHandle,
            g_a: Vec<u8>,
            key_fingerprint: i64,
            _protocol: CallProtocol,
        ) -> Result<PhoneCall, TransportError> {
            self.record(Sent::Confirm {
                handle,
                g_a,
                key_fingerprint,
            });
            Self::pop(&self.confirm_replies, "confirm")
        }

        async fn discard_call(
            &self,
            handle: CallHandle,
            reason: DiscardReason,
            duration_secs: i64,
            _connection_id: i64,
        ) -> Result<(), TransportError> {
            self.record(Sent::Discard {
                handle,
                reason,
                duration_secs,
            });
            match self.discard_error.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn save_call_debug(
            &self,
            handle: CallHandle,
            debug: String,
        ) -> Result<(), TransportError> {
            self.record(Sent::Debug { handle, debug });
            Ok(())
        }

        async fn set_call_rating(
            &self,
            handle: CallHandle,
            rating: u8,
            comment: String,
        ) -> Result<(), TransportError> {
            self.record(Sent::Rating {
                handle,
                rating,
                comment,
            });
            Ok(())
        }

        async fn fetch_relay_config(&self) -> Result<RelayConfig, TransportError> {
            Ok(self.relay_config.clone())
        }

        fn subscribe(&self) -> broadcast::Receiver<PhoneCall> {
            self.updates.subscribe()
        }
    }
}
