use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;
use tgcore::types::CallId;

use super::{MediaEngine, MediaSessionConfig};
use crate::calls::error::HandoffError;

/// What [`LoggingMediaEngine`] remembers about a session. The key is dropped
/// as soon as the session starts.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub call_id: CallId,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub is_outgoing: bool,
    pub auth_key_id: i64,
    pub call_id_hash: String,
    pub endpoint_ids: Vec<i64>,
    pub allow_p2p: bool,
    pub max_layer: i32,
    pub init_bitrate: Option<i64>,
    pub relay_switch_threshold: Option<f64>,
}

/// Media engine that moves no audio. It logs each session and answers the
/// accounting queries from what it recorded.
///
/// Meant for tests and demos. Stopped sessions stay readable until
/// [`LoggingMediaEngine::forget_stopped`] drops them.
#[derive(Debug, Default)]
pub struct LoggingMediaEngine {
    sessions: DashMap<CallId, SessionRecord>,
    need_rate: bool,
    refuse_with: Option<String>,
}

impl LoggingMediaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every call as one that deserves a rating prompt.
    pub fn with_need_rate(mut self, need_rate: bool) -> Self {
        self.need_rate = need_rate;
        self
    }

    /// Refuse every session with the given message.
    pub fn refusing(message: impl Into<String>) -> Self {
        Self {
            refuse_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn session(&self, call_id: CallId) -> Option<SessionRecord> {
        self.sessions.get(&call_id).map(|r| r.value().clone())
    }

    pub fn is_running(&self, call_id: CallId) -> bool {
        self.sessions
            .get(&call_id)
            .is_some_and(|r| r.stopped_at.is_none())
    }

    /// Drop the records of stopped sessions. Returns how many were removed.
    pub fn forget_stopped(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.stopped_at.is_none());
        before - self.sessions.len()
    }
}

impl MediaEngine for LoggingMediaEngine {
    fn configure_and_start(&self, session: MediaSessionConfig) -> Result<(), HandoffError> {
        if let Some(message) = &self.refuse_with {
            return Err(HandoffError::Engine(message.clone()));
        }
        info!(
            "Media session for call {} started ({} endpoints, p2p: {}, layer {})",
            session.call_id,
            session.endpoints.len(),
            session.allow_p2p,
            session.max_layer
        );
        let record = SessionRecord {
            call_id: session.call_id,
            started_at: Utc::now(),
            stopped_at: None,
            is_outgoing: session.is_outgoing,
            auth_key_id: session.auth_key_id,
            call_id_hash: hex::encode(session.call_id_hash),
            endpoint_ids: session.endpoints.iter().map(|e| e.id).collect(),
            allow_p2p: session.allow_p2p,
            max_layer: session.max_layer,
            init_bitrate: session.server_config.get_int("audio_init_bitrate"),
            relay_switch_threshold: session.server_config.get_double("relay_switch_threshold"),
        };
        self.sessions.insert(session.call_id, record);
        Ok(())
    }

    fn stop(&self, call_id: CallId) {
        let Some(mut record) = self.sessions.get_mut(&call_id) else {
            return;
        };
        if record.stopped_at.is_none() {
            debug!("Media session for call {} stopped", call_id);
            record.stopped_at = Some(Utc::now());
        }
    }

    fn preferred_relay_id(&self, call_id: CallId) -> Option<i64> {
        self.sessions
            .get(&call_id)
            .and_then(|r| r.endpoint_ids.first().copied())
    }

    fn need_rate(&self, call_id: CallId) -> bool {
        self.need_rate && self.sessions.contains_key(&call_id)
    }

    fn debug_log(&self, call_id: CallId) -> Option<String> {
        self.sessions
            .get(&call_id)
            .and_then(|r| serde_json::to_string(r.value()).ok())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tgcore::server_config::ServerConfig;
    use tgcore::types::{CallRole, Endpoint, RelayConfig};
    use zeroize::Zeroizing;

    use super::*;
    use crate::calls::media::{HandoffOptions, HandoffRequest, handoff};

    fn start(engine: &LoggingMediaEngine, id: i64) -> Result<(), HandoffError> {
        let relay = RelayConfig::default();
        let endpoints = [Endpoint {
            id: 700 + id,
            ipv4: "127.0.0.1".into(),
            ipv6: String::new(),
            port: 1400,
            peer_tag: vec![1; 16],
        }];
        handoff(
            engine,
            Zeroizing::new(vec![9; 256]),
            HandoffRequest {
                call_id: CallId(id),
                role: CallRole::Responder,
                key_fingerprint: 3,
                endpoints: &endpoints,
                allow_p2p: false,
                max_layer: 92,
                relay: &relay,
                server_config: Arc::new(ServerConfig::default()),
                options: HandoffOptions::default(),
            },
        )
    }

    #[test]
    fn test_records_and_stops_sessions() {
        let engine = LoggingMediaEngine::new().with_need_rate(true);
        start(&engine, 1).unwrap();

        assert!(engine.is_running(CallId(1)));
        assert_eq!(engine.preferred_relay_id(CallId(1)), Some(701));
        assert!(engine.need_rate(CallId(1)));
        assert!(!engine.need_rate(CallId(2)));

        engine.stop(CallId(1));
        assert!(!engine.is_running(CallId(1)));
        let log = engine.debug_log(CallId(1)).unwrap();
        assert!(log.contains("\"auth_key_id\":3"));
        assert!(log.contains("\"init_bitrate\":16000"));
    }

    /// Test that stopped sessions can be dropped while running ones stay
    #[test]
    fn test_forget_stopped_sessions() {
        let engine = LoggingMediaEngine::new();
        start(&engine, 1).unwrap();
        start(&engine, 2).unwrap();
        engine.stop(CallId(1));

        assert_eq!(engine.forget_stopped(), 1);
        assert!(engine.session(CallId(1)).is_none());
        assert!(engine.debug_log(CallId(1)).is_none());
        assert!(engine.is_running(CallId(2)));
        assert_eq!(engine.forget_stopped(), 0);
    }

    #[test]
    fn test_refusing_engine() {
        let engine = LoggingMediaEngine::refusing("no audio device");
        assert_eq!(
            start(&engine, 1),
            Err(HandoffError::Engine("no audio device".into()))
        );
        assert!(engine.session(CallId(1)).is_none());
    }
}
