//! Tuning values the relay hands to the media engine.
//!
//! A `ServerConfig` is an immutable snapshot: the defaults below overlaid with
//! whatever JSON object the relay served for this attempt. Nothing updates it
//! in place; a new attempt parses a new snapshot.

use log::warn;
use serde::Serialize;
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ServerConfig {
    values: Map<String, Value>,
}

fn defaults() -> Map<String, Value> {
    let value = json!({
        "audio_max_bitrate": 20000,
        "audio_max_bitrate_gprs": 8000,
        "audio_max_bitrate_edge": 16000,
        "audio_max_bitrate_saving": 8000,
        "audio_init_bitrate": 16000,
        "audio_init_bitrate_gprs": 8000,
        "audio_init_bitrate_edge": 8000,
        "audio_init_bitrate_saving": 8000,
        "audio_bitrate_step_incr": 1000,
        "audio_bitrate_step_decr": 1000,
        "audio_min_bitrate": 8000,
        "relay_switch_threshold": 0.8,
        "p2p_to_relay_switch_threshold": 0.6,
        "relay_to_p2p_switch_threshold": 0.8,
        "reconnecting_state_timeout": 2.0,
        "rate_flags": 0xFFFF_FFFFu32,
        "rate_min_rtt": 0.6,
        "rate_min_send_loss": 0.2,
        "packet_loss_for_extra_ec": 0.02,
        "max_unsent_stream_packets": 2,
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { values: defaults() }
    }
}

impl ServerConfig {
    /// Overlay the relay's JSON object on the defaults.
    ///
    /// A blob that does not parse, or is not an object, is logged and the
    /// defaults are used unchanged.
    pub fn from_json(raw: &str) -> Self {
        Self::default().merged(raw)
    }

    /// A new snapshot with `raw` overlaid on this one.
    pub fn merged(&self, raw: &str) -> Self {
        let mut values = self.values.clone();
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(overrides)) => values.extend(overrides),
            Ok(other) => warn!("Ignoring server config that is not an object: {other}"),
            Err(e) => warn!("Error parsing server config, using defaults: {e}"),
        }
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Whether the relay wants a rating prompt after calls the media engine
    /// judged poor. Accepts a boolean or a non-zero number.
    pub fn bad_call_rating(&self) -> bool {
        self.get_bool("bad_call_rating")
            .or_else(|| self.get_double("bad_call_rating").map(|v| v != 0.0))
            .unwrap_or(false)
    }
}
