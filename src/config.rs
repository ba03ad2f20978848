use tgcore::dh::FingerprintScheme;
use tgcore::types::{CallProtocol, DataSaving, DspFlags, NetType};

/// Configuration for the call manager.
#[derive(Clone, Debug)]
pub struct CallManagerConfig {
    /// Maximum concurrent non-terminal calls.
    pub max_concurrent_calls: usize,
    /// Layers advertised with request, accept and confirm.
    pub protocol: CallProtocol,
    /// Must match what peers on the same protocol version use.
    pub fingerprint_scheme: FingerprintScheme,
    pub data_saving: DataSaving,
    pub network_type: NetType,
    pub dsp: DspFlags,
}

impl Default for CallManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            protocol: CallProtocol::default(),
            fingerprint_scheme: FingerprintScheme::Sha256,
            data_saving: DataSaving::Never,
            network_type: NetType::Unknown,
            dsp: DspFlags::default(),
        }
    }
}
