pub mod call;

pub use call::{
    CallHandle, CallId, CallProtocol, CallRole, DataSaving, DiscardReason, DspFlags, Endpoint,
    NetType, PhoneCall, RelayConfig, UserId,
};
