use tgcore::types::{CallId, UserId};
use tgcore::visualization;
use tokio::sync::broadcast;

use super::state::{CallState, DiscardSummary};

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Lifecycle notifications published by the call manager.
#[derive(Debug, Clone)]
pub enum CallEvent {
    IncomingCall {
        call_id: CallId,
        caller: UserId,
    },
    StateChanged {
        call_id: CallId,
        state: CallState,
    },
    /// Keys agreed and media handed off. The emojis should match on both
    /// phones.
    Established {
        call_id: CallId,
        visualization: [usize; 4],
    },
    Terminated {
        call_id: CallId,
        state: CallState,
        summary: DiscardSummary,
    },
}

impl CallEvent {
    pub fn call_id(&self) -> CallId {
        match self {
            CallEvent::IncomingCall { call_id, .. }
            | CallEvent::StateChanged { call_id, .. }
            | CallEvent::Established { call_id, .. }
            | CallEvent::Terminated { call_id, .. } => *call_id,
        }
    }

    pub fn emojis(&self) -> Option<[&'static str; 4]> {
        match self {
            CallEvent::Established { visualization, .. } => {
                Some(visualization::emojis(*visualization))
            }
            _ => None,
        }
    }
}

/// Broadcast channel of [`CallEvent`]s. Each subscriber sees every event
/// published after it subscribed.
#[derive(Debug)]
pub struct CallEventBus {
    sender: broadcast::Sender<CallEvent>,
}

impl CallEventBus {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn emit(&self, event: CallEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for CallEventBus {
    fn default() -> Self {
        Self::new()
    }
}
