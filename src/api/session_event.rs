use crate::Error;
use crate::Result;
use crate::api::peripheral::PeripheralHandle;

/// Session progress as shown to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Discovering {
        name: String,
    },
    Connecting {
        peripheral: PeripheralHandle,
    },
    DiscoveringCapabilities {
        peripheral: PeripheralHandle,
    },
    Ready {
        peripheral: PeripheralHandle,
    },
    Sending {
        peripheral: PeripheralHandle,
    },
    Disconnecting,
    Disconnected,
    Failed {
        reason: Error,
    },
}

impl SessionState {
    /// True while a session holds the radio.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            SessionState::Idle | SessionState::Disconnected | SessionState::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Outcome of a dispatched command. `Ok` means the write was accepted
    /// for transmission, not that the peripheral acted on it.
    CommandCompleted {
        token: Option<String>,
        result: Result<()>,
    },
}
