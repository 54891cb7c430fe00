use std::fmt;

/// Per-connection progress, shared by the client and the server side.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Handshaking,
    AwaitingBatteryConfirm,
    PilotReady,
    Streaming,
}

/// What happened on the link.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    HelloExchanged,
    BatteryAccepted,
    BatteryRefused,
    Frame,
    Closed,
}

impl SessionState {
    /// Next state for `event`, or `None` when the event is not allowed here.
    pub fn next(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (_, Closed) => Some(Disconnected),
            (Disconnected, Connected) => Some(Handshaking),
            (Handshaking, HelloExchanged) => Some(AwaitingBatteryConfirm),
            (AwaitingBatteryConfirm, BatteryAccepted) => Some(PilotReady),
            (AwaitingBatteryConfirm, BatteryRefused) => Some(AwaitingBatteryConfirm),
            (PilotReady, Frame) | (Streaming, Frame) => Some(Streaming),
            _ => None,
        }
    }

    pub fn is_streaming(self) -> bool {
        matches!(self, SessionState::PilotReady | SessionState::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Handshaking => "handshaking",
            SessionState::AwaitingBatteryConfirm => "awaiting battery",
            SessionState::PilotReady => "pilot ready",
            SessionState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}
