/// Client connection lifecycle.
///
/// `Disconnected → Connecting → Connected → Receiving → Disconnected …`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Socket open, nothing received from the server yet.
    Connected,
    /// Socket open and the server has sent at least one frame.
    Receiving,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Receiving => "receiving",
        }
    }

    /// True when a socket is open (`Connected` or `Receiving`).
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Receiving)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
