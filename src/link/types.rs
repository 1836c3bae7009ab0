use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Listen,
    Connecting,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            SessionState::None => "none",
            SessionState::Listen => "listen",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
        };

        write!(f, "{}", result)
    }
}

/// Which of the two listening endpoints a connection goes through. A secure channel requires
/// link-layer authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Secure,
    Insecure,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Secure, ChannelKind::Insecure];

    pub fn is_secure(&self) -> bool {
        *self == ChannelKind::Secure
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            ChannelKind::Secure => "Secure",
            ChannelKind::Insecure => "Insecure",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub address: String,
    pub name: String,
}

impl Peer {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Peer { address: address.into(), name: name.into() }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    StateChange(SessionState),
    Sent(Vec<u8>),
    Received(Vec<u8>),
    PeerName(String),
    Toast(String),
}
