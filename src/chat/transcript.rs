use crate::link::types::{LinkEvent, SessionState};

pub fn status_text(state: SessionState, peer_name: Option<&str>) -> String {
    match state {
        SessionState::Connected => format!("connected to {}", peer_name.unwrap_or("unknown device")),
        SessionState::Connecting => "connecting…".to_string(),
        SessionState::Listen | SessionState::None => "not connected".to_string(),
    }
}

/// The conversation as the user sees it: one line per message, restarted on every new
/// connection.
#[derive(Debug, Default)]
pub struct Transcript {
    state: Option<SessionState>,
    peer_name: Option<String>,
    conversation: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation(&self) -> &[String] {
        &self.conversation
    }

    pub fn status(&self) -> String {
        status_text(self.state.unwrap_or(SessionState::None), self.peer_name.as_deref())
    }

    /// Records the event and returns the line to show for it.
    pub fn apply(&mut self, event: &LinkEvent) -> String {
        match event {
            LinkEvent::StateChange(state) => {
                self.state = Some(*state);
                if *state == SessionState::Connected {
                    self.conversation.clear();
                }
                format!("-- {}", self.status())
            },
            LinkEvent::Sent(bytes) => {
                let line = format!("Me:  {}", String::from_utf8_lossy(bytes));
                self.conversation.push(line.clone());
                line
            },
            LinkEvent::Received(bytes) => {
                let name = self.peer_name.as_deref().unwrap_or("?");
                let line = format!("{}:  {}", name, String::from_utf8_lossy(bytes));
                self.conversation.push(line.clone());
                line
            },
            LinkEvent::PeerName(name) => {
                self.peer_name = Some(name.clone());
                format!("! Connected to {}", name)
            },
            LinkEvent::Toast(text) => format!("! {}", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_lines() {
        let mut transcript = Transcript::new();

        assert_eq!(transcript.apply(&LinkEvent::PeerName("Pixel".to_string())), "! Connected to Pixel");
        assert_eq!(transcript.apply(&LinkEvent::StateChange(SessionState::Connected)), "-- connected to Pixel");
        assert_eq!(transcript.apply(&LinkEvent::Sent(b"hi".to_vec())), "Me:  hi");
        assert_eq!(transcript.apply(&LinkEvent::Received(b"hello".to_vec())), "Pixel:  hello");

        assert_eq!(transcript.conversation(), &["Me:  hi".to_string(), "Pixel:  hello".to_string()]);
    }

    #[test]
    fn test_new_connection_clears_conversation() {
        let mut transcript = Transcript::new();
        transcript.apply(&LinkEvent::StateChange(SessionState::Connected));
        transcript.apply(&LinkEvent::Sent(b"old".to_vec()));

        transcript.apply(&LinkEvent::StateChange(SessionState::Listen));
        assert_eq!(transcript.conversation().len(), 1);

        transcript.apply(&LinkEvent::StateChange(SessionState::Connected));
        assert!(transcript.conversation().is_empty());
    }

    #[test]
    fn test_status() {
        let mut transcript = Transcript::new();
        assert_eq!(transcript.status(), "not connected");

        transcript.apply(&LinkEvent::StateChange(SessionState::Connecting));
        assert_eq!(transcript.status(), "connecting…");

        assert_eq!(transcript.apply(&LinkEvent::Toast("Unable to connect device".to_string())), "! Unable to connect device");
    }
}
