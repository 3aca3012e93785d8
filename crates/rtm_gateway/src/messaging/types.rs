//! Client command vocabulary.
//!
//! Clients send JSON objects with a `command` field. Two commands are handled
//! by the gateway itself; a fixed set is relayed to the bus once the socket is
//! authenticated; anything else is a protocol violation.
//!
//! ```json
//! { "command": "ws_auth", "auth_token": "<token>" }
//! { "command": "ws_ping" }
//! { "command": "ws_add_reaction", "message_id": 991, "reaction": "+1" }
//! ```

use std::fmt;

pub const AUTH_COMMAND: &str = "ws_auth";
pub const PING_COMMAND: &str = "ws_ping";

/// Application-level reply to `ws_ping`.
pub const PONG_FRAME: &str = r#"{"event":"pong"}"#;

/// Commands forwarded to the bus for authenticated sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayCommand {
    EphemeralTyping,
    ReadNotification,
    AddReaction,
    RemoveReaction,
    AllReadNotification,
}

impl RelayCommand {
    pub const ALL: [RelayCommand; 5] = [
        RelayCommand::EphemeralTyping,
        RelayCommand::ReadNotification,
        RelayCommand::AddReaction,
        RelayCommand::RemoveReaction,
        RelayCommand::AllReadNotification,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelayCommand::EphemeralTyping => "ws_ephemeral_typing",
            RelayCommand::ReadNotification => "ws_read_notification",
            RelayCommand::AddReaction => "ws_add_reaction",
            RelayCommand::RemoveReaction => "ws_remove_reaction",
            RelayCommand::AllReadNotification => "ws_all_read_notification",
        }
    }

    pub fn parse(command: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == command)
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified `command` field of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Auth,
    Ping,
    Relay(RelayCommand),
    /// Missing, non-string, or not in the vocabulary.
    Unknown(Option<String>),
}

impl Command {
    pub fn classify(command: Option<&str>) -> Self {
        match command {
            Some(AUTH_COMMAND) => Command::Auth,
            Some(PING_COMMAND) => Command::Ping,
            Some(other) => RelayCommand::parse(other)
                .map(Command::Relay)
                .unwrap_or_else(|| Command::Unknown(Some(other.to_string()))),
            None => Command::Unknown(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(Command::classify(Some("ws_auth")), Command::Auth);
        assert_eq!(Command::classify(Some("ws_ping")), Command::Ping);
        assert_eq!(
            Command::classify(Some("ws_all_read_notification")),
            Command::Relay(RelayCommand::AllReadNotification)
        );
        assert_eq!(
            Command::classify(Some("ws_drop_tables")),
            Command::Unknown(Some("ws_drop_tables".to_string()))
        );
        assert_eq!(Command::classify(None), Command::Unknown(None));
    }

    #[test]
    fn test_relay_names_round_trip() {
        for command in RelayCommand::ALL {
            assert_eq!(RelayCommand::parse(command.as_str()), Some(command));
        }
    }
}
