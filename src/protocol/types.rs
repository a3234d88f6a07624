//! Line Protocol Types

use crate::error::RelayError;
use crate::protocol::constants::*;

/// A single client line interpreted as a protocol command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// End this session
    Quit,
    /// Relay the payload to every registered connection
    Broadcast(&'a str),
    /// Any line without a protocol meaning
    Message(&'a str),
}

impl<'a> Command<'a> {
    /// Parse one received line (terminator already stripped).
    ///
    /// A `/broadcast` with a missing, empty or whitespace-only payload is a
    /// `MalformedCommand`. Non-empty payloads are kept verbatim.
    pub fn parse(line: &'a str) -> Result<Self, RelayError> {
        if line == QUIT_COMMAND {
            return Ok(Command::Quit);
        }

        let Some(rest) = line.strip_prefix(BROADCAST_COMMAND) else {
            return Ok(Command::Message(line));
        };

        if rest.is_empty() {
            return Err(RelayError::MalformedCommand(format!(
                "{} requires a payload",
                BROADCAST_COMMAND
            )));
        }

        // `/broadcastfoo` is not the broadcast command
        let Some(payload) = rest.strip_prefix(BROADCAST_SEPARATOR) else {
            return Ok(Command::Message(line));
        };

        if payload.trim().is_empty() {
            return Err(RelayError::MalformedCommand(format!(
                "{} payload is empty",
                BROADCAST_COMMAND
            )));
        }

        Ok(Command::Broadcast(payload))
    }

    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Quit => "quit",
            Command::Broadcast(_) => "broadcast",
            Command::Message(_) => "message",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quit() {
        assert_eq!(Command::parse("/quit").unwrap(), Command::Quit);
        // Only the exact literal quits
        assert_eq!(Command::parse("/quit now").unwrap(), Command::Message("/quit now"));
        assert_eq!(Command::parse(" /quit").unwrap(), Command::Message(" /quit"));
    }

    #[test]
    fn test_parse_broadcast_keeps_payload_verbatim() {
        assert_eq!(Command::parse("/broadcast hello").unwrap(), Command::Broadcast("hello"));
        assert_eq!(
            Command::parse("/broadcast  two  spaces ").unwrap(),
            Command::Broadcast(" two  spaces ")
        );
        assert_eq!(
            Command::parse("/broadcast /quit").unwrap(),
            Command::Broadcast("/quit")
        );
    }

    #[test]
    fn test_parse_malformed_broadcast() {
        for line in ["/broadcast", "/broadcast ", "/broadcast    "] {
            let err = Command::parse(line).unwrap_err();
            assert!(matches!(err, RelayError::MalformedCommand(_)), "line {:?}", line);
        }
    }

    #[test]
    fn test_parse_other_lines() {
        assert_eq!(Command::parse("hello").unwrap(), Command::Message("hello"));
        assert_eq!(Command::parse("").unwrap(), Command::Message(""));
        assert_eq!(
            Command::parse("/broadcastfoo").unwrap(),
            Command::Message("/broadcastfoo")
        );
        assert_eq!(Command::parse("/nick bob").unwrap(), Command::Message("/nick bob"));
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::Quit.name(), "quit");
        assert_eq!(Command::Broadcast("x").name(), "broadcast");
        assert_eq!(Command::Message("x").name(), "message");
    }
}
