pub const PING_REPLY: &str = "Pong! Agent is running.";
pub const CLEAR_REPLY: &str = "Conversation history cleared.";

/// Chat commands answered directly, without going through the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Clear,
}

impl Command {
    /// Case-insensitive exact match on the whole message.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        if text.eq_ignore_ascii_case("/ping") {
            Some(Self::Ping)
        } else if text.eq_ignore_ascii_case("/clear") {
            Some(Self::Clear)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("/ping", Some(Command::Ping))]
    #[case("/PING", Some(Command::Ping))]
    #[case("/Clear", Some(Command::Clear))]
    #[case("/ping please", None)]
    #[case(" /ping", None)]
    #[case("ping", None)]
    fn test_parse(#[case] text: &str, #[case] expected: Option<Command>) {
        assert_eq!(Command::parse(text), expected);
    }
}
