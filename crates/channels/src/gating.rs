use std::collections::HashSet;

use crate::plugin::InboundEvent;

/// Prefixes of the daemon's own failure notices.
///
/// In self-chat mode those notices come back as self-originated inbound
/// events; acting on them would loop forever.
pub const LOOP_GUARD_PREFIXES: &[&str] = &[
    "Error processing",
    "Response timed out",
    "Could not understand",
];

/// Strip a device suffix: `123:7@s.whatsapp.net` becomes `123@s.whatsapp.net`.
#[must_use]
pub fn normalize_sender(id: &str) -> String {
    match (id.find(':'), id.rfind('@')) {
        (Some(colon), Some(at)) if colon < at => format!("{}{}", &id[..colon], &id[at..]),
        _ => id.to_string(),
    }
}

/// Outcome of checking an inbound event against the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    NotAllowlisted,
    SelfChatDisabled,
}

/// Decides which inbound events the daemon acts on.
///
/// Unlike an open-by-default policy, an empty allowlist admits nobody.
#[derive(Debug, Clone)]
pub struct AccessGate {
    allowlist: HashSet<String>,
    self_chat: bool,
}

impl AccessGate {
    pub fn new<I, S>(allowlist: I, self_chat: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowlist: allowlist
                .into_iter()
                .map(|s| normalize_sender(s.as_ref()))
                .collect(),
            self_chat,
        }
    }

    #[must_use]
    pub fn is_allowed(&self, id: &str) -> bool {
        !self.allowlist.is_empty() && self.allowlist.contains(&normalize_sender(id))
    }

    /// Gate an event on its conversation partner and self-origin.
    ///
    /// In a direct chat the conversation identifier is the partner's
    /// identifier, and in self-chat it is the owner's own, so that is
    /// what the allowlist is matched against.
    #[must_use]
    pub fn admit(&self, event: &InboundEvent) -> Admission {
        if !self.is_allowed(&event.chat_id) {
            return Admission::NotAllowlisted;
        }
        if event.from_self && !self.self_chat {
            return Admission::SelfChatDisabled;
        }
        Admission::Accepted
    }

    /// Whether a self-originated `text` is one of our own failure notices.
    #[must_use]
    pub fn is_loop_echo(from_self: bool, text: &str) -> bool {
        from_self && LOOP_GUARD_PREFIXES.iter().any(|p| text.starts_with(p))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::plugin::MessageKind,
        rstest::rstest,
    };

    fn event(chat_id: &str, from_self: bool) -> InboundEvent {
        InboundEvent {
            message_id: "m".into(),
            chat_id: chat_id.into(),
            sender_id: chat_id.into(),
            from_self,
            kind: MessageKind::Text,
            text: Some("hi".into()),
            caption: None,
        }
    }

    #[rstest]
    #[case("123:7@s.whatsapp.net", "123@s.whatsapp.net")]
    #[case("123@s.whatsapp.net", "123@s.whatsapp.net")]
    #[case("123:7:2@s.whatsapp.net", "123@s.whatsapp.net")]
    #[case("no-at:sign", "no-at:sign")]
    fn test_normalizes_device_suffix(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_sender(raw), expected);
    }

    #[test]
    fn test_empty_allowlist_admits_nobody() {
        let gate = AccessGate::new(Vec::<String>::new(), true);
        assert_eq!(
            gate.admit(&event("123@s.whatsapp.net", false)),
            Admission::NotAllowlisted
        );
    }

    #[test]
    fn test_allowlisted_device_identifier_is_admitted() {
        let gate = AccessGate::new(["123@s.whatsapp.net"], true);
        assert_eq!(
            gate.admit(&event("123:4@s.whatsapp.net", false)),
            Admission::Accepted
        );
        assert_eq!(
            gate.admit(&event("999@s.whatsapp.net", false)),
            Admission::NotAllowlisted
        );
    }

    #[test]
    fn test_self_events_need_self_chat_mode() {
        let on = AccessGate::new(["123@s.whatsapp.net"], true);
        let off = AccessGate::new(["123@s.whatsapp.net"], false);
        assert_eq!(on.admit(&event("123@s.whatsapp.net", true)), Admission::Accepted);
        assert_eq!(
            off.admit(&event("123@s.whatsapp.net", true)),
            Admission::SelfChatDisabled
        );
        assert_eq!(off.admit(&event("123@s.whatsapp.net", false)), Admission::Accepted);
    }

    #[rstest]
    #[case(true, "Error processing your message. Please try again.", true)]
    #[case(true, "Could not understand the voice note.", true)]
    #[case(true, "Response timed out. Try a shorter or more specific message.", true)]
    #[case(false, "Error processing your message. Please try again.", false)]
    #[case(true, "Hello there", false)]
    fn test_loop_guard(#[case] from_self: bool, #[case] text: &str, #[case] expected: bool) {
        assert_eq!(AccessGate::is_loop_echo(from_self, text), expected);
    }
}
