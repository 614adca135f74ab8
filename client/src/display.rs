//! Display collaborator for the chat client

/// Receives everything the client wants to show the user
///
/// Implementations are called from the inbound task as well as from the
/// interactive loop, so they must be shareable between threads.
pub trait ChatDisplay: Send + Sync {
    /// A chat line authored by `identity`
    fn on_chat_message(&self, identity: &str, text: &str);

    /// Joins, departures, server notices and connection status
    fn on_system_notice(&self, text: &str);
}

/// Plain stdout display: chat as `identity: text`, notices as `* text`
#[derive(Debug, Default)]
pub struct TerminalDisplay;

impl TerminalDisplay {
    pub fn new() -> Self {
        Self
    }

    pub fn format_chat(identity: &str, text: &str) -> String {
        format!("{}: {}", identity, text)
    }

    pub fn format_notice(text: &str) -> String {
        format!("* {}", text)
    }
}

impl ChatDisplay for TerminalDisplay {
    fn on_chat_message(&self, identity: &str, text: &str) {
        println!("{}", Self::format_chat(identity, text));
    }

    fn on_system_notice(&self, text: &str) {
        println!("{}", Self::format_notice(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_formats() {
        assert_eq!(TerminalDisplay::format_chat("alice", "hi"), "alice: hi");
        assert_eq!(
            TerminalDisplay::format_notice("bob has joined the chatroom."),
            "* bob has joined the chatroom."
        );
    }
}
