use chrono::{DateTime, Utc};

use crate::core::segment::{segment, Segment};

/// Who authored a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    User,
    Ai,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Ai => "ai",
        }
    }

    /// Maps a wire sender tag onto a [`Sender`]. Anything that is not the
    /// user is treated as assistant output, matching the service's own
    /// two-party model.
    pub fn from_wire(value: &str) -> Self {
        if value.eq_ignore_ascii_case("user") {
            Sender::User
        } else {
            Sender::Ai
        }
    }

    pub fn is_user(self) -> bool {
        self == Sender::User
    }
}

impl AsRef<str> for Sender {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// A single transcript entry. Immutable once appended; optimistic entries
/// created locally have no server id and are reconciled implicitly the next
/// time the conversation is fetched.
#[derive(Debug, Clone)]
pub struct Message {
    pub sender: Sender,
    pub raw_content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: Sender, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            sender,
            raw_content: content.into(),
            created_at,
        }
    }

    /// Locally synthesized user message, stamped with the current time.
    pub fn user_now(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content, Utc::now())
    }

    /// Locally synthesized assistant message, stamped with the current time.
    /// Also used for the inline error entries the synchronizer appends when a
    /// send fails.
    pub fn ai_now(content: impl Into<String>) -> Self {
        Self::new(Sender::Ai, content, Utc::now())
    }

    /// Builds a message from the service's wire representation. Timestamps
    /// arrive as RFC 3339 strings; an absent or unparseable timestamp falls
    /// back to the time of receipt.
    pub fn from_wire(sender: &str, content: impl Into<String>, created_at: Option<&str>) -> Self {
        let created_at = created_at
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        Self::new(Sender::from_wire(sender), content, created_at)
    }

    /// Renderable view of the raw content. Derived on every call, never
    /// stored.
    pub fn segments(&self) -> Vec<Segment> {
        segment(&self.raw_content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wire_sender_tags_map_onto_two_parties() {
        assert_eq!(Sender::from_wire("user"), Sender::User);
        assert_eq!(Sender::from_wire("USER"), Sender::User);
        assert_eq!(Sender::from_wire("ai"), Sender::Ai);
        assert_eq!(Sender::from_wire("assistant"), Sender::Ai);
    }

    #[test]
    fn wire_timestamps_are_parsed_as_rfc3339() {
        let msg = Message::from_wire("ai", "hello", Some("2024-05-02T09:30:00Z"));
        let expected = Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap();
        assert_eq!(msg.created_at, expected);
    }

    #[test]
    fn bad_wire_timestamps_fall_back_to_receipt_time() {
        let before = Utc::now();
        let msg = Message::from_wire("ai", "hello", Some("not-a-date"));
        assert!(msg.created_at >= before);
    }
}
