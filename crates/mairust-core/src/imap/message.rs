//! Message and flag model shared by every mailbox.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// An IMAP flag. `Recent` is deliberately absent: recency is derived from
/// session overlay membership, never stored on the message itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Keyword(String),
}

impl Flag {
    /// Parse a flag token as it appears on the wire (`\Seen`, `$Label`, ...).
    pub fn parse(s: &str) -> Self {
        match s {
            "\\Seen" => Flag::Seen,
            "\\Answered" => Flag::Answered,
            "\\Flagged" => Flag::Flagged,
            "\\Deleted" => Flag::Deleted,
            "\\Draft" => Flag::Draft,
            other => Flag::Keyword(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> String {
        match self {
            Flag::Seen => "\\Seen".to_string(),
            Flag::Answered => "\\Answered".to_string(),
            Flag::Flagged => "\\Flagged".to_string(),
            Flag::Deleted => "\\Deleted".to_string(),
            Flag::Draft => "\\Draft".to_string(),
            Flag::Keyword(k) => k.clone(),
        }
    }

    /// The system flags every mailbox permits, independent of keywords seen
    /// so far. `\Recent` is intentionally not settable via STORE.
    pub fn permanent_system_flags() -> &'static [&'static str] {
        &["\\Seen", "\\Answered", "\\Flagged", "\\Deleted", "\\Draft"]
    }

    /// `permanent_system_flags()` parsed into `Flag` values, for
    /// intersecting client-supplied flags on APPEND/STORE against what the
    /// server actually persists (PERMANENTFLAGS advertises only these).
    pub fn permanent_set() -> BTreeSet<Flag> {
        Self::permanent_system_flags().iter().map(|s| Flag::parse(s)).collect()
    }
}

/// A stored message: its opaque content bytes, its persistent flags, and the
/// UID assigned atomically when it was appended.
#[derive(Debug, Clone)]
pub struct Message {
    pub uid: u32,
    pub internal_date: DateTime<Utc>,
    pub flags: BTreeSet<Flag>,
    pub contents: Vec<u8>,
}

impl Message {
    pub fn new(uid: u32, contents: Vec<u8>, flags: BTreeSet<Flag>) -> Self {
        Self {
            uid,
            internal_date: Utc::now(),
            flags,
            contents,
        }
    }

    pub fn has_flag(&self, flag: &Flag) -> bool {
        self.flags.contains(flag)
    }
}

/// The sections of a FETCH response a `MessageSource` must be able to
/// produce, already rendered as wire-ready fragments.
#[derive(Debug, Clone, Default)]
pub struct FetchedSection {
    pub body: Option<String>,
    pub size: Option<usize>,
    pub body_structure: Option<String>,
    pub envelope: Option<String>,
}

/// Renders the opaque message body for the FETCH attributes that need it.
/// A pluggable collaborator: mailbox/session logic never looks inside
/// `Message::contents` itself.
pub trait MessageSource: Send + Sync {
    fn render(&self, contents: &[u8]) -> FetchedSection;
}

/// Treats stored bytes as the complete RFC 5322 message and serves a
/// single-part BODYSTRUCTURE; the demo backend.
#[derive(Debug, Default)]
pub struct PlainTextSource;

impl MessageSource for PlainTextSource {
    fn render(&self, contents: &[u8]) -> FetchedSection {
        let text = String::from_utf8_lossy(contents).to_string();
        let lines = text.lines().count().max(1) as u32;
        let envelope = super::response::ImapResponse::format_envelope(
            Self::header(&text, "Date").as_deref(),
            Self::header(&text, "Subject").as_deref(),
            Self::header(&text, "From").as_deref(),
            Self::header(&text, "To").as_deref(),
            Self::header(&text, "Cc").as_deref(),
            Self::header(&text, "Message-Id").as_deref(),
        );
        FetchedSection {
            body: Some(text),
            size: Some(contents.len()),
            body_structure: Some(format!(
                "(\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\") NIL NIL \"7BIT\" {} {} NIL NIL NIL NIL)",
                contents.len(),
                lines
            )),
            envelope: Some(envelope),
        }
    }
}

impl PlainTextSource {
    /// Reads a single header's value out of the opaque RFC 5322 header
    /// block (everything before the first blank line).
    fn header(text: &str, name: &str) -> Option<String> {
        let prefix = format!("{name}:");
        text.lines()
            .take_while(|l| !l.is_empty())
            .find(|l| l.to_lowercase().starts_with(&prefix.to_lowercase()))
            .map(|l| l[prefix.len()..].trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_system_and_keyword_flags() {
        assert_eq!(Flag::parse("\\Seen"), Flag::Seen);
        assert_eq!(Flag::parse("\\Deleted"), Flag::Deleted);
        assert_eq!(Flag::parse("$Important"), Flag::Keyword("$Important".to_string()));
    }

    #[test]
    fn round_trips_wire_form() {
        assert_eq!(Flag::Seen.as_wire(), "\\Seen");
        assert_eq!(Flag::Keyword("Foo".into()).as_wire(), "Foo");
    }

    #[test]
    fn permanent_set_excludes_keywords() {
        let permanent = Flag::permanent_set();
        assert!(permanent.contains(&Flag::Deleted));
        assert!(!permanent.contains(&Flag::Keyword("$Label".to_string())));
    }

    #[test]
    fn plain_text_source_renders_size_and_body() {
        let source = PlainTextSource;
        let out = source.render(b"Subject: hi\r\n\r\nbody\r\n");
        assert_eq!(out.size, Some(22));
        assert!(out.body.unwrap().contains("body"));
    }

    #[test]
    fn plain_text_source_renders_envelope_subject() {
        let source = PlainTextSource;
        let out = source.render(b"Subject: hello world\r\nFrom: a@example.com\r\n\r\nbody\r\n");
        let envelope = out.envelope.unwrap();
        assert!(envelope.contains("hello world"));
        assert!(envelope.contains("example.com"));
    }
}
