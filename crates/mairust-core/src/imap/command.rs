//! IMAP command definitions
//!
//! Defines the IMAP commands supported by this server (read and write operations).

pub use super::sequence::SequenceSet;

/// IMAP command tag (client-provided identifier)
pub type Tag = String;

/// FETCH data items
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// Message flags
    Flags,
    /// Internal date
    InternalDate,
    /// RFC822.SIZE
    Rfc822Size,
    /// Envelope structure
    Envelope,
    /// BODY structure
    BodyStructure,
    /// Full body (UID optional)
    Body,
    /// Body section
    BodySection {
        section: String,
        partial: Option<(u32, u32)>,
    },
    /// BODY.PEEK section (doesn't set \Seen flag)
    BodyPeek {
        section: String,
        partial: Option<(u32, u32)>,
    },
    /// UID
    Uid,
    /// All standard attributes (FLAGS, INTERNALDATE, RFC822.SIZE, ENVELOPE)
    All,
    /// Fast attributes (FLAGS, INTERNALDATE, RFC822.SIZE)
    Fast,
    /// Full attributes (FLAGS, INTERNALDATE, RFC822.SIZE, ENVELOPE, BODY)
    Full,
}

impl FetchItem {
    /// Parse a single fetch item
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_uppercase();
        match s.as_str() {
            "FLAGS" => Some(FetchItem::Flags),
            "INTERNALDATE" => Some(FetchItem::InternalDate),
            "RFC822.SIZE" => Some(FetchItem::Rfc822Size),
            "ENVELOPE" => Some(FetchItem::Envelope),
            "BODYSTRUCTURE" => Some(FetchItem::BodyStructure),
            "BODY" => Some(FetchItem::Body),
            "UID" => Some(FetchItem::Uid),
            "ALL" => Some(FetchItem::All),
            "FAST" => Some(FetchItem::Fast),
            "FULL" => Some(FetchItem::Full),
            _ if s.starts_with("BODY.PEEK[") => {
                let section = s.strip_prefix("BODY.PEEK[")?.strip_suffix(']')?.to_string();
                Some(FetchItem::BodyPeek {
                    section,
                    partial: None,
                })
            }
            _ if s.starts_with("BODY[") => {
                let section = s.strip_prefix("BODY[")?.strip_suffix(']')?.to_string();
                Some(FetchItem::BodySection {
                    section,
                    partial: None,
                })
            }
            _ => None,
        }
    }

    /// Parse fetch items from a parenthesized list or single item
    pub fn parse_list(s: &str) -> Vec<Self> {
        let s = s.trim();

        if !s.starts_with('(') {
            return Self::parse(s).into_iter().collect();
        }

        let content = s
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .unwrap_or(s);

        let mut items = Vec::new();
        let mut current = String::new();
        let mut bracket_depth = 0;

        for c in content.chars() {
            match c {
                '[' => {
                    bracket_depth += 1;
                    current.push(c);
                }
                ']' => {
                    bracket_depth -= 1;
                    current.push(c);
                }
                ' ' if bracket_depth == 0 => {
                    if !current.is_empty() {
                        if let Some(item) = Self::parse(&current) {
                            items.push(item);
                        }
                        current.clear();
                    }
                }
                _ => current.push(c),
            }
        }

        if !current.is_empty() {
            if let Some(item) = Self::parse(&current) {
                items.push(item);
            }
        }

        items
    }
}

/// Search criteria
#[derive(Debug, Clone, PartialEq)]
pub enum SearchCriteria {
    All,
    Answered,
    Bcc(String),
    Before(String),
    Body(String),
    Cc(String),
    Deleted,
    Draft,
    Flagged,
    From(String),
    Header(String, String),
    Larger(u32),
    New,
    Not(Box<SearchCriteria>),
    Old,
    On(String),
    Or(Box<SearchCriteria>, Box<SearchCriteria>),
    Recent,
    Seen,
    Since(String),
    Smaller(u32),
    Subject(String),
    Text(String),
    To(String),
    Uid(SequenceSet),
    Unanswered,
    Undeleted,
    Undraft,
    Unflagged,
    Unseen,
    SequenceSet(SequenceSet),
    And(Vec<SearchCriteria>),
}

/// Store operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Replace,
    Add,
    Remove,
}

/// Store flags specification
#[derive(Debug, Clone)]
pub struct StoreFlags {
    pub operation: StoreOperation,
    pub silent: bool,
    pub flags: Vec<String>,
}

/// The five STATUS data items RFC 3501 actually defines. Anything else is a
/// parse error (`BAD`), not a silently-ignored item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusItem {
    Messages,
    Recent,
    UidNext,
    UidValidity,
    Unseen,
}

impl StatusItem {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "MESSAGES" => Some(StatusItem::Messages),
            "RECENT" => Some(StatusItem::Recent),
            "UIDNEXT" => Some(StatusItem::UidNext),
            "UIDVALIDITY" => Some(StatusItem::UidValidity),
            "UNSEEN" => Some(StatusItem::Unseen),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            StatusItem::Messages => "MESSAGES",
            StatusItem::Recent => "RECENT",
            StatusItem::UidNext => "UIDNEXT",
            StatusItem::UidValidity => "UIDVALIDITY",
            StatusItem::Unseen => "UNSEEN",
        }
    }
}

/// IMAP Command
#[derive(Debug, Clone)]
pub enum ImapCommand {
    // Any state commands
    Capability,
    Noop,
    Logout,

    // Not authenticated state
    Login {
        username: String,
        password: String,
    },

    // Authenticated state
    Select {
        mailbox: String,
    },
    Examine {
        mailbox: String,
    },
    Create {
        mailbox: String,
    },
    Delete {
        mailbox: String,
    },
    Rename {
        old_mailbox: String,
        new_mailbox: String,
    },
    Subscribe {
        mailbox: String,
    },
    Unsubscribe {
        mailbox: String,
    },
    List {
        reference: String,
        pattern: String,
    },
    Lsub {
        reference: String,
        pattern: String,
    },
    Status {
        mailbox: String,
        items: Vec<StatusItem>,
    },
    Append {
        mailbox: String,
        flags: Vec<String>,
        date: Option<String>,
        message: Vec<u8>,
    },
    Close,

    // Selected state
    Check,
    Fetch {
        sequence: SequenceSet,
        items: Vec<FetchItem>,
        uid: bool,
    },
    Search {
        criteria: SearchCriteria,
        uid: bool,
    },
    Store {
        sequence: SequenceSet,
        flags: StoreFlags,
        uid: bool,
    },
    Copy {
        sequence: SequenceSet,
        mailbox: String,
        uid: bool,
    },
    /// `uid_set` is `Some` only for `UID EXPUNGE` (RFC 4315), restricting
    /// which `\Deleted` messages are removed; plain `EXPUNGE` is `None`.
    Expunge {
        uid_set: Option<SequenceSet>,
    },

    // Extensions
    Idle,
    Done,
    Namespace,

    // Unknown command
    Unknown {
        command: String,
    },
}

/// Parsed IMAP command with tag
#[derive(Debug, Clone)]
pub struct TaggedCommand {
    pub tag: Tag,
    pub command: ImapCommand,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_item_parse() {
        assert_eq!(FetchItem::parse("FLAGS"), Some(FetchItem::Flags));
        assert_eq!(FetchItem::parse("UID"), Some(FetchItem::Uid));
        assert_eq!(FetchItem::parse("ALL"), Some(FetchItem::All));
    }

    #[test]
    fn test_fetch_item_list() {
        let items = FetchItem::parse_list("(FLAGS UID RFC822.SIZE)");
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], FetchItem::Flags);
        assert_eq!(items[1], FetchItem::Uid);
        assert_eq!(items[2], FetchItem::Rfc822Size);
    }

    #[test]
    fn test_status_item_rejects_unknown() {
        assert_eq!(StatusItem::parse("MESSAGES"), Some(StatusItem::Messages));
        assert_eq!(StatusItem::parse("BOGUS"), None);
    }
}
