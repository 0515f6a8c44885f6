//! IMAP Command Parser
//!
//! Parses IMAP4 commands from client input. APPEND's literal body is not
//! parsed here: `try_append_header` recognizes the `{n}`/`{n+}` literal
//! marker and hands the byte count back to the caller, which reads the
//! literal off the wire and finishes building the command.

use super::command::{FetchItem, ImapCommand, SearchCriteria, SequenceSet, StatusItem, StoreFlags, StoreOperation, TaggedCommand};

/// Everything needed to read an APPEND literal and assemble the final
/// command once the bytes have arrived.
#[derive(Debug, Clone)]
pub struct AppendHeader {
    pub tag: String,
    pub mailbox: String,
    pub flags: Vec<String>,
    pub date: Option<String>,
    pub literal_size: usize,
    /// `{n+}` (non-synchronizing, `LITERAL+`) vs `{n}` (needs a `+`
    /// continuation request before the client sends the bytes).
    pub synchronizing: bool,
}

/// IMAP command parser
pub struct ImapParser;

impl ImapParser {
    /// Recognizes an APPEND command line and extracts its literal header,
    /// without attempting to read the literal body itself.
    pub fn try_append_header(line: &str) -> Option<AppendHeader> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(2, ' ');
        let tag = parts.next()?.to_string();
        let rest = parts.next()?.trim();
        let mut rest_parts = rest.splitn(2, ' ');
        if rest_parts.next()?.to_uppercase() != "APPEND" {
            return None;
        }
        let args = rest_parts.next().unwrap_or("").trim();

        let (mailbox, rest) = Self::parse_astring(args)?;
        let mut remaining = rest.trim();

        let mut flags = Vec::new();
        if remaining.starts_with('(') {
            let end = remaining.find(')')?;
            flags = Self::parse_flags_list(&remaining[..=end]);
            remaining = remaining[end + 1..].trim();
        }

        let mut date = None;
        if remaining.starts_with('"') {
            let (date_str, rest) = Self::parse_astring(remaining)?;
            date = Some(date_str);
            remaining = rest.trim();
        }

        let inner = remaining.strip_prefix('{')?.strip_suffix('}')?;
        let (size_str, synchronizing) = match inner.strip_suffix('+') {
            Some(s) => (s, false),
            None => (inner, true),
        };
        let literal_size: usize = size_str.parse().ok()?;

        Some(AppendHeader {
            tag,
            mailbox,
            flags,
            date,
            literal_size,
            synchronizing,
        })
    }

    /// Parse an IMAP command line
    pub fn parse(line: &str) -> Option<TaggedCommand> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let parts: Vec<&str> = line.splitn(2, ' ').collect();
        if parts.is_empty() {
            return None;
        }

        let tag = parts[0].to_string();
        let rest = if parts.len() > 1 { parts[1].trim() } else { "" };

        let command = Self::parse_command(rest)?;

        Some(TaggedCommand { tag, command })
    }

    /// Parse the command portion
    fn parse_command(input: &str) -> Option<ImapCommand> {
        let parts: Vec<&str> = input.splitn(2, ' ').collect();
        let cmd_name = parts[0].to_uppercase();
        let args = if parts.len() > 1 { parts[1] } else { "" };

        match cmd_name.as_str() {
            "CAPABILITY" => Some(ImapCommand::Capability),
            "NOOP" => Some(ImapCommand::Noop),
            "LOGOUT" => Some(ImapCommand::Logout),

            "LOGIN" => Self::parse_login(args),

            "SELECT" => Some(ImapCommand::Select {
                mailbox: Self::parse_mailbox(args),
            }),
            "EXAMINE" => Some(ImapCommand::Examine {
                mailbox: Self::parse_mailbox(args),
            }),
            "CREATE" => Some(ImapCommand::Create {
                mailbox: Self::parse_mailbox(args),
            }),
            "DELETE" => Some(ImapCommand::Delete {
                mailbox: Self::parse_mailbox(args),
            }),
            "RENAME" => Self::parse_rename(args),
            "SUBSCRIBE" => Some(ImapCommand::Subscribe {
                mailbox: Self::parse_mailbox(args),
            }),
            "UNSUBSCRIBE" => Some(ImapCommand::Unsubscribe {
                mailbox: Self::parse_mailbox(args),
            }),
            "LIST" => Self::parse_list(args),
            "LSUB" => Self::parse_lsub(args),
            "STATUS" => Self::parse_status(args),
            "CLOSE" => Some(ImapCommand::Close),

            "CHECK" => Some(ImapCommand::Check),
            "FETCH" => Self::parse_fetch(args, false),
            "SEARCH" => Self::parse_search(args, false),
            "STORE" => Self::parse_store(args, false),
            "COPY" => Self::parse_copy(args, false),
            "EXPUNGE" => Some(ImapCommand::Expunge { uid_set: None }),
            "UID" => Self::parse_uid_command(args),

            "IDLE" => Some(ImapCommand::Idle),
            "DONE" => Some(ImapCommand::Done),
            "NAMESPACE" => Some(ImapCommand::Namespace),

            _ => Some(ImapCommand::Unknown { command: cmd_name }),
        }
    }

    fn parse_login(args: &str) -> Option<ImapCommand> {
        let (username, rest) = Self::parse_astring(args)?;
        let (password, _) = Self::parse_astring(rest.trim())?;
        Some(ImapCommand::Login { username, password })
    }

    fn parse_list(args: &str) -> Option<ImapCommand> {
        let (reference, rest) = Self::parse_astring(args)?;
        let (pattern, _) = Self::parse_astring(rest.trim())?;
        Some(ImapCommand::List { reference, pattern })
    }

    fn parse_lsub(args: &str) -> Option<ImapCommand> {
        let (reference, rest) = Self::parse_astring(args)?;
        let (pattern, _) = Self::parse_astring(rest.trim())?;
        Some(ImapCommand::Lsub { reference, pattern })
    }

    /// STATUS mailbox (item1 item2 ...); an unrecognized item is a parse
    /// failure (the caller renders it as `BAD`), not a silent skip.
    fn parse_status(args: &str) -> Option<ImapCommand> {
        let (mailbox, rest) = Self::parse_astring(args)?;
        let rest = rest.trim();

        let content = rest.strip_prefix('(')?.strip_suffix(')')?;
        let mut items = Vec::new();
        for token in content.split_whitespace() {
            items.push(StatusItem::parse(token)?);
        }

        Some(ImapCommand::Status { mailbox, items })
    }

    fn parse_fetch(args: &str, uid: bool) -> Option<ImapCommand> {
        let parts: Vec<&str> = args.splitn(2, ' ').collect();
        if parts.is_empty() {
            return None;
        }

        let sequence = SequenceSet::parse(parts[0])?;
        let items_str = if parts.len() > 1 { parts[1] } else { "" };
        let items = FetchItem::parse_list(items_str);

        Some(ImapCommand::Fetch { sequence, items, uid })
    }

    fn parse_search(args: &str, uid: bool) -> Option<ImapCommand> {
        let criteria = Self::parse_search_criteria(args)?;
        Some(ImapCommand::Search { criteria, uid })
    }

    fn parse_search_criteria(args: &str) -> Option<SearchCriteria> {
        let args = args.trim();
        if args.is_empty() {
            return Some(SearchCriteria::All);
        }

        let args_upper = args.to_uppercase();

        match args_upper.as_str() {
            "ALL" => return Some(SearchCriteria::All),
            "ANSWERED" => return Some(SearchCriteria::Answered),
            "DELETED" => return Some(SearchCriteria::Deleted),
            "DRAFT" => return Some(SearchCriteria::Draft),
            "FLAGGED" => return Some(SearchCriteria::Flagged),
            "NEW" => return Some(SearchCriteria::New),
            "OLD" => return Some(SearchCriteria::Old),
            "RECENT" => return Some(SearchCriteria::Recent),
            "SEEN" => return Some(SearchCriteria::Seen),
            "UNANSWERED" => return Some(SearchCriteria::Unanswered),
            "UNDELETED" => return Some(SearchCriteria::Undeleted),
            "UNDRAFT" => return Some(SearchCriteria::Undraft),
            "UNFLAGGED" => return Some(SearchCriteria::Unflagged),
            "UNSEEN" => return Some(SearchCriteria::Unseen),
            _ => {}
        }

        let parts: Vec<&str> = args.splitn(2, ' ').collect();
        let key = parts[0].to_uppercase();
        let value = if parts.len() > 1 { parts[1] } else { "" };

        match key.as_str() {
            "BCC" => Some(SearchCriteria::Bcc(Self::parse_astring(value)?.0)),
            "BEFORE" => Some(SearchCriteria::Before(value.to_string())),
            "BODY" => Some(SearchCriteria::Body(Self::parse_astring(value)?.0)),
            "CC" => Some(SearchCriteria::Cc(Self::parse_astring(value)?.0)),
            "FROM" => Some(SearchCriteria::From(Self::parse_astring(value)?.0)),
            "LARGER" => Some(SearchCriteria::Larger(value.parse().ok()?)),
            "ON" => Some(SearchCriteria::On(value.to_string())),
            "SINCE" => Some(SearchCriteria::Since(value.to_string())),
            "SMALLER" => Some(SearchCriteria::Smaller(value.parse().ok()?)),
            "SUBJECT" => Some(SearchCriteria::Subject(Self::parse_astring(value)?.0)),
            "TEXT" => Some(SearchCriteria::Text(Self::parse_astring(value)?.0)),
            "TO" => Some(SearchCriteria::To(Self::parse_astring(value)?.0)),
            "NOT" => Some(SearchCriteria::Not(Box::new(Self::parse_search_criteria(value)?))),
            "UID" => Some(SearchCriteria::Uid(SequenceSet::parse(value)?)),
            _ => {
                if let Some(seq) = SequenceSet::parse(&key) {
                    Some(SearchCriteria::SequenceSet(seq))
                } else {
                    Some(SearchCriteria::All)
                }
            }
        }
    }

    fn parse_uid_command(args: &str) -> Option<ImapCommand> {
        let parts: Vec<&str> = args.splitn(2, ' ').collect();
        if parts.is_empty() {
            return None;
        }

        let subcmd = parts[0].to_uppercase();
        let subargs = if parts.len() > 1 { parts[1] } else { "" };

        match subcmd.as_str() {
            "FETCH" => Self::parse_fetch(subargs, true),
            "SEARCH" => Self::parse_search(subargs, true),
            "STORE" => Self::parse_store(subargs, true),
            "COPY" => Self::parse_copy(subargs, true),
            "EXPUNGE" => {
                let trimmed = subargs.trim();
                let uid_set = if trimmed.is_empty() { None } else { SequenceSet::parse(trimmed) };
                Some(ImapCommand::Expunge { uid_set })
            }
            _ => Some(ImapCommand::Unknown { command: format!("UID {subcmd}") }),
        }
    }

    fn parse_rename(args: &str) -> Option<ImapCommand> {
        let (old_mailbox, rest) = Self::parse_astring(args)?;
        let (new_mailbox, _) = Self::parse_astring(rest.trim())?;
        Some(ImapCommand::Rename { old_mailbox, new_mailbox })
    }

    fn parse_store(args: &str, uid: bool) -> Option<ImapCommand> {
        let parts: Vec<&str> = args.splitn(2, ' ').collect();
        if parts.len() < 2 {
            return None;
        }

        let sequence = SequenceSet::parse(parts[0])?;
        let flags = Self::parse_store_flags(parts[1])?;

        Some(ImapCommand::Store { sequence, flags, uid })
    }

    fn parse_store_flags(args: &str) -> Option<StoreFlags> {
        let args = args.trim();

        let (operation, silent, rest) = if args.to_uppercase().starts_with("+FLAGS.SILENT") {
            (StoreOperation::Add, true, args[13..].trim())
        } else if args.to_uppercase().starts_with("-FLAGS.SILENT") {
            (StoreOperation::Remove, true, args[13..].trim())
        } else if args.to_uppercase().starts_with("FLAGS.SILENT") {
            (StoreOperation::Replace, true, args[12..].trim())
        } else if args.to_uppercase().starts_with("+FLAGS") {
            (StoreOperation::Add, false, args[6..].trim())
        } else if args.to_uppercase().starts_with("-FLAGS") {
            (StoreOperation::Remove, false, args[6..].trim())
        } else if args.to_uppercase().starts_with("FLAGS") {
            (StoreOperation::Replace, false, args[5..].trim())
        } else {
            return None;
        };

        let flags = Self::parse_flags_list(rest);

        Some(StoreFlags { operation, silent, flags })
    }

    fn parse_flags_list(args: &str) -> Vec<String> {
        let args = args.trim();
        let content = if args.starts_with('(') && args.ends_with(')') {
            &args[1..args.len() - 1]
        } else {
            args
        };

        content.split_whitespace().map(|s| s.to_string()).collect()
    }

    fn parse_copy(args: &str, uid: bool) -> Option<ImapCommand> {
        let parts: Vec<&str> = args.splitn(2, ' ').collect();
        if parts.len() < 2 {
            return None;
        }

        let sequence = SequenceSet::parse(parts[0])?;
        let mailbox = Self::parse_mailbox(parts[1]);

        Some(ImapCommand::Copy { sequence, mailbox, uid })
    }

    fn parse_mailbox(s: &str) -> String {
        let s = s.trim();
        if s.starts_with('"') && s.ends_with('"') {
            s[1..s.len() - 1].to_string()
        } else {
            s.to_string()
        }
    }

    /// Parse an astring (atom or quoted string), returning the parsed
    /// string and remaining input.
    fn parse_astring(s: &str) -> Option<(String, &str)> {
        let s = s.trim();

        if s.starts_with('"') {
            let mut result = String::new();
            let mut escaped = false;
            let mut pos = 1;

            for c in s.chars().skip(1) {
                pos += c.len_utf8();
                if escaped {
                    result.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    break;
                } else {
                    result.push(c);
                }
            }

            Some((result, &s[pos..]))
        } else {
            let end = s.find(' ').unwrap_or(s.len());
            Some((s[..end].to_string(), &s[end..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capability() {
        let cmd = ImapParser::parse("A001 CAPABILITY").unwrap();
        assert_eq!(cmd.tag, "A001");
        assert!(matches!(cmd.command, ImapCommand::Capability));
    }

    #[test]
    fn test_parse_login() {
        let cmd = ImapParser::parse("A002 LOGIN user password").unwrap();
        assert_eq!(cmd.tag, "A002");
        if let ImapCommand::Login { username, password } = cmd.command {
            assert_eq!(username, "user");
            assert_eq!(password, "password");
        } else {
            panic!("Expected LOGIN command");
        }
    }

    #[test]
    fn test_parse_login_quoted() {
        let cmd = ImapParser::parse(r#"A002 LOGIN "user@example.com" "pass word""#).unwrap();
        if let ImapCommand::Login { username, password } = cmd.command {
            assert_eq!(username, "user@example.com");
            assert_eq!(password, "pass word");
        } else {
            panic!("Expected LOGIN command");
        }
    }

    #[test]
    fn test_parse_select() {
        let cmd = ImapParser::parse("A003 SELECT INBOX").unwrap();
        if let ImapCommand::Select { mailbox } = cmd.command {
            assert_eq!(mailbox, "INBOX");
        } else {
            panic!("Expected SELECT command");
        }
    }

    #[test]
    fn test_parse_fetch() {
        let cmd = ImapParser::parse("A004 FETCH 1:* (FLAGS UID)").unwrap();
        if let ImapCommand::Fetch { sequence, items, uid } = cmd.command {
            assert!(!uid);
            assert_eq!(sequence.iter(5).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
            assert_eq!(items.len(), 2);
        } else {
            panic!("Expected FETCH command");
        }
    }

    #[test]
    fn test_parse_uid_fetch() {
        let cmd = ImapParser::parse("A005 UID FETCH 1:100 FLAGS").unwrap();
        if let ImapCommand::Fetch { sequence, uid, .. } = cmd.command {
            assert!(uid);
            assert_eq!(sequence.iter(100).len(), 100);
        } else {
            panic!("Expected UID FETCH command");
        }
    }

    #[test]
    fn test_parse_search() {
        let cmd = ImapParser::parse("A006 SEARCH UNSEEN").unwrap();
        if let ImapCommand::Search { criteria, uid } = cmd.command {
            assert!(!uid);
            assert!(matches!(criteria, SearchCriteria::Unseen));
        } else {
            panic!("Expected SEARCH command");
        }
    }

    #[test]
    fn test_parse_list() {
        let cmd = ImapParser::parse(r#"A007 LIST "" "*""#).unwrap();
        if let ImapCommand::List { reference, pattern } = cmd.command {
            assert_eq!(reference, "");
            assert_eq!(pattern, "*");
        } else {
            panic!("Expected LIST command");
        }
    }

    #[test]
    fn test_status_rejects_unknown_item() {
        assert!(ImapParser::parse("A008 STATUS INBOX (BOGUS)").is_none());
        let cmd = ImapParser::parse("A008 STATUS INBOX (MESSAGES UNSEEN)").unwrap();
        if let ImapCommand::Status { items, .. } = cmd.command {
            assert_eq!(items, vec![StatusItem::Messages, StatusItem::Unseen]);
        } else {
            panic!("Expected STATUS command");
        }
    }

    #[test]
    fn test_parse_uid_expunge_with_and_without_set() {
        let cmd = ImapParser::parse("A011 UID EXPUNGE 101:104").unwrap();
        match cmd.command {
            ImapCommand::Expunge { uid_set: Some(set) } => {
                assert_eq!(set.iter(104).collect::<Vec<_>>(), vec![101, 102, 103, 104]);
            }
            other => panic!("expected UID EXPUNGE with a set, got {other:?}"),
        }

        let cmd = ImapParser::parse("A012 EXPUNGE").unwrap();
        assert!(matches!(cmd.command, ImapCommand::Expunge { uid_set: None }));
    }

    #[test]
    fn test_append_header_synchronizing_literal() {
        let header = ImapParser::try_append_header("A009 APPEND INBOX (\\Seen) {5}").unwrap();
        assert_eq!(header.mailbox, "INBOX");
        assert_eq!(header.flags, vec!["\\Seen".to_string()]);
        assert_eq!(header.literal_size, 5);
        assert!(header.synchronizing);
    }

    #[test]
    fn test_append_header_non_synchronizing_literal() {
        let header = ImapParser::try_append_header("A010 APPEND Drafts {12+}").unwrap();
        assert_eq!(header.mailbox, "Drafts");
        assert_eq!(header.literal_size, 12);
        assert!(!header.synchronizing);
    }
}
