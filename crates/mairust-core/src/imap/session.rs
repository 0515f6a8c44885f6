//! An authenticated session: the operations available once a user has
//! logged in, independent of which mailbox (if any) is currently selected.

use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;

use super::command::{SearchCriteria, StatusItem};
use super::error::ImapError;
use super::mailbox::{MailboxRegistry, MailboxView};
use super::message::Flag;
use super::selected::SelectedMailbox;
use super::sequence::SequenceSet;

/// One authenticated identity's handle onto the shared mailbox registry.
/// Cheap to clone; holds no mailbox-specific state (that lives in
/// `SelectedMailbox`, owned by the connection).
#[derive(Clone)]
pub struct Session {
    pub user: String,
    registry: Arc<MailboxRegistry>,
}

/// The outcome of a FETCH against one message.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub seq: u32,
    pub uid: u32,
    pub flags: Vec<String>,
    pub size: usize,
    pub internal_date: chrono::DateTime<chrono::Utc>,
    pub body: Option<String>,
    pub body_structure: Option<String>,
    pub envelope: Option<String>,
}

/// The outcome of a STORE against one message, ready to render unless the
/// caller requested `.SILENT`.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub seq: u32,
    pub uid: u32,
    pub flags: Vec<String>,
}

impl Session {
    pub fn new(user: String, registry: Arc<MailboxRegistry>) -> Self {
        Self { user, registry }
    }

    /// Translates an RFC 3501 `list-mailbox` pattern (`*` any run of
    /// characters, `%` any run except the hierarchy delimiter) into an
    /// anchored regex and returns every matching mailbox name along with
    /// its subscription state.
    pub fn list_mailboxes(&self, reference: &str, pattern: &str) -> Vec<(String, bool)> {
        let full_pattern = format!("{reference}{pattern}");
        let delimiter = self.registry.delimiter();
        let regex = Self::wildcard_to_regex(&full_pattern, delimiter);

        let mut names: Vec<String> = self.registry.names();
        names.sort();
        names
            .into_iter()
            .filter(|name| regex.is_match(name))
            .map(|name| {
                let subscribed = self
                    .registry
                    .get(&name)
                    .map(|m| m.is_subscribed())
                    .unwrap_or(false);
                (name, subscribed)
            })
            .collect()
    }

    fn wildcard_to_regex(pattern: &str, delimiter: char) -> Regex {
        let mut out = String::from("^");
        for c in pattern.chars() {
            match c {
                '*' => out.push_str(".*"),
                '%' => {
                    out.push_str(&format!("[^{}]*", regex::escape(&delimiter.to_string())));
                }
                _ => out.push_str(&regex::escape(&c.to_string())),
            }
        }
        out.push('$');
        Regex::new(&out).expect("wildcard translation always yields a valid regex")
    }

    pub fn get_mailbox(&self, name: &str) -> Result<Arc<super::mailbox::MailboxState>, ImapError> {
        self.registry
            .get(name)
            .ok_or_else(|| ImapError::MailboxNotFound(name.to_string()))
    }

    pub fn create_mailbox(&self, name: &str) -> Result<(), ImapError> {
        self.registry.create(name)
    }

    pub fn delete_mailbox(&self, name: &str) -> Result<(), ImapError> {
        self.registry.delete(name)
    }

    pub fn rename_mailbox(&self, before: &str, after: &str) -> Result<(), ImapError> {
        self.registry.rename(before, after)
    }

    pub fn subscribe_mailbox(&self, name: &str) -> Result<(), ImapError> {
        let mailbox = self.get_mailbox(name)?;
        mailbox.set_subscribed(true);
        Ok(())
    }

    pub fn unsubscribe_mailbox(&self, name: &str) -> Result<(), ImapError> {
        let mailbox = self.get_mailbox(name)?;
        mailbox.set_subscribed(false);
        Ok(())
    }

    pub fn status(&self, name: &str, items: &[StatusItem]) -> Result<Vec<(StatusItem, u32)>, ImapError> {
        let mailbox = self.get_mailbox(name)?;
        let uids = mailbox.current_uids();
        let view = mailbox.snapshot(&uids);
        Ok(items
            .iter()
            .map(|item| {
                let value = match item {
                    StatusItem::Messages => view.exists,
                    StatusItem::Recent => view.recent,
                    StatusItem::UidNext => view.uid_next,
                    StatusItem::UidValidity => view.uid_validity,
                    StatusItem::Unseen => view.unseen.unwrap_or(0),
                };
                (*item, value)
            })
            .collect())
    }

    /// Atomic allocate-UID-then-append; returns `(uid_validity, uid)` for
    /// the `APPENDUID` response code. Supplied flags are filtered to
    /// `flags ∩ permanent_flags` before storage, per spec.md §4.6.
    pub fn append_messages(
        &self,
        mailbox_name: &str,
        flags: Vec<String>,
        message: Vec<u8>,
    ) -> Result<(u32, u32), ImapError> {
        let mailbox = self
            .registry
            .get(mailbox_name)
            .ok_or_else(|| ImapError::MailboxNotFound(mailbox_name.to_string()))?;
        let permanent = Flag::permanent_set();
        let flag_set: BTreeSet<Flag> = flags
            .into_iter()
            .map(|f| Flag::parse(&f))
            .filter(|f| permanent.contains(f))
            .collect();
        let uid = mailbox.append(message, flag_set);
        Ok((mailbox.uid_validity(), uid))
    }

    pub fn select_mailbox(&self, name: &str, readonly: bool) -> Result<(Arc<SelectedMailbox>, MailboxView), ImapError> {
        let mailbox = self.get_mailbox(name)?;
        let selected = SelectedMailbox::new(name.to_string(), mailbox.clone(), readonly);
        mailbox.register(&selected);
        mailbox.claim_ambient_recent(&selected);
        let view = mailbox.snapshot(&selected.order_snapshot());
        Ok((selected, view))
    }

    /// Validates that `selected` still names a live mailbox — the registry
    /// entry for `selected.name` must still exist and must still be the same
    /// `MailboxState` this session was selected against (a DELETE followed
    /// by a same-named CREATE is a different incarnation, not the same
    /// mailbox). Fails `MailboxNotFound` otherwise.
    pub fn check_mailbox(&self, selected: &SelectedMailbox) -> Result<(), ImapError> {
        match self.registry.get(&selected.name) {
            Some(current) if Arc::ptr_eq(&current, &selected.mailbox) => Ok(()),
            _ => Err(ImapError::MailboxNotFound(selected.name.clone())),
        }
    }

    pub fn expunge_mailbox(
        &self,
        selected: &Arc<SelectedMailbox>,
        uid_set: Option<&SequenceSet>,
    ) -> Result<Vec<(u32, u32)>, ImapError> {
        if selected.readonly {
            return Err(ImapError::MailboxReadOnly);
        }
        Ok(selected.mailbox.expunge(selected, uid_set))
    }

    /// Resolves a sequence-set (sequence numbers or, if `by_uid`, UIDs) to
    /// `(seq, uid)` pairs present in the session's current view, ascending.
    fn resolve(selected: &SelectedMailbox, set: &SequenceSet, by_uid: bool) -> Vec<(u32, u32)> {
        if by_uid {
            let max_uid = selected.order_snapshot().last().copied().unwrap_or(0);
            set.iter(max_uid)
                .filter_map(|uid| selected.seq_of(uid).map(|seq| (seq, uid)))
                .collect()
        } else {
            let max_seq = selected.exists();
            set.iter(max_seq)
                .filter_map(|seq| selected.uid_of(seq).map(|uid| (seq, uid)))
                .collect()
        }
    }

    pub fn fetch_messages(
        &self,
        selected: &Arc<SelectedMailbox>,
        set: &SequenceSet,
        items: &[super::command::FetchItem],
        by_uid: bool,
        source: &dyn super::message::MessageSource,
    ) -> Vec<FetchedMessage> {
        use super::command::FetchItem;

        Self::resolve(selected, set, by_uid)
            .into_iter()
            .filter_map(|(seq, uid)| {
                let msg = selected.mailbox.get_message(uid)?;
                let rendered = source.render(&msg.contents);

                let wants_body = items.iter().any(|i| {
                    matches!(i, FetchItem::Body | FetchItem::BodySection { .. } | FetchItem::Full)
                });
                let peek_only = !wants_body
                    && items.iter().any(|i| matches!(i, FetchItem::BodyPeek { .. }));

                if wants_body && !peek_only && !msg.has_flag(&Flag::Seen) {
                    let mut flags = msg.flags.clone();
                    flags.insert(Flag::Seen);
                    let _ = selected.mailbox.set_flags(selected, uid, flags);
                }

                let msg = selected.mailbox.get_message(uid)?;
                let mut wire_flags: Vec<String> = msg.flags.iter().map(Flag::as_wire).collect();
                if selected.is_recent(uid) {
                    wire_flags.push("\\Recent".to_string());
                }

                Some(FetchedMessage {
                    seq,
                    uid,
                    flags: wire_flags,
                    size: rendered.size.unwrap_or(msg.contents.len()),
                    internal_date: msg.internal_date,
                    body: rendered.body,
                    body_structure: rendered.body_structure,
                    envelope: rendered.envelope,
                })
            })
            .collect()
    }

    pub fn search_mailbox(
        &self,
        selected: &SelectedMailbox,
        criteria: &SearchCriteria,
        by_uid: bool,
    ) -> Vec<u32> {
        let order = selected.order_snapshot();
        let mut out = Vec::new();
        for (idx, uid) in order.iter().enumerate() {
            let seq = (idx + 1) as u32;
            let Some(msg) = selected.mailbox.get_message(*uid) else {
                continue;
            };
            if Self::matches(criteria, &msg, selected, seq, *uid) {
                out.push(if by_uid { *uid } else { seq });
            }
        }
        out
    }

    fn matches(
        criteria: &SearchCriteria,
        msg: &super::message::Message,
        selected: &SelectedMailbox,
        seq: u32,
        uid: u32,
    ) -> bool {
        let header = |name: &str| Self::header_value(&msg.contents, name);
        match criteria {
            SearchCriteria::All => true,
            SearchCriteria::Answered => msg.has_flag(&Flag::Answered),
            SearchCriteria::Unanswered => !msg.has_flag(&Flag::Answered),
            SearchCriteria::Deleted => msg.has_flag(&Flag::Deleted),
            SearchCriteria::Undeleted => !msg.has_flag(&Flag::Deleted),
            SearchCriteria::Draft => msg.has_flag(&Flag::Draft),
            SearchCriteria::Undraft => !msg.has_flag(&Flag::Draft),
            SearchCriteria::Flagged => msg.has_flag(&Flag::Flagged),
            SearchCriteria::Unflagged => !msg.has_flag(&Flag::Flagged),
            SearchCriteria::Seen => msg.has_flag(&Flag::Seen),
            SearchCriteria::Unseen => !msg.has_flag(&Flag::Seen),
            SearchCriteria::Recent => selected.is_recent(uid),
            SearchCriteria::New => selected.is_recent(uid) && !msg.has_flag(&Flag::Seen),
            SearchCriteria::Old => !selected.is_recent(uid),
            SearchCriteria::Larger(n) => msg.contents.len() as u32 > *n,
            SearchCriteria::Smaller(n) => (msg.contents.len() as u32) < *n,
            SearchCriteria::From(s) => header("From").map(|h| h.contains(s)).unwrap_or(false),
            SearchCriteria::To(s) => header("To").map(|h| h.contains(s)).unwrap_or(false),
            SearchCriteria::Cc(s) => header("Cc").map(|h| h.contains(s)).unwrap_or(false),
            SearchCriteria::Bcc(s) => header("Bcc").map(|h| h.contains(s)).unwrap_or(false),
            SearchCriteria::Subject(s) => header("Subject").map(|h| h.contains(s)).unwrap_or(false),
            SearchCriteria::Header(name, s) => header(name).map(|h| h.contains(s)).unwrap_or(false),
            SearchCriteria::Body(s) | SearchCriteria::Text(s) => {
                String::from_utf8_lossy(&msg.contents).contains(s.as_str())
            }
            SearchCriteria::Before(d) => {
                Self::parse_search_date(d).map(|d| msg.internal_date.date_naive() < d).unwrap_or(false)
            }
            SearchCriteria::On(d) => {
                Self::parse_search_date(d).map(|d| msg.internal_date.date_naive() == d).unwrap_or(false)
            }
            SearchCriteria::Since(d) => {
                Self::parse_search_date(d).map(|d| msg.internal_date.date_naive() >= d).unwrap_or(false)
            }
            SearchCriteria::Uid(set) => set.contains(uid, uid),
            SearchCriteria::SequenceSet(set) => set.contains(seq, seq),
            SearchCriteria::Not(inner) => !Self::matches(inner, msg, selected, seq, uid),
            SearchCriteria::Or(a, b) => {
                Self::matches(a, msg, selected, seq, uid) || Self::matches(b, msg, selected, seq, uid)
            }
            SearchCriteria::And(all) => all.iter().all(|c| Self::matches(c, msg, selected, seq, uid)),
        }
    }

    /// Parses an RFC 3501 `date` search key (`dd-Mon-yyyy`, e.g.
    /// `01-Jan-2026`) for BEFORE/ON/SINCE. Unparseable dates never match,
    /// rather than panicking or defaulting to true.
    fn parse_search_date(s: &str) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::parse_from_str(s, "%d-%b-%Y").ok()
    }

    fn header_value(contents: &[u8], name: &str) -> Option<String> {
        let text = String::from_utf8_lossy(contents);
        let prefix = format!("{name}:");
        text.lines()
            .take_while(|l| !l.is_empty())
            .find(|l| l.to_lowercase().starts_with(&prefix.to_lowercase()))
            .map(|l| l[prefix.len()..].trim().to_string())
    }

    pub fn update_flags(
        &self,
        selected: &Arc<SelectedMailbox>,
        set: &SequenceSet,
        operation: super::command::StoreOperation,
        flags: Vec<String>,
        by_uid: bool,
    ) -> Result<Vec<StoredMessage>, ImapError> {
        use super::command::StoreOperation;

        if selected.readonly {
            return Err(ImapError::MailboxReadOnly);
        }

        let permanent = Flag::permanent_set();
        let requested: BTreeSet<Flag> = flags
            .into_iter()
            .map(|f| Flag::parse(&f))
            .filter(|f| permanent.contains(f))
            .collect();
        let mut out = Vec::new();
        for (seq, uid) in Self::resolve(selected, set, by_uid) {
            let Some(msg) = selected.mailbox.get_message(uid) else {
                continue;
            };
            let new_flags = match operation {
                StoreOperation::Replace => requested.clone(),
                StoreOperation::Add => msg.flags.union(&requested).cloned().collect(),
                StoreOperation::Remove => msg.flags.difference(&requested).cloned().collect(),
            };
            let applied = selected.mailbox.set_flags(selected, uid, new_flags)?;
            let mut wire: Vec<String> = applied.iter().map(Flag::as_wire).collect();
            if selected.is_recent(uid) {
                wire.push("\\Recent".to_string());
            }
            out.push(StoredMessage { seq, uid, flags: wire });
        }
        Ok(out)
    }

    /// Copies the resolved messages into `dest`, preserving flags.
    /// Returns `(source_uids, dest_uids, dest_uid_validity)` for the
    /// `COPYUID` response code — the validity token is `dest`'s, not the
    /// source mailbox's, per spec.md §4.6/§8 scenario 3 — or `None` when
    /// the resolved set was empty (no `COPYUID` is sent).
    pub fn copy_messages(
        &self,
        selected: &SelectedMailbox,
        set: &SequenceSet,
        dest_name: &str,
        by_uid: bool,
    ) -> Result<Option<(Vec<u32>, Vec<u32>, u32)>, ImapError> {
        let dest = self
            .registry
            .get(dest_name)
            .ok_or_else(|| ImapError::MailboxNotFound(dest_name.to_string()))?;

        let resolved = Self::resolve(selected, set, by_uid);
        if resolved.is_empty() {
            return Ok(None);
        }

        let mut source_uids = Vec::new();
        let mut dest_uids = Vec::new();
        for (_, uid) in resolved {
            let Some(msg) = selected.mailbox.get_message(uid) else {
                continue;
            };
            let new_uid = dest.append(msg.contents.clone(), msg.flags.clone());
            source_uids.push(uid);
            dest_uids.push(new_uid);
        }

        if source_uids.is_empty() {
            Ok(None)
        } else {
            Ok(Some((source_uids, dest_uids, dest.uid_validity())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::mailbox::MailboxRegistry;

    fn session() -> Session {
        Session::new("demouser".to_string(), Arc::new(MailboxRegistry::new()))
    }

    #[test]
    fn list_mailboxes_honors_star_and_percent_wildcards() {
        let session = session();
        session.create_mailbox("Archive").unwrap();
        session.create_mailbox("Archive/2024").unwrap();
        session.create_mailbox("Drafts").unwrap();

        let all = session.list_mailboxes("", "*");
        assert_eq!(all.len(), 4); // INBOX, Archive, Archive/2024, Drafts

        let top_level = session.list_mailboxes("", "%");
        let names: Vec<_> = top_level.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"Archive"));
        assert!(!names.contains(&"Archive/2024"));
    }

    #[test]
    fn check_mailbox_fails_once_the_selected_name_is_deleted_and_recreated() {
        let session = session();
        session.create_mailbox("Drafts").unwrap();
        let (selected, _) = session.select_mailbox("Drafts", false).unwrap();
        assert!(session.check_mailbox(&selected).is_ok());

        session.delete_mailbox("Drafts").unwrap();
        session.create_mailbox("Drafts").unwrap();
        assert!(matches!(
            session.check_mailbox(&selected),
            Err(ImapError::MailboxNotFound(_))
        ));
    }

    #[test]
    fn append_then_select_sees_one_existing_recent_message() {
        let session = session();
        session.append_messages("INBOX", vec![], b"hello".to_vec()).unwrap();
        let (selected, view) = session.select_mailbox("INBOX", false).unwrap();
        assert_eq!(view.exists, 1);
        assert_eq!(view.recent, 1);
        assert!(selected.is_recent(1));
    }

    #[test]
    fn search_unseen_excludes_flagged_seen_messages() {
        let session = session();
        session.append_messages("INBOX", vec![], b"a".to_vec()).unwrap();
        session
            .append_messages("INBOX", vec!["\\Seen".to_string()], b"b".to_vec())
            .unwrap();
        let (selected, _) = session.select_mailbox("INBOX", false).unwrap();
        let uids = session.search_mailbox(&selected, &SearchCriteria::Unseen, true);
        assert_eq!(uids, vec![1]);
    }

    #[test]
    fn search_date_keys_compare_against_internal_date() {
        let session = session();
        session.append_messages("INBOX", vec![], b"a".to_vec()).unwrap();
        let (selected, _) = session.select_mailbox("INBOX", false).unwrap();

        let today = chrono::Utc::now().date_naive();
        let yesterday = today - chrono::Duration::days(1);
        let tomorrow = today + chrono::Duration::days(1);
        let fmt = |d: chrono::NaiveDate| d.format("%d-%b-%Y").to_string();

        assert_eq!(
            session.search_mailbox(&selected, &SearchCriteria::On(fmt(today)), true),
            vec![1]
        );
        assert_eq!(
            session.search_mailbox(&selected, &SearchCriteria::On(fmt(yesterday)), true),
            Vec::<u32>::new()
        );
        assert_eq!(
            session.search_mailbox(&selected, &SearchCriteria::Before(fmt(tomorrow)), true),
            vec![1]
        );
        assert_eq!(
            session.search_mailbox(&selected, &SearchCriteria::Before(fmt(today)), true),
            Vec::<u32>::new()
        );
        assert_eq!(
            session.search_mailbox(&selected, &SearchCriteria::Since(fmt(today)), true),
            vec![1]
        );
        assert_eq!(
            session.search_mailbox(&selected, &SearchCriteria::Since(fmt(tomorrow)), true),
            Vec::<u32>::new()
        );
    }
}
