//! Shared, process-wide mailbox state and the registry that owns it.
//!
//! A single `MailboxState` is shared by every session that has the mailbox
//! selected. Its critical sections never hold the lock across an `.await`,
//! so a plain `std::sync::Mutex` is sufficient even though sessions run on
//! different tokio worker threads.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use chrono::Utc;
use tokio::sync::Notify;

use super::message::{Flag, Message};
use super::selected::{PendingEvent, SelectedMailbox};

use crate::imap::error::ImapError;

struct MailboxInner {
    /// Ascending by UID; this is the single authoritative sequence-number
    /// mapping. Per-session views (`SelectedMailbox::order`) lag behind it
    /// until their next poll.
    messages: Vec<Message>,
    next_uid: u32,
    uid_validity: u32,
    /// UIDs that became `\Recent` while no session had this mailbox
    /// selected, waiting to be claimed by the next SELECT/EXAMINE.
    recent_uids: HashSet<u32>,
    subscribed: bool,
}

impl MailboxInner {
    fn fresh() -> Self {
        Self {
            messages: Vec::new(),
            next_uid: 1,
            uid_validity: Utc::now().timestamp() as u32,
            recent_uids: HashSet::new(),
            subscribed: false,
        }
    }
}

/// A read-only snapshot used to render SELECT/EXAMINE/STATUS responses.
#[derive(Debug, Clone)]
pub struct MailboxView {
    pub exists: u32,
    pub recent: u32,
    pub uid_next: u32,
    pub uid_validity: u32,
    pub unseen: Option<u32>,
}

/// State shared by every session with this mailbox selected.
pub struct MailboxState {
    inner: StdMutex<MailboxInner>,
    sessions: StdMutex<Vec<Weak<SelectedMailbox>>>,
    notify: Notify,
}

impl MailboxState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: StdMutex::new(MailboxInner::fresh()),
            sessions: StdMutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    pub fn notify_handle(&self) -> &Notify {
        &self.notify
    }

    fn live_sessions(&self) -> Vec<Arc<SelectedMailbox>> {
        let mut guard = self.sessions.lock().unwrap();
        guard.retain(|w| w.strong_count() > 0);
        guard.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn register(&self, session: &Arc<SelectedMailbox>) {
        self.sessions.lock().unwrap().push(Arc::downgrade(session));
    }

    /// Current ascending UID list, used to initialize a freshly-selected
    /// session's sequence-number view.
    pub fn current_uids(&self) -> Vec<u32> {
        self.inner.lock().unwrap().messages.iter().map(|m| m.uid).collect()
    }

    pub fn snapshot(&self, as_of: &[u32]) -> MailboxView {
        let inner = self.inner.lock().unwrap();
        let recent = as_of.iter().filter(|uid| inner.recent_uids.contains(uid)).count() as u32;
        let unseen = as_of
            .iter()
            .enumerate()
            .find_map(|(i, uid)| {
                inner
                    .messages
                    .iter()
                    .find(|m| m.uid == *uid)
                    .filter(|m| !m.has_flag(&Flag::Seen))
                    .map(|_| (i + 1) as u32)
            });
        MailboxView {
            exists: as_of.len() as u32,
            recent,
            uid_next: inner.next_uid,
            uid_validity: inner.uid_validity,
            unseen,
        }
    }

    pub fn uid_validity(&self) -> u32 {
        self.inner.lock().unwrap().uid_validity
    }

    /// Transfers every ambient (unclaimed) `\Recent` UID to `session`'s own
    /// overlay. Called once, at SELECT/EXAMINE time.
    pub fn claim_ambient_recent(&self, session: &SelectedMailbox) {
        let mut inner = self.inner.lock().unwrap();
        let claimed: HashSet<u32> = inner.recent_uids.drain().collect();
        session.adopt_recent(claimed);
    }

    pub fn get_message(&self, uid: u32) -> Option<Message> {
        self.inner.lock().unwrap().messages.iter().find(|m| m.uid == uid).cloned()
    }

    pub fn messages_snapshot(&self) -> Vec<Message> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().unwrap().subscribed
    }

    pub fn set_subscribed(&self, value: bool) {
        self.inner.lock().unwrap().subscribed = value;
    }

    /// Atomically allocates the next UID and appends the message, then fans
    /// the new message out to every selected session. The first live
    /// session observed (if any) claims the new message as `\Recent`;
    /// otherwise the UID is parked in the ambient `recent_uids` set for the
    /// next SELECT/EXAMINE to claim.
    pub fn append(&self, contents: Vec<u8>, flags: BTreeSet<Flag>) -> u32 {
        let uid = {
            let mut inner = self.inner.lock().unwrap();
            let uid = inner.next_uid;
            inner.next_uid += 1;
            inner.messages.push(Message::new(uid, contents, flags));
            uid
        };

        let sessions = self.live_sessions();
        if let Some((first, rest)) = sessions.split_first() {
            first.adopt_recent(HashSet::from([uid]));
            first.push_event(PendingEvent::Appended(uid));
            for s in rest {
                s.push_event(PendingEvent::Appended(uid));
            }
        } else {
            self.inner.lock().unwrap().recent_uids.insert(uid);
        }
        self.notify.notify_waiters();
        uid
    }

    /// Removes every `\Deleted` message, highest sequence-number first, as
    /// observed through `acting`'s own view. When `uid_set` is given (UID
    /// EXPUNGE, RFC 4315), only `\Deleted` messages whose UID falls in that
    /// set are removed; other `\Deleted` messages are left alone. Fans
    /// `Expunged` out to every *other* live session (the acting session
    /// already knows, since it performed the call and renders its own
    /// EXPUNGE lines synchronously). Returns the `(seq, uid)` pairs removed,
    /// highest-seq first.
    pub fn expunge(&self, acting: &Arc<SelectedMailbox>, uid_set: Option<&super::sequence::SequenceSet>) -> Vec<(u32, u32)> {
        let order = acting.order_snapshot();
        let max_uid = order.last().copied().unwrap_or(0);
        let mut deleted_uids = Vec::new();
        {
            let inner = self.inner.lock().unwrap();
            for uid in &order {
                if let Some(set) = uid_set {
                    if !set.contains(*uid, max_uid) {
                        continue;
                    }
                }
                if let Some(m) = inner.messages.iter().find(|m| m.uid == *uid) {
                    if m.has_flag(&Flag::Deleted) {
                        deleted_uids.push(*uid);
                    }
                }
            }
        }

        let mut removed = Vec::new();
        for uid in deleted_uids.into_iter().rev() {
            let seq = acting.remove_from_order(uid);
            self.inner.lock().unwrap().messages.retain(|m| m.uid != uid);
            self.inner.lock().unwrap().recent_uids.remove(&uid);
            if let Some(seq) = seq {
                removed.push((seq, uid));
            }
            for other in self.live_sessions() {
                if !Arc::ptr_eq(&other, acting) {
                    other.push_event(PendingEvent::Expunged(uid));
                }
            }
        }
        self.notify.notify_waiters();
        removed
    }

    /// Overwrites the flags of `uid` and fans `FlagsChanged` out to every
    /// *other* live session. The acting session renders its own response
    /// synchronously from the returned flag set (unless `.SILENT`).
    pub fn set_flags(
        &self,
        acting: &Arc<SelectedMailbox>,
        uid: u32,
        flags: BTreeSet<Flag>,
    ) -> Result<BTreeSet<Flag>, ImapError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let msg = inner
                .messages
                .iter_mut()
                .find(|m| m.uid == uid)
                .ok_or_else(|| ImapError::MailboxNotFound(format!("uid {uid}")))?;
            msg.flags = flags.clone();
        }
        for other in self.live_sessions() {
            if !Arc::ptr_eq(&other, acting) {
                other.push_event(PendingEvent::FlagsChanged(uid));
            }
        }
        self.notify.notify_waiters();
        Ok(flags)
    }
}

/// Process-wide name -> shared-state map. Creation is explicit: a plain
/// lookup never has the side effect of creating a mailbox.
pub struct MailboxRegistry {
    mailboxes: StdMutex<HashMap<String, Arc<MailboxState>>>,
    delimiter: char,
}

impl MailboxRegistry {
    pub fn new() -> Self {
        let registry = Self {
            mailboxes: StdMutex::new(HashMap::new()),
            delimiter: '/',
        };
        registry.mailboxes.lock().unwrap().insert("INBOX".to_string(), MailboxState::new());
        registry
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn get(&self, name: &str) -> Option<Arc<MailboxState>> {
        self.mailboxes.lock().unwrap().get(name).cloned()
    }

    pub fn create(&self, name: &str) -> Result<(), ImapError> {
        let mut guard = self.mailboxes.lock().unwrap();
        if guard.contains_key(name) {
            return Err(ImapError::MailboxConflict(name.to_string()));
        }
        guard.insert(name.to_string(), MailboxState::new());
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<(), ImapError> {
        if name == "INBOX" {
            return Err(ImapError::MailboxConflict("INBOX cannot be deleted".to_string()));
        }
        let mut guard = self.mailboxes.lock().unwrap();
        if !guard.contains_key(name) {
            return Err(ImapError::MailboxNotFound(name.to_string()));
        }
        let prefix = format!("{name}{}", self.delimiter);
        if guard.keys().any(|k| k.starts_with(&prefix)) {
            return Err(ImapError::MailboxHasChildren(name.to_string()));
        }
        guard.remove(name);
        Ok(())
    }

    /// Renames `before` to `after`. Renaming INBOX moves its messages into
    /// `after` and resets INBOX to a fresh, empty mailbox with a new
    /// `uid_validity` (RFC 3501 §6.3.5).
    pub fn rename(&self, before: &str, after: &str) -> Result<(), ImapError> {
        let mut guard = self.mailboxes.lock().unwrap();
        if !guard.contains_key(before) {
            return Err(ImapError::MailboxNotFound(before.to_string()));
        }
        if guard.contains_key(after) {
            return Err(ImapError::MailboxConflict(after.to_string()));
        }
        if before == "INBOX" {
            let inbox = guard.get(before).unwrap().clone();
            guard.insert(after.to_string(), inbox);
            guard.insert("INBOX".to_string(), MailboxState::new());
        } else {
            let state = guard.remove(before).unwrap();
            guard.insert(after.to_string(), state);
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.mailboxes.lock().unwrap().keys().cloned().collect()
    }
}

impl Default for MailboxRegistry {
    fn default() -> Self {
        Self::new()
    }
}
