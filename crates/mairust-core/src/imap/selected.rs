//! A single session's view onto a selected mailbox: its own sequence-number
//! mapping, its own `\Recent` overlay, and the queue of updates pending
//! delivery on the next poll.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use super::mailbox::MailboxState;
use super::message::Flag;

/// One fact waiting to be rendered as an untagged response the next time
/// this session polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingEvent {
    Appended(u32),
    Expunged(u32),
    FlagsChanged(u32),
}

/// What a drained poll should be rendered as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingUpdate {
    Exists(u32),
    Recent(u32),
    Expunge(u32),
    Fetch(u32, Vec<String>),
}

pub struct SelectedMailbox {
    pub mailbox: Arc<MailboxState>,
    pub name: String,
    pub readonly: bool,
    order: Mutex<Vec<u32>>,
    recent: Mutex<HashSet<u32>>,
    pending: Mutex<VecDeque<PendingEvent>>,
}

impl SelectedMailbox {
    pub fn new(name: String, mailbox: Arc<MailboxState>, readonly: bool) -> Arc<Self> {
        let order = mailbox.current_uids();
        Arc::new(Self {
            mailbox,
            name,
            readonly,
            order: Mutex::new(order),
            recent: Mutex::new(HashSet::new()),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    pub fn order_snapshot(&self) -> Vec<u32> {
        self.order.lock().unwrap().clone()
    }

    pub fn exists(&self) -> u32 {
        self.order.lock().unwrap().len() as u32
    }

    pub fn seq_of(&self, uid: u32) -> Option<u32> {
        self.order
            .lock()
            .unwrap()
            .iter()
            .position(|u| *u == uid)
            .map(|i| (i + 1) as u32)
    }

    pub fn uid_of(&self, seq: u32) -> Option<u32> {
        self.order.lock().unwrap().get(seq as usize - 1).copied()
    }

    pub fn recent_count(&self) -> u32 {
        self.recent.lock().unwrap().len() as u32
    }

    pub fn is_recent(&self, uid: u32) -> bool {
        self.recent.lock().unwrap().contains(&uid)
    }

    pub fn adopt_recent(&self, uids: HashSet<u32>) {
        self.recent.lock().unwrap().extend(uids);
    }

    pub fn push_event(&self, event: PendingEvent) {
        self.pending.lock().unwrap().push_back(event);
    }

    /// Removes `uid` from this session's sequence-number view, returning
    /// the sequence number it had just before removal.
    pub fn remove_from_order(&self, uid: u32) -> Option<u32> {
        let mut order = self.order.lock().unwrap();
        let pos = order.iter().position(|u| *u == uid)?;
        order.remove(pos);
        self.recent.lock().unwrap().remove(&uid);
        Some((pos + 1) as u32)
    }

    /// Drains every queued event, folding it against this session's own
    /// `order`/`recent` view, and returns the untagged updates to render.
    /// `fetch_flags` renders the current flags for a FETCH line; `silence`
    /// filters out FETCH lines for UIDs whose change this session caused
    /// itself via `.SILENT` STORE (those never reach the pending queue in
    /// the first place, since `set_flags` excludes the actor — this param
    /// exists for callers that want to additionally suppress specific
    /// UIDs, e.g. a second concurrent STORE in flight).
    pub fn poll<F>(&self, fetch_flags: F) -> Vec<PendingUpdate>
    where
        F: Fn(u32) -> Option<BTreeSet<Flag>>,
    {
        let events: Vec<PendingEvent> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain(..).collect()
        };

        let mut updates = Vec::new();
        let mut exists_changed = false;
        let mut recent_changed = false;

        for event in events {
            match event {
                PendingEvent::Appended(uid) => {
                    let mut order = self.order.lock().unwrap();
                    if !order.contains(&uid) {
                        order.push(uid);
                        exists_changed = true;
                        if self.recent.lock().unwrap().contains(&uid) {
                            recent_changed = true;
                        }
                    }
                }
                PendingEvent::Expunged(uid) => {
                    if let Some(seq) = self.remove_from_order(uid) {
                        updates.push(PendingUpdate::Expunge(seq));
                        exists_changed = true;
                    }
                }
                PendingEvent::FlagsChanged(uid) => {
                    if let Some(flags) = fetch_flags(uid) {
                        let mut rendered: Vec<String> = flags.iter().map(Flag::as_wire).collect();
                        if self.is_recent(uid) {
                            rendered.push("\\Recent".to_string());
                        }
                        if let Some(seq) = self.seq_of(uid) {
                            updates.push(PendingUpdate::Fetch(seq, rendered));
                        }
                    }
                }
            }
        }

        if exists_changed {
            updates.insert(0, PendingUpdate::Exists(self.exists()));
        }
        if recent_changed {
            updates.insert(1.min(updates.len()), PendingUpdate::Recent(self.recent_count()));
        }
        updates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::mailbox::MailboxState;

    #[test]
    fn append_grows_order_and_reports_exists() {
        let mailbox = MailboxState::new();
        let sel = SelectedMailbox::new("INBOX".to_string(), mailbox.clone(), false);
        mailbox.register(&sel);
        mailbox.append(b"hi".to_vec(), BTreeSet::new());
        let updates = sel.poll(|_| None);
        assert!(updates.contains(&PendingUpdate::Exists(1)));
        assert!(updates.contains(&PendingUpdate::Recent(1)));
    }

    #[test]
    fn expunge_reports_highest_seq_first_and_shrinks_order() {
        let mailbox = MailboxState::new();
        let sel = SelectedMailbox::new("INBOX".to_string(), mailbox.clone(), false);
        mailbox.register(&sel);
        mailbox.append(b"a".to_vec(), BTreeSet::new());
        mailbox.append(b"b".to_vec(), BTreeSet::new());
        sel.poll(|_| None);
        mailbox.set_flags(&sel, 1, BTreeSet::from([Flag::Deleted])).unwrap();
        let removed = mailbox.expunge(&sel, None);
        assert_eq!(removed, vec![(1, 1)]);
        assert_eq!(sel.exists(), 1);
    }
}
