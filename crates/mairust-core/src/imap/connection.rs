//! The per-connection protocol state machine: gates commands by connection
//! state, dispatches to `Session`/`SelectedMailbox`, and drains pending
//! cross-session updates after every command per RFC 3501 §5.2/§5.5.

use std::sync::Arc;

use super::command::{ImapCommand, StatusItem, StoreOperation, TaggedCommand};
use super::credentials::CredentialVerifier;
use super::error::ImapError;
use super::mailbox::MailboxRegistry;
use super::message::MessageSource;
use super::response::ImapResponse;
use super::selected::{PendingUpdate, SelectedMailbox};
use super::session::Session;

/// Which of the four connection states (RFC 3501 §3) this connection is in.
enum ConnState {
    NotAuthenticated,
    Authenticated(Session),
    Selected(Session, Arc<SelectedMailbox>),
}

/// What happened after dispatching one command: the lines to write back,
/// and whether the connection should now close.
pub struct DispatchOutcome {
    pub lines: Vec<String>,
    pub close: bool,
}

impl DispatchOutcome {
    fn ok(lines: Vec<String>) -> Self {
        Self { lines, close: false }
    }

    fn closing(lines: Vec<String>) -> Self {
        Self { lines, close: true }
    }
}

pub struct ConnectionState {
    state: ConnState,
    registry: Arc<MailboxRegistry>,
    credentials: Arc<dyn CredentialVerifier>,
    source: Arc<dyn MessageSource>,
}

impl ConnectionState {
    pub fn new(
        registry: Arc<MailboxRegistry>,
        credentials: Arc<dyn CredentialVerifier>,
        source: Arc<dyn MessageSource>,
    ) -> Self {
        Self {
            state: ConnState::NotAuthenticated,
            registry,
            credentials,
            source,
        }
    }

    pub fn greeting() -> String {
        ImapResponse::greeting()
    }

    /// The shared mailbox state to wait on for a blocking CHECK/IDLE, if a
    /// mailbox is currently selected.
    pub fn selected_mailbox_state(&self) -> Option<Arc<super::mailbox::MailboxState>> {
        self.selected().map(|s| s.mailbox.clone())
    }

    pub fn selected(&self) -> Option<&Arc<SelectedMailbox>> {
        match &self.state {
            ConnState::Selected(_, sel) => Some(sel),
            _ => None,
        }
    }

    /// Drain whatever pending updates have accumulated on the selected
    /// mailbox into untagged response lines, without dispatching a command.
    /// Used by the IDLE wait loop to push updates as they arrive.
    pub fn poll_pending(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.drain_pending(&mut lines, false);
        lines
    }

    fn drain_pending(&self, lines: &mut Vec<String>, suppress_expunge_drain: bool) {
        if let Some(selected) = self.selected().cloned() {
            let drained = selected.poll(|uid| selected.mailbox.get_message(uid).map(|m| m.flags));
            for update in drained {
                match update {
                    PendingUpdate::Exists(n) => lines.push(ImapResponse::exists(n)),
                    PendingUpdate::Recent(n) => lines.push(ImapResponse::recent(n)),
                    PendingUpdate::Expunge(seq) => {
                        if !suppress_expunge_drain {
                            lines.push(ImapResponse::expunge(seq));
                        }
                    }
                    PendingUpdate::Fetch(seq, flags) => {
                        lines.push(ImapResponse::fetch(seq, &[("FLAGS".to_string(), ImapResponse::flags_list(&flags))]));
                    }
                }
            }
        }
    }

    pub fn dispatch(&mut self, cmd: TaggedCommand) -> DispatchOutcome {
        let TaggedCommand { tag, command } = cmd;
        let name = Self::command_name(&command);

        match &command {
            ImapCommand::Capability | ImapCommand::Noop | ImapCommand::Logout => {}
            ImapCommand::Login { .. } => {
                if matches!(self.state, ConnState::Authenticated(_) | ConnState::Selected(..)) {
                    return DispatchOutcome::ok(vec![ImapResponse::bad(
                        &tag,
                        &format!("{name}: Already authenticated."),
                    )]);
                }
            }
            ImapCommand::Check
            | ImapCommand::Fetch { .. }
            | ImapCommand::Search { .. }
            | ImapCommand::Store { .. }
            | ImapCommand::Copy { .. }
            | ImapCommand::Close
            | ImapCommand::Expunge { .. }
            | ImapCommand::Idle => {
                if matches!(self.state, ConnState::NotAuthenticated) {
                    return DispatchOutcome::ok(vec![ImapResponse::bad(
                        &tag,
                        &format!("{name}: Must authenticate first."),
                    )]);
                }
                if matches!(self.state, ConnState::Authenticated(_)) {
                    return DispatchOutcome::ok(vec![ImapResponse::bad(
                        &tag,
                        &format!("{name}: Must select a mailbox first."),
                    )]);
                }
            }
            ImapCommand::Unknown { .. } => {
                return DispatchOutcome::ok(vec![ImapResponse::bad(
                    &tag,
                    &format!("{name}: Not Implemented"),
                )]);
            }
            _ => {
                if matches!(self.state, ConnState::NotAuthenticated) {
                    return DispatchOutcome::ok(vec![ImapResponse::bad(
                        &tag,
                        &format!("{name}: Must authenticate first."),
                    )]);
                }
            }
        }

        let mut lines = Vec::new();
        let mut close = false;
        let mut suppress_expunge_drain = false;

        match command {
            ImapCommand::Capability => {
                lines.push(ImapResponse::capability());
                lines.push(ImapResponse::ok(&tag, "CAPABILITY completed"));
            }
            ImapCommand::Noop => {
                lines.push(ImapResponse::ok(&tag, "NOOP completed"));
            }
            ImapCommand::Logout => {
                lines.push(ImapResponse::bye("Logging out"));
                lines.push(ImapResponse::ok(&tag, "LOGOUT completed"));
                close = true;
            }
            ImapCommand::Login { username, password } => {
                match self.credentials.verify(&username, &password) {
                    Some(user) => {
                        self.state = ConnState::Authenticated(Session::new(user, self.registry.clone()));
                        lines.push(ImapResponse::ok(&tag, "LOGIN completed"));
                    }
                    None => {
                        lines.push(ImapResponse::no(&tag, "LOGIN failed"));
                    }
                }
            }
            ImapCommand::Namespace => {
                lines.push(ImapResponse::namespace());
                lines.push(ImapResponse::ok(&tag, "NAMESPACE completed"));
            }
            ImapCommand::Select { mailbox } | ImapCommand::Examine { mailbox } => {
                let readonly = name == "EXAMINE";
                let session = self.session().clone();
                match session.select_mailbox(&mailbox, readonly) {
                    Ok((selected, view)) => {
                        lines.push(ImapResponse::mailbox_flags(super::message::Flag::permanent_system_flags()));
                        lines.push(ImapResponse::exists(view.exists));
                        lines.push(ImapResponse::recent(view.recent));
                        if let Some(unseen) = view.unseen {
                            lines.push(ImapResponse::unseen(unseen));
                        }
                        lines.push(ImapResponse::uid_validity(view.uid_validity));
                        lines.push(ImapResponse::uid_next(view.uid_next));
                        lines.push(ImapResponse::permanent_flags(if readonly {
                            &[]
                        } else {
                            super::message::Flag::permanent_system_flags()
                        }));
                        let mode = if readonly { "READ-ONLY" } else { "READ-WRITE" };
                        lines.push(ImapResponse::ok(&tag, &format!("[{mode}] completed")));
                        self.state = ConnState::Selected(session, selected);
                    }
                    Err(e) => lines.push(self.render_error_trycreate(&tag, e)),
                }
            }
            ImapCommand::Create { mailbox } => {
                lines.push(self.render_result(&tag, "CREATE completed", self.session().create_mailbox(&mailbox)));
            }
            ImapCommand::Delete { mailbox } => {
                lines.push(self.render_result(&tag, "DELETE completed", self.session().delete_mailbox(&mailbox)));
            }
            ImapCommand::Rename { old_mailbox, new_mailbox } => {
                lines.push(self.render_result(
                    &tag,
                    "RENAME completed",
                    self.session().rename_mailbox(&old_mailbox, &new_mailbox),
                ));
            }
            ImapCommand::Subscribe { mailbox } => {
                lines.push(self.render_result(&tag, "SUBSCRIBE completed", self.session().subscribe_mailbox(&mailbox)));
            }
            ImapCommand::Unsubscribe { mailbox } => {
                lines.push(self.render_result(
                    &tag,
                    "UNSUBSCRIBE completed",
                    self.session().unsubscribe_mailbox(&mailbox),
                ));
            }
            ImapCommand::List { reference, pattern } => {
                for (name, _) in self.session().list_mailboxes(&reference, &pattern) {
                    lines.push(ImapResponse::list(&["\\HasNoChildren"], "/", &name));
                }
                lines.push(ImapResponse::ok(&tag, "LIST completed"));
            }
            ImapCommand::Lsub { reference, pattern } => {
                for (name, subscribed) in self.session().list_mailboxes(&reference, &pattern) {
                    if subscribed {
                        lines.push(ImapResponse::lsub(&["\\HasNoChildren"], "/", &name));
                    }
                }
                lines.push(ImapResponse::ok(&tag, "LSUB completed"));
            }
            ImapCommand::Status { mailbox, items } => match self.session().status(&mailbox, &items) {
                Ok(values) => {
                    let rendered: Vec<(String, u32)> =
                        values.into_iter().map(|(i, v)| (i.as_wire().to_string(), v)).collect();
                    lines.push(ImapResponse::status(&mailbox, &rendered));
                    lines.push(ImapResponse::ok(&tag, "STATUS completed"));
                }
                Err(e) => lines.push(self.render_error(&tag, e)),
            },
            ImapCommand::Append {
                mailbox,
                flags,
                message,
                ..
            } => match self.session().append_messages(&mailbox, flags, message) {
                Ok((uid_validity, uid)) => {
                    lines.push(format!(
                        "{} OK {}completed\r\n",
                        tag,
                        ImapResponse::appenduid(uid_validity, uid) + " "
                    ));
                }
                Err(e) => lines.push(self.render_error_trycreate(&tag, e)),
            },
            ImapCommand::Close => {
                if let ConnState::Selected(session, selected) = std::mem::replace(&mut self.state, ConnState::NotAuthenticated) {
                    let _ = session.expunge_mailbox(&selected, None);
                    self.state = ConnState::Authenticated(session);
                }
                lines.push(ImapResponse::ok(&tag, "CLOSE completed"));
            }
            ImapCommand::Check => {
                let selected = self.selected().unwrap().clone();
                match self.session().check_mailbox(&selected) {
                    Ok(()) => lines.push(ImapResponse::ok(&tag, "CHECK completed")),
                    Err(e) => lines.push(self.render_error(&tag, e)),
                }
            }
            ImapCommand::Expunge { uid_set } => {
                let selected = self.selected().unwrap().clone();
                match self.session().expunge_mailbox(&selected, uid_set.as_ref()) {
                    Ok(removed) => {
                        for (seq, _) in removed {
                            lines.push(ImapResponse::expunge(seq));
                        }
                        lines.push(ImapResponse::ok(&tag, "EXPUNGE completed"));
                        suppress_expunge_drain = true;
                    }
                    Err(e) => lines.push(self.render_error(&tag, e)),
                }
            }
            ImapCommand::Fetch { sequence, items, uid } => {
                let selected = self.selected().unwrap().clone();
                let results = self.session().fetch_messages(&selected, &sequence, &items, uid, self.source.as_ref());
                for r in results {
                    let mut parts: Vec<(String, String)> =
                        vec![("FLAGS".to_string(), ImapResponse::flags_list(&r.flags))];
                    if uid {
                        parts.push(("UID".to_string(), r.uid.to_string()));
                    }
                    if items.iter().any(|i| matches!(i, super::command::FetchItem::InternalDate | super::command::FetchItem::All | super::command::FetchItem::Fast | super::command::FetchItem::Full)) {
                        parts.push(("INTERNALDATE".to_string(), ImapResponse::format_internal_date(&r.internal_date)));
                    }
                    if items.iter().any(|i| matches!(i, super::command::FetchItem::Rfc822Size | super::command::FetchItem::All | super::command::FetchItem::Fast | super::command::FetchItem::Full)) {
                        parts.push(("RFC822.SIZE".to_string(), r.size.to_string()));
                    }
                    if let Some(structure) = &r.body_structure {
                        if items.iter().any(|i| matches!(i, super::command::FetchItem::BodyStructure | super::command::FetchItem::Full)) {
                            parts.push(("BODYSTRUCTURE".to_string(), structure.clone()));
                        }
                    }
                    if let Some(envelope) = &r.envelope {
                        if items.iter().any(|i| matches!(i, super::command::FetchItem::Envelope | super::command::FetchItem::All | super::command::FetchItem::Full)) {
                            parts.push(("ENVELOPE".to_string(), envelope.clone()));
                        }
                    }
                    if let Some(body) = &r.body {
                        let wants_body = items.iter().any(|i| matches!(i, super::command::FetchItem::Body | super::command::FetchItem::BodySection { .. } | super::command::FetchItem::BodyPeek { .. } | super::command::FetchItem::Full));
                        if wants_body {
                            lines.push(ImapResponse::fetch_with_body(r.seq, &parts, "BODY[]", body));
                            continue;
                        }
                    }
                    lines.push(ImapResponse::fetch(r.seq, &parts));
                }
                lines.push(ImapResponse::ok(&tag, "FETCH completed"));
            }
            ImapCommand::Search { criteria, uid } => {
                let selected = self.selected().unwrap().clone();
                let results = self.session().search_mailbox(&selected, &criteria, uid);
                lines.push(ImapResponse::search(&results));
                lines.push(ImapResponse::ok(&tag, "SEARCH completed"));
            }
            ImapCommand::Store { sequence, flags, uid } => {
                let selected = self.selected().unwrap().clone();
                let op = flags.operation;
                let silent = flags.silent;
                match self.session().update_flags(&selected, &sequence, op, flags.flags, uid) {
                    Ok(results) => {
                        if !silent {
                            for r in results {
                                let mut parts = vec![("FLAGS".to_string(), ImapResponse::flags_list(&r.flags))];
                                if uid {
                                    parts.push(("UID".to_string(), r.uid.to_string()));
                                }
                                lines.push(ImapResponse::fetch(r.seq, &parts));
                            }
                        }
                        lines.push(ImapResponse::ok(&tag, "STORE completed"));
                    }
                    Err(e) => lines.push(self.render_error(&tag, e)),
                }
            }
            ImapCommand::Copy { sequence, mailbox, uid } => {
                let selected = self.selected().unwrap().clone();
                match self.session().copy_messages(&selected, &sequence, &mailbox, uid) {
                    Ok(Some((src, dst, dest_uid_validity))) => {
                        let uid_validity = dest_uid_validity;
                        let src_str = Self::format_uid_list(&src);
                        let dst_str = Self::format_uid_list(&dst);
                        lines.push(format!(
                            "{} OK {}completed\r\n",
                            tag,
                            ImapResponse::copyuid(uid_validity, &src_str, &dst_str) + " "
                        ));
                    }
                    Ok(None) => lines.push(ImapResponse::ok(&tag, "COPY completed")),
                    Err(e) => lines.push(self.render_error_trycreate(&tag, e)),
                }
            }
            ImapCommand::Idle => {
                lines.push(ImapResponse::continue_req());
            }
            ImapCommand::Done => {
                lines.push(ImapResponse::ok(&tag, "IDLE terminated"));
            }
            ImapCommand::Unknown { .. } => unreachable!("handled above"),
        }

        // Untagged unsolicited data must precede the tagged completion
        // response (RFC 3501 §7). Every branch above ends by pushing the
        // tagged line last except IDLE, which pushes a continuation
        // request instead (not a completion at all, so draining after it
        // is correct). Pull the tagged line back off, drain, then restore
        // it so the wire order is always: command's own data, then
        // unsolicited drain, then tag.
        let tagged = lines.last().filter(|l| l.starts_with(&format!("{tag} "))).cloned();
        if let Some(tagged) = tagged {
            lines.pop();
            self.drain_pending(&mut lines, suppress_expunge_drain);
            lines.push(tagged);
        } else {
            self.drain_pending(&mut lines, suppress_expunge_drain);
        }

        if close {
            DispatchOutcome::closing(lines)
        } else {
            DispatchOutcome::ok(lines)
        }
    }

    fn format_uid_list(uids: &[u32]) -> String {
        uids.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",")
    }

    fn session(&self) -> &Session {
        match &self.state {
            ConnState::Authenticated(s) => s,
            ConnState::Selected(s, _) => s,
            ConnState::NotAuthenticated => unreachable!("gated above"),
        }
    }

    fn render_result(&self, tag: &str, message: &str, result: Result<(), ImapError>) -> String {
        match result {
            Ok(()) => ImapResponse::ok(tag, message),
            Err(e) => self.render_error(tag, e),
        }
    }

    fn render_error(&self, tag: &str, error: ImapError) -> String {
        self.render_error_coded(tag, error, false)
    }

    /// Like `render_error`, but attaches `[TRYCREATE]` for a missing
    /// mailbox — used by SELECT/EXAMINE, APPEND, and COPY per RFC 3501 §7.1.
    fn render_error_trycreate(&self, tag: &str, error: ImapError) -> String {
        self.render_error_coded(tag, error, true)
    }

    fn render_error_coded(&self, tag: &str, error: ImapError, trycreate: bool) -> String {
        let code = if trycreate {
            error.response_code_with_trycreate()
        } else {
            error.response_code()
        };
        let code = code.map(|c| c.as_wire().to_string()).unwrap_or_default();
        let message = format!("{code}{error}");
        match error.status() {
            "BAD" => ImapResponse::bad(tag, &message),
            _ => ImapResponse::no(tag, &message),
        }
    }

    fn command_name(command: &ImapCommand) -> &'static str {
        match command {
            ImapCommand::Capability => "CAPABILITY",
            ImapCommand::Noop => "NOOP",
            ImapCommand::Logout => "LOGOUT",
            ImapCommand::Login { .. } => "LOGIN",
            ImapCommand::Select { .. } => "SELECT",
            ImapCommand::Examine { .. } => "EXAMINE",
            ImapCommand::Create { .. } => "CREATE",
            ImapCommand::Delete { .. } => "DELETE",
            ImapCommand::Rename { .. } => "RENAME",
            ImapCommand::Subscribe { .. } => "SUBSCRIBE",
            ImapCommand::Unsubscribe { .. } => "UNSUBSCRIBE",
            ImapCommand::List { .. } => "LIST",
            ImapCommand::Lsub { .. } => "LSUB",
            ImapCommand::Status { .. } => "STATUS",
            ImapCommand::Append { .. } => "APPEND",
            ImapCommand::Close => "CLOSE",
            ImapCommand::Check => "CHECK",
            ImapCommand::Fetch { .. } => "FETCH",
            ImapCommand::Search { .. } => "SEARCH",
            ImapCommand::Store { .. } => "STORE",
            ImapCommand::Copy { .. } => "COPY",
            ImapCommand::Expunge { .. } => "EXPUNGE",
            ImapCommand::Idle => "IDLE",
            ImapCommand::Done => "DONE",
            ImapCommand::Namespace => "NAMESPACE",
            ImapCommand::Unknown { command } => {
                let _ = command;
                "COMMAND"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::credentials::DemoCredentials;
    use crate::imap::message::PlainTextSource;

    fn conn() -> ConnectionState {
        ConnectionState::new(
            Arc::new(MailboxRegistry::new()),
            Arc::new(DemoCredentials),
            Arc::new(PlainTextSource),
        )
    }

    fn cmd(tag: &str, command: ImapCommand) -> TaggedCommand {
        TaggedCommand {
            tag: tag.to_string(),
            command,
        }
    }

    #[test]
    fn rejects_select_before_login_with_exact_text() {
        let mut c = conn();
        let out = c.dispatch(cmd("a1", ImapCommand::Select { mailbox: "INBOX".to_string() }));
        assert_eq!(out.lines[0], "a1 BAD SELECT: Must authenticate first.\r\n");
    }

    #[test]
    fn login_then_select_reports_readwrite() {
        let mut c = conn();
        c.dispatch(cmd(
            "a1",
            ImapCommand::Login {
                username: "demouser".to_string(),
                password: "demopass".to_string(),
            },
        ));
        let out = c.dispatch(cmd("a2", ImapCommand::Select { mailbox: "INBOX".to_string() }));
        assert!(out.lines.iter().any(|l| l.contains("READ-WRITE")));
        assert!(out.lines.iter().any(|l| l.starts_with("* 0 EXISTS")));
    }

    #[test]
    fn unknown_command_is_bad_not_implemented() {
        let mut c = conn();
        let out = c.dispatch(cmd("a1", ImapCommand::Unknown { command: "FROB".to_string() }));
        assert_eq!(out.lines[0], "a1 BAD COMMAND: Not Implemented\r\n");
    }

    #[test]
    fn check_after_select_completes_ok() {
        let mut c = conn();
        c.dispatch(cmd(
            "a1",
            ImapCommand::Login {
                username: "demouser".to_string(),
                password: "demopass".to_string(),
            },
        ));
        c.dispatch(cmd("a2", ImapCommand::Select { mailbox: "INBOX".to_string() }));
        let out = c.dispatch(cmd("a3", ImapCommand::Check));
        assert!(out.lines.last().unwrap().starts_with("a3 OK"), "{:?}", out.lines);
    }

    #[test]
    fn logout_sends_bye_and_closes() {
        let mut c = conn();
        let out = c.dispatch(cmd("a1", ImapCommand::Logout));
        assert!(out.close);
        assert!(out.lines[0].starts_with("* BYE"));
    }
}
