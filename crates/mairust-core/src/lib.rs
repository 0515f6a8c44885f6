//! MaiRust Core - IMAP4rev1 server core
//!
//! Provides the connection state machine, selected-mailbox session state,
//! and shared per-mailbox state that back the IMAP server binary.

pub mod imap;

pub use imap::{
    ConnectionState, CredentialVerifier, DemoCredentials, Flag, ImapError, ImapServer, MailboxRegistry, MailboxState,
    MessageSource, PlainTextSource, Session,
};
