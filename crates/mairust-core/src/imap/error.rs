//! IMAP domain errors and their mapping to tagged responses.

use thiserror::Error;

/// Everything that can go wrong while executing a command, independent of
/// how the response gets rendered.
#[derive(Error, Debug, Clone)]
pub enum ImapError {
    #[error("invalid credentials")]
    InvalidAuth,

    #[error("mailbox does not exist: {0}")]
    MailboxNotFound(String),

    #[error("mailbox already exists: {0}")]
    MailboxConflict(String),

    #[error("mailbox has children: {0}")]
    MailboxHasChildren(String),

    #[error("mailbox is read-only")]
    MailboxReadOnly,

    #[error("append failed: {0}")]
    AppendFailure(String),

    #[error("could not parse command: {0}")]
    NotParseable(String),
}

/// A response code to attach to the tagged NO/BAD line, per RFC 3501 §7.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    TryCreate,
    ReadOnly,
}

impl ImapError {
    /// The status word (`NO` or `BAD`) this error maps to.
    pub fn status(&self) -> &'static str {
        match self {
            ImapError::NotParseable(_) => "BAD",
            _ => "NO",
        }
    }

    /// The optional bracketed response code to prepend to the message text.
    /// `MailboxNotFound` only earns `[TRYCREATE]` for commands where RFC
    /// 3501 actually specifies it (SELECT/EXAMINE, APPEND, COPY); callers
    /// for those commands use `response_code_with_trycreate` instead.
    pub fn response_code(&self) -> Option<ResponseCode> {
        match self {
            ImapError::MailboxReadOnly => Some(ResponseCode::ReadOnly),
            _ => None,
        }
    }

    /// Same as `response_code`, but also attaches `[TRYCREATE]` when the
    /// failure was a missing mailbox — for SELECT/EXAMINE, APPEND, and COPY,
    /// where the client can plausibly retry after a CREATE.
    pub fn response_code_with_trycreate(&self) -> Option<ResponseCode> {
        match self {
            ImapError::MailboxNotFound(_) => Some(ResponseCode::TryCreate),
            other => other.response_code(),
        }
    }
}

impl ResponseCode {
    pub fn as_wire(&self) -> &'static str {
        match self {
            ResponseCode::TryCreate => "[TRYCREATE] ",
            ResponseCode::ReadOnly => "[READ-ONLY] ",
        }
    }
}
