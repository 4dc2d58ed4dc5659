//! Application envelope: the text record carried inside one reassembled run.
//!
//! ```text
//!  <msg_type> <format> <fields...> <free text...>
//! ```
//!
//! | msg_type                   | format | fields                                   |
//! |----------------------------|--------|------------------------------------------|
//! | `join`                     | 1      | username                                 |
//! | `request_users_list`       | 2      |                                          |
//! | `send_message`             | N+1    | N, recipient₁ … recipient_N, then text   |
//! | `disconnect`               | 1      | username                                 |
//! | `response_users_list`      | 3      | count, then `count` usernames            |
//! | `forward_message`          | 4      | `1`, sender, then text                   |
//! | `err_unknown_message`      | 2      |                                          |
//! | `err_server_full`          | 2      |                                          |
//! | `err_username_unavailable` | 2      |                                          |
//!
//! Fields are single-space separated tokens; the free text is everything after
//! the last field, verbatim, so it may contain spaces.  A known `msg_type`
//! whose format or fields do not line up is rejected as malformed.  An
//! unrecognised `msg_type` decodes to [`Message::Unknown`] so the server can
//! answer it.

use std::fmt;

use thiserror::Error;

pub const JOIN: &str = "join";
pub const REQUEST_USERS_LIST: &str = "request_users_list";
pub const SEND_MESSAGE: &str = "send_message";
pub const DISCONNECT: &str = "disconnect";
pub const RESPONSE_USERS_LIST: &str = "response_users_list";
pub const FORWARD_MESSAGE: &str = "forward_message";
pub const ERR_UNKNOWN_MESSAGE: &str = "err_unknown_message";
pub const ERR_SERVER_FULL: &str = "err_server_full";
pub const ERR_USERNAME_UNAVAILABLE: &str = "err_username_unavailable";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Join { username: String },
    RequestUsersList,
    SendMessage { recipients: Vec<String>, text: String },
    Disconnect { username: String },
    /// Usernames in the order the server listed them.
    ResponseUsersList { users: Vec<String> },
    ForwardMessage { sender: String, text: String },
    ErrUnknownMessage,
    ErrServerFull,
    ErrUsernameUnavailable,
    /// Any other leading tag.
    Unknown { msg_type: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("empty message")]
    Empty,
    #[error("message is not valid UTF-8")]
    NotUtf8,
    #[error("malformed {msg_type} message: {reason}")]
    Malformed { msg_type: String, reason: &'static str },
}

impl Message {
    pub fn msg_type(&self) -> &str {
        match self {
            Message::Join { .. } => JOIN,
            Message::RequestUsersList => REQUEST_USERS_LIST,
            Message::SendMessage { .. } => SEND_MESSAGE,
            Message::Disconnect { .. } => DISCONNECT,
            Message::ResponseUsersList { .. } => RESPONSE_USERS_LIST,
            Message::ForwardMessage { .. } => FORWARD_MESSAGE,
            Message::ErrUnknownMessage => ERR_UNKNOWN_MESSAGE,
            Message::ErrServerFull => ERR_SERVER_FULL,
            Message::ErrUsernameUnavailable => ERR_USERNAME_UNAVAILABLE,
            Message::Unknown { msg_type } => msg_type.as_str(),
        }
    }

    /// Serialise to the envelope text.
    pub fn encode(&self) -> String {
        let tag = self.msg_type();
        match self {
            Message::Join { username } | Message::Disconnect { username } => {
                format!("{tag} 1 {username}")
            }
            Message::SendMessage { recipients, text } => {
                let mut out = format!("{tag} {} {}", recipients.len() + 1, recipients.len());
                for r in recipients {
                    out.push(' ');
                    out.push_str(r);
                }
                push_text(&mut out, text);
                out
            }
            Message::ResponseUsersList { users } => {
                let mut out = format!("{tag} 3 {}", users.len());
                for u in users {
                    out.push(' ');
                    out.push_str(u);
                }
                out
            }
            Message::ForwardMessage { sender, text } => {
                let mut out = format!("{tag} 4 1 {sender}");
                push_text(&mut out, text);
                out
            }
            Message::RequestUsersList
            | Message::ErrUnknownMessage
            | Message::ErrServerFull
            | Message::ErrUsernameUnavailable
            | Message::Unknown { .. } => format!("{tag} 2"),
        }
    }

    /// Decode a reassembled payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let text = std::str::from_utf8(payload).map_err(|_| EnvelopeError::NotUtf8)?;
        Self::decode(text)
    }

    /// Parse envelope text.
    pub fn decode(text: &str) -> Result<Self, EnvelopeError> {
        let mut cur = Cursor::new(text);
        let tag = cur.token().ok_or(EnvelopeError::Empty)?;

        let message = match tag {
            JOIN | DISCONNECT => {
                expect_format(&mut cur, tag, 1)?;
                let username = cur.token().ok_or_else(|| malformed(tag, "missing username"))?.to_string();
                finish(cur, tag)?;
                if tag == JOIN {
                    Message::Join { username }
                } else {
                    Message::Disconnect { username }
                }
            }
            SEND_MESSAGE => {
                let declared = cur.number().ok_or_else(|| malformed(tag, "missing format"))?;
                let count = cur.number().ok_or_else(|| malformed(tag, "missing recipient count"))?;
                if count.checked_add(1) != Some(declared) {
                    return Err(malformed(tag, "format does not match recipient count"));
                }
                let recipients = (0..count)
                    .map(|_| cur.token().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| malformed(tag, "fewer recipients than declared"))?;
                Message::SendMessage { recipients, text: cur.remainder().to_string() }
            }
            RESPONSE_USERS_LIST => {
                expect_format(&mut cur, tag, 3)?;
                let count = cur.number().ok_or_else(|| malformed(tag, "missing user count"))?;
                let users: Vec<String> =
                    cur.remainder().split_whitespace().map(str::to_string).collect();
                if users.len() != count {
                    return Err(malformed(tag, "user count does not match list"));
                }
                Message::ResponseUsersList { users }
            }
            FORWARD_MESSAGE => {
                expect_format(&mut cur, tag, 4)?;
                cur.number().ok_or_else(|| malformed(tag, "missing sender count"))?;
                let sender = cur.token().ok_or_else(|| malformed(tag, "missing sender"))?.to_string();
                Message::ForwardMessage { sender, text: cur.remainder().to_string() }
            }
            REQUEST_USERS_LIST | ERR_UNKNOWN_MESSAGE | ERR_SERVER_FULL | ERR_USERNAME_UNAVAILABLE => {
                expect_format(&mut cur, tag, 2)?;
                finish(cur, tag)?;
                match tag {
                    REQUEST_USERS_LIST => Message::RequestUsersList,
                    ERR_UNKNOWN_MESSAGE => Message::ErrUnknownMessage,
                    ERR_SERVER_FULL => Message::ErrServerFull,
                    _ => Message::ErrUsernameUnavailable,
                }
            }
            other => Message::Unknown { msg_type: other.to_string() },
        };
        Ok(message)
    }
}

fn malformed(tag: &str, reason: &'static str) -> EnvelopeError {
    EnvelopeError::Malformed { msg_type: tag.to_string(), reason }
}

fn expect_format(cur: &mut Cursor<'_>, tag: &str, expected: usize) -> Result<(), EnvelopeError> {
    match cur.number() {
        Some(declared) if declared == expected => Ok(()),
        Some(_) => Err(malformed(tag, "format does not match fields")),
        None => Err(malformed(tag, "missing format")),
    }
}

/// Fixed-layout messages carry nothing after their last field.
fn finish(cur: Cursor<'_>, tag: &str) -> Result<(), EnvelopeError> {
    if cur.remainder().trim().is_empty() {
        Ok(())
    } else {
        Err(malformed(tag, "unexpected trailing fields"))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn push_text(out: &mut String, text: &str) {
    if !text.is_empty() {
        out.push(' ');
        out.push_str(text);
    }
}

/// Splits off single-space separated tokens, leaving the rest verbatim.
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn token(&mut self) -> Option<&'a str> {
        let s = self.rest.trim_start_matches(' ');
        if s.is_empty() {
            return None;
        }
        let (tok, rest) = s.split_once(' ').unwrap_or((s, ""));
        self.rest = rest;
        Some(tok)
    }

    fn number(&mut self) -> Option<usize> {
        self.token()?.parse().ok()
    }

    fn remainder(self) -> &'a str {
        self.rest
    }
}
