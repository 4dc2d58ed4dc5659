//! Client session lifecycle.
//!
//! ```text
//!            join sent
//!   (start) ───────────▶ ACTIVE ──── user typed `quit` ────▶ CLOSED(Quit)
//!                          │
//!                          ├── err_server_full ───────────▶ CLOSED(ServerFull)
//!                          ├── err_username_unavailable ──▶ CLOSED(UsernameUnavailable)
//!                          ├── err_unknown_message ───────▶ CLOSED(UnknownCommand)
//!                          └── transport failure ─────────▶ CLOSED(TransportFailed)
//! ```
//!
//! A successful join is never acknowledged by the server, so a client is
//! `Active` from the moment its join is handed to the transport.

use std::fmt;

use crate::envelope::Message;

/// Why a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Quit,
    ServerFull,
    UsernameUnavailable,
    /// The server rejected something this client sent and dropped it.
    UnknownCommand,
    TransportFailed,
}

impl DisconnectReason {
    /// The reason carried by a server error message, if `message` is one.
    pub fn from_server(message: &Message) -> Option<Self> {
        match message {
            Message::ErrServerFull => Some(Self::ServerFull),
            Message::ErrUsernameUnavailable => Some(Self::UsernameUnavailable),
            Message::ErrUnknownMessage => Some(Self::UnknownCommand),
            _ => None,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Quit => "quitting",
            Self::ServerFull => "server full",
            Self::UsernameUnavailable => "username not available",
            Self::UnknownCommand => "server received an unknown command",
            Self::TransportFailed => "connection to server lost",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Active,
    Closed(DisconnectReason),
}

impl SessionState {
    pub fn is_active(self) -> bool {
        self == Self::Active
    }

    /// Move to `Closed`.  The first reason wins.
    pub fn close(&mut self, reason: DisconnectReason) -> bool {
        if self.is_active() {
            *self = Self::Closed(reason);
            true
        } else {
            false
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Closed(reason) => write!(f, "closed ({reason})"),
        }
    }
}
