//! Chat client: user commands in, user-visible lines out.
//!
//! | typed                         | effect                                      |
//! |-------------------------------|---------------------------------------------|
//! | `msg <n> <user1..n> <text>`   | `send_message` to the server                |
//! | `list`                        | `request_users_list`; roster printed later  |
//! | `help`                        | usage text, no network traffic              |
//! | `quit`                        | `disconnect`, then exit                     |
//! | anything else                 | `incorrect userinput format`                |
//!
//! Server messages arrive through [`ChatClient::next_event`].  Any of the
//! three server error messages ends the session: the client reports the
//! reason at once and sends its own `disconnect` in the background.
//! [`ChatClient::shutdown`] waits for that send to finish.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::endpoint::{Endpoint, TransportError};
use crate::envelope::Message;
use crate::state::{DisconnectReason, SessionState};

/// Upper bound on how long a leaving client waits for its `disconnect`
/// to be acknowledged.
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

pub const USAGE: &str = "\
msg <number_of_users> <username1> <username2> ... <message>
    send <message> to the listed users
list
    show the users currently on the server
help
    show this text
quit
    leave the chat";

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Msg { recipients: Vec<String>, text: String },
    List,
    Help,
    Quit,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("incorrect userinput format")]
    Empty,
    #[error("incorrect userinput format")]
    Format,
}

impl Command {
    /// Parse one line of user input.
    ///
    /// The message text of `msg` is kept verbatim after the separator that
    /// follows the last recipient.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (word, rest) = next_word(line).ok_or(CommandError::Empty)?;
        match word {
            "list" | "help" | "quit" if !rest.trim().is_empty() => Err(CommandError::Format),
            "list" => Ok(Command::List),
            "help" => Ok(Command::Help),
            "quit" => Ok(Command::Quit),
            "msg" => Self::parse_msg(rest),
            _ => Err(CommandError::Format),
        }
    }

    fn parse_msg(rest: &str) -> Result<Self, CommandError> {
        let (count, mut rest) = next_word(rest).ok_or(CommandError::Format)?;
        let count: usize = count.parse().map_err(|_| CommandError::Format)?;
        if count == 0 {
            return Err(CommandError::Format);
        }
        let mut recipients = Vec::with_capacity(count);
        for _ in 0..count {
            let (name, tail) = next_word(rest).ok_or(CommandError::Format)?;
            recipients.push(name.to_string());
            rest = tail;
        }
        Ok(Command::Msg { recipients, text: rest.to_string() })
    }
}

/// First whitespace-delimited word and everything after its single
/// trailing separator.
fn next_word(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.char_indices().find(|(_, c)| c.is_whitespace()) {
        Some((i, c)) => Some((&s[..i], &s[i + c.len_utf8()..])),
        None => Some((s, "")),
    }
}

// ---------------------------------------------------------------------------
// ChatClient
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session closed: {0}")]
    Closed(DisconnectReason),
}

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Line(String),
    Disconnected(DisconnectReason),
}

impl ClientEvent {
    /// The console line for this event.
    pub fn render(&self) -> String {
        match self {
            ClientEvent::Line(line) => line.clone(),
            ClientEvent::Disconnected(reason) => format!("disconnected: {reason}"),
        }
    }
}

/// What the command loop should do after [`ChatClient::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Print(String),
    Exit(String),
}

#[derive(Debug)]
pub struct ChatClient {
    username: String,
    server: SocketAddr,
    endpoint: Endpoint,
    state: SessionState,
    /// The background `disconnect` started when the session closed.
    leaving: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Bind a local endpoint and announce `config.username` to the server.
    ///
    /// Returns once the join has been acknowledged at the transport level.
    /// Admission is silent; a refusal shows up later as a
    /// [`ClientEvent::Disconnected`].
    pub async fn join(config: ClientConfig) -> Result<Self, ClientError> {
        let endpoint = Endpoint::bind(config.bind, config.transport).await?;
        Self::join_with(endpoint, config.username, config.server).await
    }

    /// Like [`ChatClient::join`] over an existing endpoint.
    pub async fn join_with(
        endpoint: Endpoint,
        username: String,
        server: SocketAddr,
    ) -> Result<Self, ClientError> {
        let client = Self { username, server, endpoint, state: SessionState::Active, leaving: None };
        log::info!("[client] {} joining {} from {}", client.username, server, client.local_addr());
        client.send(&Message::Join { username: client.username.clone() }).await?;
        Ok(client)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn execute(&mut self, command: Command) -> Result<Flow, ClientError> {
        self.ensure_active()?;
        match command {
            Command::Msg { recipients, text } => {
                self.send(&Message::SendMessage { recipients, text }).await?;
                Ok(Flow::Continue)
            }
            Command::List => {
                self.send(&Message::RequestUsersList).await?;
                Ok(Flow::Continue)
            }
            Command::Help => Ok(Flow::Print(USAGE.to_string())),
            Command::Quit => {
                self.begin_leave(DisconnectReason::Quit);
                self.shutdown().await;
                Ok(Flow::Exit(DisconnectReason::Quit.to_string()))
            }
        }
    }

    /// Wait for the next thing from the server worth showing.
    ///
    /// Server error messages close the session and yield
    /// [`ClientEvent::Disconnected`] without waiting for our own
    /// `disconnect` to go out; afterwards this returns
    /// [`ClientError::Closed`].
    ///
    /// Cancel safe: the only await is on the endpoint's inbox.
    pub async fn next_event(&mut self) -> Result<ClientEvent, ClientError> {
        loop {
            self.ensure_active()?;
            let delivery = match self.endpoint.recv().await {
                Ok(d) => d,
                Err(e) => {
                    self.state.close(DisconnectReason::TransportFailed);
                    return Err(e.into());
                }
            };
            if delivery.from != self.server {
                log::warn!("[client] ignoring message from {}, not the server", delivery.from);
                continue;
            }
            let message = match Message::from_payload(&delivery.payload) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("[client] ignoring undecodable message: {e}");
                    continue;
                }
            };
            log::debug!("[client] ← {}", message.msg_type());

            match message {
                Message::ForwardMessage { sender, text } => {
                    return Ok(ClientEvent::Line(format!("msg: {sender}: {text}")));
                }
                Message::ResponseUsersList { users } => {
                    return Ok(ClientEvent::Line(format!("list: {}", users.join(" "))));
                }
                other => match DisconnectReason::from_server(&other) {
                    Some(reason) => {
                        self.begin_leave(reason);
                        return Ok(ClientEvent::Disconnected(reason));
                    }
                    None => log::warn!("[client] unexpected {} from server", other.msg_type()),
                },
            }
        }
    }

    /// Leave the chat.  Equivalent to executing [`Command::Quit`].
    pub async fn quit(&mut self) -> Result<(), ClientError> {
        self.ensure_active()?;
        self.begin_leave(DisconnectReason::Quit);
        self.shutdown().await;
        Ok(())
    }

    /// Wait for the `disconnect` started when the session closed, at most
    /// [`DISCONNECT_GRACE`].  Returns at once if none is pending.
    pub async fn shutdown(&mut self) {
        if let Some(leaving) = self.leaving.take() {
            if let Err(e) = leaving.await {
                log::warn!("[client] disconnect task failed: {e}");
            }
        }
    }

    /// Close the session and start sending our own `disconnect`.
    fn begin_leave(&mut self, reason: DisconnectReason) {
        if !self.state.close(reason) {
            return;
        }
        let sender = self.endpoint.sender();
        let server = self.server;
        let bye = Message::Disconnect { username: self.username.clone() }.encode();
        log::debug!("[client] → disconnect ({reason})");
        self.leaving = Some(tokio::spawn(async move {
            match tokio::time::timeout(DISCONNECT_GRACE, sender.send(bye.as_bytes(), server)).await {
                Ok(Ok(())) => log::debug!("[client] disconnect acknowledged"),
                Ok(Err(e)) => log::warn!("[client] disconnect not delivered: {e}"),
                Err(_) => log::warn!("[client] disconnect not acknowledged within {DISCONNECT_GRACE:?}"),
            }
        }));
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        log::debug!("[client] → {}", message.msg_type());
        self.endpoint.send(message.encode().as_bytes(), self.server).await
    }

    fn ensure_active(&self) -> Result<(), ClientError> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Closed(reason) => Err(ClientError::Closed(reason)),
        }
    }
}
