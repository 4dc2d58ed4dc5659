//! Chat server: the session state machine on top of an [`Endpoint`].
//!
//! [`SessionMachine`] is pure: it takes a decoded message and the endpoint it
//! came from, updates the [`Directory`] and returns what must be sent and
//! what should be reported.  [`Server`] owns the endpoint and feeds the
//! machine one delivered message at a time.  Outbound messages go into a
//! per-client outbox drained by its own task: a client receives messages in
//! the order the machine produced them, and one unresponsive client never
//! stalls the others.
//!
//! Per username the lifecycle is simply `absent → joined → absent`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::directory::{Directory, JoinError};
use crate::endpoint::{Endpoint, TransportError};
use crate::envelope::Message;
use crate::receiver::Delivery;
use crate::sender::ReliableSender;

/// A message to be reliably delivered to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: SocketAddr,
    pub message: Message,
}

/// Console-level report of something the server did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Joined { name: String },
    JoinRefused { name: String, reason: JoinError },
    ListRequested { by: String },
    MessageFrom { sender: String },
    /// Recipient not in the directory; the sender is not told.
    UnknownRecipient { sender: String, recipient: String },
    Disconnected { name: String },
    UnknownCommand { by: String },
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Joined { name } => write!(f, "join: {name}"),
            ServerEvent::JoinRefused { name, reason } => write!(f, "disconnected: {name} {reason}"),
            ServerEvent::ListRequested { by } => write!(f, "request_users_list: {by}"),
            ServerEvent::MessageFrom { sender } => write!(f, "msg: {sender}"),
            ServerEvent::UnknownRecipient { sender, recipient } => {
                write!(f, "msg: {sender} to non-existent user {recipient}")
            }
            ServerEvent::Disconnected { name } => write!(f, "disconnected: {name}"),
            ServerEvent::UnknownCommand { by } => write!(f, "disconnected: {by} sent unknown command"),
        }
    }
}

/// Everything one inbound message produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub outbound: Vec<Outbound>,
    pub events: Vec<ServerEvent>,
}

impl Outcome {
    fn send(&mut self, to: SocketAddr, message: Message) {
        self.outbound.push(Outbound { to, message });
    }

    fn report(&mut self, event: ServerEvent) {
        self.events.push(event);
    }
}

// ---------------------------------------------------------------------------
// SessionMachine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionMachine {
    directory: Directory,
}

impl SessionMachine {
    pub fn new(capacity: usize) -> Self {
        Self { directory: Directory::new(capacity) }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Apply one message received from `from`.
    pub fn handle(&mut self, from: SocketAddr, message: Message) -> Outcome {
        let mut out = Outcome::default();
        match message {
            Message::Join { username } => self.join(from, username, &mut out),
            Message::RequestUsersList => {
                let users = self.directory.usernames().map(str::to_string).collect();
                out.send(from, Message::ResponseUsersList { users });
                out.report(ServerEvent::ListRequested { by: self.name_or_addr(from) });
            }
            Message::SendMessage { recipients, text } => {
                self.fan_out(from, &recipients, &text, &mut out);
            }
            Message::Disconnect { username } => self.disconnect(from, username, &mut out),
            other => {
                log::warn!("[server] unknown command {:?} from {from}", other.msg_type());
                out.send(from, Message::ErrUnknownMessage);
                let by = self.name_or_addr(from);
                if let Some(name) = self.directory.username_of(from).map(str::to_string) {
                    self.directory.disconnect(&name);
                }
                out.report(ServerEvent::UnknownCommand { by });
            }
        }
        out
    }

    fn join(&mut self, from: SocketAddr, name: String, out: &mut Outcome) {
        match self.directory.join(&name, from) {
            Ok(()) => {
                log::info!("[server] {name} joined from {from} ({}/{})", self.directory.len(), self.directory.capacity());
                out.report(ServerEvent::Joined { name });
            }
            Err(reason) => {
                log::info!("[server] refused join of {name} from {from}: {reason}");
                let reply = match reason {
                    JoinError::ServerFull => Message::ErrServerFull,
                    JoinError::UsernameUnavailable => Message::ErrUsernameUnavailable,
                };
                out.send(from, reply);
                out.report(ServerEvent::JoinRefused { name, reason });
            }
        }
    }

    fn fan_out(&self, from: SocketAddr, recipients: &[String], text: &str, out: &mut Outcome) {
        let Some(sender) = self.directory.username_of(from) else {
            log::warn!("[server] dropping send_message from unjoined endpoint {from}");
            return;
        };
        out.report(ServerEvent::MessageFrom { sender: sender.to_string() });

        let mut seen: HashSet<&str> = HashSet::new();
        for recipient in recipients {
            if !seen.insert(recipient) {
                log::debug!("[server] duplicate recipient {recipient} skipped");
                continue;
            }
            match self.directory.lookup(recipient) {
                Some(to) => out.send(
                    to,
                    Message::ForwardMessage { sender: sender.to_string(), text: text.to_string() },
                ),
                None => out.report(ServerEvent::UnknownRecipient {
                    sender: sender.to_string(),
                    recipient: recipient.clone(),
                }),
            }
        }
    }

    fn disconnect(&mut self, from: SocketAddr, name: String, out: &mut Outcome) {
        match self.directory.lookup(&name) {
            Some(addr) if addr == from => {
                self.directory.disconnect(&name);
                log::info!("[server] {name} disconnected");
            }
            Some(addr) => {
                // Typically a client whose own join was refused for this name.
                log::warn!("[server] {from} asked to disconnect {name}, registered at {addr}; ignored");
                return;
            }
            None => log::debug!("[server] disconnect for absent user {name}"),
        }
        out.report(ServerEvent::Disconnected { name });
    }

    fn name_or_addr(&self, addr: SocketAddr) -> String {
        self.directory
            .username_of(addr)
            .map_or_else(|| addr.to_string(), str::to_string)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The server process loop.
#[derive(Debug)]
pub struct Server {
    endpoint: Endpoint,
    machine: SessionMachine,
    events: Option<mpsc::UnboundedSender<ServerEvent>>,
    outboxes: HashMap<SocketAddr, mpsc::UnboundedSender<Message>>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, TransportError> {
        let endpoint = Endpoint::bind(config.bind, config.transport).await?;
        Ok(Self::from_endpoint(endpoint, config.capacity))
    }

    pub fn from_endpoint(endpoint: Endpoint, capacity: usize) -> Self {
        Self {
            endpoint,
            machine: SessionMachine::new(capacity),
            events: None,
            outboxes: HashMap::new(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Subscribe to console events.  Without a subscriber they are only logged.
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Serve until the transport fails.
    pub async fn run(mut self) -> Result<(), TransportError> {
        log::info!("[server] serving on {}", self.local_addr());
        loop {
            let delivery = match self.endpoint.recv().await {
                Ok(d) => d,
                Err(e) => {
                    log::warn!("[server] stopping: {e}");
                    return Err(e);
                }
            };
            self.handle_delivery(delivery);
        }
    }

    fn handle_delivery(&mut self, delivery: Delivery) {
        let message = match Message::from_payload(&delivery.payload) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("[server] ignoring message from {}: {e}", delivery.from);
                return;
            }
        };
        log::debug!("[server] ← {} from {}", message.msg_type(), delivery.from);

        let outcome = self.machine.handle(delivery.from, message);
        for event in outcome.events {
            log::info!("[server] {event}");
            if let Some(tx) = &self.events {
                let _ = tx.send(event);
            }
        }
        for out in outcome.outbound {
            self.enqueue(out);
        }

        // A departed client's worker finishes what is queued, then exits.
        let directory = self.machine.directory();
        self.outboxes.retain(|addr, _| directory.username_of(*addr).is_some());
    }

    fn enqueue(&mut self, out: Outbound) {
        let Outbound { to, message } = out;
        let message = match self.outboxes.get(&to) {
            Some(tx) => match tx.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };
        let tx = spawn_outbox(self.endpoint.sender(), to);
        if tx.send(message).is_ok() {
            self.outboxes.insert(to, tx);
        }
    }
}

/// Start the task that delivers queued messages to `to` one after another.
fn spawn_outbox(sender: ReliableSender, to: SocketAddr) -> mpsc::UnboundedSender<Message> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = message.encode();
            if let Err(e) = sender.send(text.as_bytes(), to).await {
                log::warn!("[server] giving up on {} to {to}: {e}", message.msg_type());
            }
        }
        log::debug!("[server] outbox for {to} closed");
    });
    tx
}
