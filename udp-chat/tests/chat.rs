//! End-to-end chat scenarios: one in-process server and several clients on
//! loopback.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use udp_chat::{
    client::{ChatClient, ClientError, ClientEvent, Command, DISCONNECT_GRACE},
    config::{ClientConfig, ServerConfig, TransportConfig},
    endpoint::Endpoint,
    envelope::Message,
    frame::FrameKind,
    server::{Server, ServerEvent},
    simulator::SimulatorConfig,
    state::DisconnectReason,
    timer::RetryPolicy,
};

const PATIENCE: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

fn fast() -> TransportConfig {
    TransportConfig {
        retry: RetryPolicy::with_interval(Duration::from_millis(50)),
        ..TransportConfig::default()
    }
}

async fn start_server(capacity: usize) -> (SocketAddr, mpsc::UnboundedReceiver<ServerEvent>) {
    let config = ServerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        capacity,
        transport: fast(),
    };
    let mut server = Server::bind(config).await.expect("server bind");
    let addr = server.local_addr();
    let events = server.events();
    tokio::spawn(server.run());
    (addr, events)
}

async fn connect(name: &str, server: SocketAddr) -> ChatClient {
    let mut config = ClientConfig::new(name, server);
    config.bind = "127.0.0.1:0".parse().unwrap();
    config.transport = fast();
    ChatClient::join(config).await.expect("join")
}

async fn next(client: &mut ChatClient) -> ClientEvent {
    timeout(PATIENCE, client.next_event())
        .await
        .expect("no event from server")
        .expect("client failed")
}

async fn is_quiet(client: &mut ChatClient) -> bool {
    timeout(QUIET, client.next_event()).await.is_err()
}

async fn run(client: &mut ChatClient, line: &str) {
    let command = Command::parse(line).expect("valid command");
    client.execute(command).await.expect("execute");
}

fn line(s: &str) -> ClientEvent {
    ClientEvent::Line(s.to_string())
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn message_is_forwarded_with_sender_name() {
    let (server, _events) = start_server(10).await;
    let mut alice = connect("alice", server).await;
    let mut bob = connect("bob", server).await;

    run(&mut alice, "msg 1 bob hello").await;
    assert_eq!(next(&mut bob).await, line("msg: alice: hello"));
    assert!(is_quiet(&mut alice).await);
}

#[tokio::test]
async fn messages_to_one_client_keep_their_order() {
    // The server loses the first DATA frame it sends, so the first forward
    // is still being retransmitted when the second one is ready.
    let endpoint = Endpoint::bind_simulated(
        "127.0.0.1:0".parse().unwrap(),
        fast(),
        SimulatorConfig::drop_first(FrameKind::Data),
    )
    .await
    .unwrap();
    let server = Server::from_endpoint(endpoint, 10);
    let addr = server.local_addr();
    tokio::spawn(server.run());

    let mut alice = connect("alice", addr).await;
    let mut bob = connect("bob", addr).await;
    run(&mut alice, "msg 1 bob first").await;
    run(&mut alice, "msg 1 bob second").await;

    assert_eq!(next(&mut bob).await, line("msg: alice: first"));
    assert_eq!(next(&mut bob).await, line("msg: alice: second"));
}

#[tokio::test]
async fn roster_is_sorted() {
    let (server, _events) = start_server(10).await;
    let mut bob = connect("bob", server).await;
    let mut alice = connect("alice", server).await;

    run(&mut alice, "list").await;
    assert_eq!(next(&mut alice).await, line("list: alice bob"));
    run(&mut bob, "list").await;
    assert_eq!(next(&mut bob).await, line("list: alice bob"));
}

#[tokio::test]
async fn full_server_turns_new_client_away() {
    let (server, mut events) = start_server(1).await;
    let mut alice = connect("alice", server).await;
    let mut bob = connect("bob", server).await;

    assert_eq!(next(&mut bob).await, ClientEvent::Disconnected(DisconnectReason::ServerFull));
    assert!(matches!(
        bob.next_event().await,
        Err(ClientError::Closed(DisconnectReason::ServerFull))
    ));

    run(&mut alice, "list").await;
    assert_eq!(next(&mut alice).await, line("list: alice"));

    let mut lines = Vec::new();
    while let Ok(event) = events.try_recv() {
        lines.push(event.to_string());
    }
    assert!(lines.contains(&"join: alice".to_string()), "{lines:?}");
    assert!(lines.contains(&"disconnected: bob server full".to_string()), "{lines:?}");
}

#[tokio::test]
async fn taken_username_is_refused_and_owner_keeps_it() {
    let (server, _events) = start_server(10).await;
    let mut alice = connect("alice", server).await;
    let mut impostor = connect("alice", server).await;

    assert_eq!(
        next(&mut impostor).await,
        ClientEvent::Disconnected(DisconnectReason::UsernameUnavailable)
    );

    // The impostor's own disconnect must not evict the real alice.
    run(&mut alice, "list").await;
    assert_eq!(next(&mut alice).await, line("list: alice"));
}

#[tokio::test]
async fn unknown_command_gets_error_and_removes_sender() {
    let (server, _events) = start_server(10).await;
    let mut alice = connect("alice", server).await;

    let mut rogue = Endpoint::bind("127.0.0.1:0".parse().unwrap(), fast()).await.unwrap();
    rogue.send(b"join 1 mallory", server).await.unwrap();
    run(&mut alice, "list").await;
    assert_eq!(next(&mut alice).await, line("list: alice mallory"));

    rogue.send(b"shout 2 everyone", server).await.unwrap();
    let reply = timeout(PATIENCE, rogue.recv()).await.unwrap().unwrap();
    assert_eq!(Message::from_payload(&reply.payload), Ok(Message::ErrUnknownMessage));

    run(&mut alice, "list").await;
    assert_eq!(next(&mut alice).await, line("list: alice"));
}

#[tokio::test]
async fn client_leaves_on_server_error() {
    // A stand-in server that rejects whatever the client sends.
    let mut fake = Endpoint::bind("127.0.0.1:0".parse().unwrap(), fast()).await.unwrap();
    let mut alice = connect("alice", fake.local_addr()).await;

    let join = timeout(PATIENCE, fake.recv()).await.unwrap().unwrap();
    assert_eq!(Message::from_payload(&join.payload), Ok(Message::Join { username: "alice".into() }));

    let reply = Message::ErrUnknownMessage.encode();
    let sender = fake.sender();
    tokio::spawn(async move { sender.send(reply.as_bytes(), join.from).await });

    assert_eq!(next(&mut alice).await, ClientEvent::Disconnected(DisconnectReason::UnknownCommand));
    assert_eq!(
        ClientEvent::Disconnected(DisconnectReason::UnknownCommand).render(),
        "disconnected: server received an unknown command"
    );

    let bye = timeout(PATIENCE, fake.recv()).await.unwrap().unwrap();
    assert_eq!(
        Message::from_payload(&bye.payload),
        Ok(Message::Disconnect { username: "alice".into() })
    );
}

#[tokio::test]
async fn server_error_is_reported_before_disconnect_is_acknowledged() {
    let mut fake = Endpoint::bind("127.0.0.1:0".parse().unwrap(), fast()).await.unwrap();
    let mut alice = connect("alice", fake.local_addr()).await;
    let join = timeout(PATIENCE, fake.recv()).await.unwrap().unwrap();

    // Once the error is delivered the stand-in goes away, so alice's own
    // disconnect is never acknowledged.
    let reply = Message::ErrServerFull.encode();
    fake.send(reply.as_bytes(), join.from).await.unwrap();
    drop(fake);

    let event = timeout(DISCONNECT_GRACE / 4, alice.next_event())
        .await
        .expect("disconnect must be reported without waiting for the server")
        .unwrap();
    assert_eq!(event, ClientEvent::Disconnected(DisconnectReason::ServerFull));

    // Commands after a server error end the session without a transport error.
    assert!(matches!(
        alice.execute(Command::List).await,
        Err(ClientError::Closed(DisconnectReason::ServerFull))
    ));
    timeout(DISCONNECT_GRACE + Duration::from_secs(1), alice.shutdown())
        .await
        .expect("shutdown is bounded by the grace period");
}

#[tokio::test]
async fn duplicate_recipient_gets_one_copy() {
    let (server, _events) = start_server(10).await;
    let mut alice = connect("alice", server).await;
    let mut bob = connect("bob", server).await;

    run(&mut alice, "msg 2 bob bob hi twice").await;
    assert_eq!(next(&mut bob).await, line("msg: alice: hi twice"));
    assert!(is_quiet(&mut bob).await);
}

#[tokio::test]
async fn multicast_reaches_every_recipient() {
    let (server, _events) = start_server(10).await;
    let mut alice = connect("alice", server).await;
    let mut bob = connect("bob", server).await;
    let mut carol = connect("carol", server).await;

    run(&mut alice, "msg 2 bob carol lunch?").await;
    assert_eq!(next(&mut bob).await, line("msg: alice: lunch?"));
    assert_eq!(next(&mut carol).await, line("msg: alice: lunch?"));
}

#[tokio::test]
async fn unknown_recipient_is_silent_for_the_sender() {
    let (server, mut events) = start_server(10).await;
    let mut alice = connect("alice", server).await;

    run(&mut alice, "msg 1 nobody anyone there").await;
    assert!(is_quiet(&mut alice).await);

    let mut seen = false;
    while let Ok(event) = events.try_recv() {
        seen |= event.to_string() == "msg: alice to non-existent user nobody";
    }
    assert!(seen);
}

#[tokio::test]
async fn quit_frees_the_username() {
    let (server, _events) = start_server(10).await;
    let mut alice = connect("alice", server).await;
    let mut bob = connect("bob", server).await;

    alice.quit().await.expect("quit");
    assert!(matches!(
        alice.execute(Command::List).await,
        Err(ClientError::Closed(DisconnectReason::Quit))
    ));

    run(&mut bob, "list").await;
    assert_eq!(next(&mut bob).await, line("list: bob"));

    let mut again = connect("alice", server).await;
    run(&mut again, "list").await;
    assert_eq!(next(&mut again).await, line("list: alice bob"));
}

#[tokio::test]
async fn long_message_survives_small_chunks() {
    let (server, _events) = start_server(10).await;
    let mut config = ClientConfig::new("alice", server);
    config.bind = "127.0.0.1:0".parse().unwrap();
    config.transport = TransportConfig { chunk_size: 7, window_size: 2, ..fast() };
    let mut alice = ChatClient::join(config).await.unwrap();
    let mut bob = connect("bob", server).await;

    let text = "a rather long message ".repeat(40);
    run(&mut alice, &format!("msg 1 bob {text}")).await;
    assert_eq!(next(&mut bob).await, ClientEvent::Line(format!("msg: alice: {text}")));
}
