//! Entry point for `udp-chat`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, the console loop).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use udp_chat::client::{ChatClient, ClientError, ClientEvent, Command, Flow};
use udp_chat::config::{
    ClientConfig, ServerConfig, TransportConfig, DEFAULT_CAPACITY, DEFAULT_CHUNK_SIZE,
    DEFAULT_PORT, DEFAULT_WINDOW_SIZE,
};
use udp_chat::server::Server;
use udp_chat::timer::{RetryPolicy, DEFAULT_RETRY_INTERVAL};

/// Text chat over UDP with reliable delivery.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the chat server.
    Server {
        /// Address to bind.
        #[arg(short, long, default_value = "localhost")]
        address: String,
        /// Port to bind.
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Maximum number of joined users.
        #[arg(long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Join a chat server.
    Client {
        /// Username to join as.
        #[arg(short, long)]
        user: String,
        /// Server host name or IP.
        #[arg(short, long, default_value = "localhost")]
        address: String,
        /// Server port.
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[command(flatten)]
        transport: TransportArgs,
    },
}

#[derive(Args)]
struct TransportArgs {
    /// DATA frames allowed in flight (0 = no limit).
    #[arg(short, long, default_value_t = DEFAULT_WINDOW_SIZE)]
    window: usize,
    /// Bytes of message per DATA frame.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Retransmission interval in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_INTERVAL.as_millis() as u64)]
    retry_ms: u64,
    /// Give up after this many retransmissions (default: never).
    #[arg(long)]
    max_retries: Option<u32>,
}

impl TransportArgs {
    fn into_config(self) -> TransportConfig {
        TransportConfig {
            chunk_size: self.chunk_size.max(1),
            retry: RetryPolicy {
                interval: Duration::from_millis(self.retry_ms),
                max_retries: self.max_retries,
            },
            window_size: self.window,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server { address, port, capacity, transport } => {
            let config = ServerConfig {
                bind: resolve(&address, port).await?,
                capacity,
                transport: transport.into_config(),
            };
            run_server(config).await
        }
        Mode::Client { user, address, port, transport } => {
            let mut config = ClientConfig::new(user, resolve(&address, port).await?);
            config.transport = transport.into_config();
            run_client(config).await
        }
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolving {host}:{port}"))?
        .find(SocketAddr::is_ipv4)
        .with_context(|| format!("no IPv4 address for {host}"))
}

async fn run_server(config: ServerConfig) -> Result<()> {
    log::info!("Starting server on {}", config.bind);
    let mut server = Server::bind(config).await.context("binding server socket")?;
    let mut events = server.events();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{event}");
        }
    });
    server.run().await?;
    Ok(())
}

async fn run_client(config: ClientConfig) -> Result<()> {
    if config.username.is_empty() || config.username.contains(char::is_whitespace) {
        bail!("username must be a single non-empty word");
    }
    log::info!("Starting client {} for {}", config.username, config.server);
    let mut client = ChatClient::join(config).await.context("joining server")?;
    client_loop(&mut client).await
}

async fn client_loop(client: &mut ChatClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // EOF on stdin behaves like `quit`.
                    return match client.quit().await {
                        Ok(()) => {
                            println!("quitting");
                            Ok(())
                        }
                        Err(e) => finish(client, e).await,
                    };
                };
                let command = match Command::parse(&line) {
                    Ok(c) => c,
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                };
                match client.execute(command).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Print(text)) => println!("{text}"),
                    Ok(Flow::Exit(text)) => {
                        println!("{text}");
                        return Ok(());
                    }
                    Err(e) => return finish(client, e).await,
                }
            }
            event = client.next_event() => match event {
                Ok(event) => {
                    println!("{}", event.render());
                    if let ClientEvent::Disconnected(_) = event {
                        client.shutdown().await;
                        return Ok(());
                    }
                }
                Err(e) => return finish(client, e).await,
            },
        }
    }
}

/// End the console loop on a client error.  A closed session is a normal
/// exit; a transport failure is not.
async fn finish(client: &mut ChatClient, err: ClientError) -> Result<()> {
    match closing_line(&err) {
        Some(line) => {
            println!("{line}");
            client.shutdown().await;
            Ok(())
        }
        None => Err(err.into()),
    }
}

fn closing_line(err: &ClientError) -> Option<String> {
    match err {
        ClientError::Closed(reason) => Some(ClientEvent::Disconnected(*reason).render()),
        ClientError::Transport(_) => None,
    }
}
