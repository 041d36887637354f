use clap::Parser;
use log::info;
use server::{Server, ServerConfig, ServerHandle, ServerHooks};
use shared::sample::SampleMsg;
use shared::{Connection, Message, DEFAULT_PORT};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Refuse new clients once this many are connected
    #[arg(short, long)]
    max_connections: Option<usize>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            max_connections: self.max_connections,
            ..ServerConfig::default()
        }
    }
}

/// Answers pings, relays `MessageAll` to every other client and denies
/// anything else
struct SampleServer;

impl ServerHooks<SampleMsg> for SampleServer {
    fn on_client_connect(&self, conn: &Arc<Connection<SampleMsg>>) -> bool {
        info!("Accepting {:?}", conn.peer_addr());
        true
    }

    fn on_client_validated(&self, server: &ServerHandle<SampleMsg>, conn: &Arc<Connection<SampleMsg>>) {
        server.unicast(conn, Message::new(SampleMsg::ServerAccept));
    }

    fn on_client_disconnect(&self, conn: &Arc<Connection<SampleMsg>>) {
        info!("Removing client [{}]", conn.id());
    }

    fn on_message(&self, server: &ServerHandle<SampleMsg>, conn: &Arc<Connection<SampleMsg>>, msg: Message<SampleMsg>) {
        match msg.kind() {
            SampleMsg::ServerPing => {
                info!("[{}]: Server Ping", conn.id());
                server.unicast(conn, msg);
            }
            SampleMsg::MessageAll => {
                info!("[{}]: Message All", conn.id());
                let mut relay = Message::new(SampleMsg::ServerMessage);
                relay.push(conn.id());
                server.broadcast(&relay, Some(conn));
            }
            other => {
                info!("[{}]: denying {:?}", conn.id(), other);
                server.unicast(conn, Message::new(SampleMsg::ServerDeny));
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let mut server = Server::new(Args::parse().into_config(), SampleServer);
    server.start()?;

    loop {
        server.pump(usize::MAX, true);
    }
}
