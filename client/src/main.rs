use clap::Parser;
use client::Client;
use log::{info, warn};
use shared::sample::SampleMsg;
use shared::{Message, DEFAULT_PORT};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of pings to send before exiting; runs until the server goes away if omitted
    #[arg(short, long)]
    count: Option<u32>,

    /// Also ask the server to relay a message to every other client each second
    #[arg(short, long)]
    message_all: bool,
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

fn handle(mut msg: Message<SampleMsg>) {
    match msg.kind() {
        SampleMsg::ServerAccept => info!("Server accepted connection"),
        SampleMsg::ServerDeny => warn!("Server denied request"),
        SampleMsg::ServerPing => match msg.try_pop::<u64>() {
            Ok(sent) => {
                let rtt = now_micros().saturating_sub(sent);
                info!("Ping: {:.3} ms", rtt as f64 / 1000.0);
            }
            Err(e) => warn!("Malformed ping reply: {}", e),
        },
        SampleMsg::ServerMessage => match msg.try_pop::<u32>() {
            Ok(sender) => info!("Hello from [{}]", sender),
            Err(e) => warn!("Malformed relay: {}", e),
        },
        SampleMsg::MessageAll => warn!("Unexpected {}", msg),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}:{}", args.host, args.port);
    let mut client = Client::<SampleMsg>::new();
    if !client.connect(&args.host, args.port)? {
        return Err("connection closed during connect".into());
    }

    let mut sent = 0u32;
    while client.is_connected() && args.count.map_or(true, |count| sent < count) {
        let mut ping = Message::new(SampleMsg::ServerPing);
        ping.push(now_micros());
        client.send(ping)?;
        sent += 1;

        if args.message_all {
            client.send(Message::new(SampleMsg::MessageAll))?;
        }

        std::thread::sleep(Duration::from_secs(1));
        while let Some(msg) = client.next_message() {
            handle(msg);
        }
    }

    if !client.is_connected() {
        info!("Server down");
    }
    client.disconnect();
    Ok(())
}
