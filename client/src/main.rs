use clap::Parser;
use client::{ChatClient, ChatDisplay, ClientConfig, TerminalDisplay};
use env_logger::Env;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Nickname to announce (defaults to this machine's address)
    #[arg(short, long)]
    name: Option<String>,

    /// Seconds to wait between reconnection attempts
    #[arg(short, long, default_value = "5")]
    reconnect_delay: u64,

    /// Seconds a single send may stall before the connection is dropped
    #[arg(short, long, default_value = "5")]
    send_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they stay out of the chat on stdout
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    let config = ClientConfig {
        host: args.host,
        port: args.port,
        name: args.name,
        reconnect_delay: Duration::from_secs(args.reconnect_delay),
        send_timeout: Duration::from_secs(args.send_timeout),
    };

    info!("Connecting to: {}", config.server_addr());

    let display: Arc<dyn ChatDisplay> = Arc::new(TerminalDisplay::new());
    let client = match ChatClient::connect(config, Arc::clone(&display)).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to server: {}", e);
            return Err(e.into());
        }
    };

    display.on_system_notice("Type a message and press Enter. /quit exits.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if line.trim() == "/quit" {
            break;
        }

        match client.send_chat(&line).await {
            Ok(()) => display.on_chat_message("You", &line),
            Err(e) => display.on_system_notice(&format!("Failed to send message: {}", e)),
        }
    }

    client.close().await;
    Ok(())
}
