use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::{Server, ServerConfig};
use std::time::Duration;

/// Main-method of the chat relay server.
/// Parses command-line arguments, binds the listener and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
        port: u16,
        /// Maximum number of concurrent connections
        #[clap(short, long, default_value = "64")]
        max_clients: usize,
        /// Disconnect clients silent for this many seconds (0 disables)
        #[clap(short, long, default_value = "0")]
        idle_timeout: u64,
    }

    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        max_clients: args.max_clients,
        idle_timeout: (args.idle_timeout > 0).then(|| Duration::from_secs(args.idle_timeout)),
    };

    let address = format!("{}:{}", args.host, args.port);
    let server = match Server::new(&address, config).await {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    let shutdown = server.shutdown_handle();
    let mut server_handle = tokio::spawn(server.run());

    // Handle shutdown gracefully
    tokio::select! {
        result = &mut server_handle => {
            if let Err(e) = result {
                error!("Server task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.trigger();
            if let Err(e) = server_handle.await {
                error!("Server task panicked: {}", e);
            }
        }
    }

    Ok(())
}
