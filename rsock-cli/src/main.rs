//! rsock-cli - Command-line client for rsock servers
//!
//! Sends one request-response or request-stream interaction and prints the
//! responses.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use rsock_client::{Client, ConnectionConfig, TcpClientConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rsock-cli")]
#[command(about = "Command-line client for rsock reactive-streams servers")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, env = "RSOCK_SERVER", default_value = "127.0.0.1:7474")]
    server: SocketAddr,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Per-request timeout in seconds (0 waits forever)
    #[arg(short, long, default_value = "30")]
    timeout: u64,

    /// MIME type announced for data in SETUP
    #[arg(long, default_value = "UTF-8")]
    data_mime_type: String,

    /// MIME type announced for metadata in SETUP
    #[arg(long, default_value = "UTF-8")]
    metadata_mime_type: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Send a REQUEST_RESPONSE and print the reply
    Request {
        /// Request data (or @file to read from file)
        data: Option<String>,

        /// Request metadata
        #[arg(short, long)]
        metadata: Option<String>,
    },

    /// Send a REQUEST_STREAM and print every response until completion
    Stream {
        /// Request data (or @file to read from file)
        data: Option<String>,

        /// Request metadata
        #[arg(short, long)]
        metadata: Option<String>,

        /// Initial demand sent with the request
        #[arg(short = 'n', long, default_value = "256")]
        initial_n: u32,

        /// Cancel the stream after this many responses
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let tcp = TcpClientConfig::new(cli.server)
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout));
    let mut config = ConnectionConfig::new()
        .with_mime_types(cli.metadata_mime_type.clone(), cli.data_mime_type.clone());
    if cli.timeout > 0 {
        config = config.with_request_timeout(Duration::from_secs(cli.timeout));
    }
    tracing::debug!("Using server {}", cli.server);
    let client = Client::new(tcp, config);

    let result = commands::execute(&client, cli.command).await;
    client.close().await?;

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red(), e);
        if commands::is_retryable(e.as_ref()) {
            eprintln!("{}", "The failure looks transient; retrying may succeed".dimmed());
        }
        std::process::exit(1);
    }

    Ok(())
}
