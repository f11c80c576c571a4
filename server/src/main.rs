use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Maximum number of concurrent connections
    #[clap(short, long, default_value = "256")]
    max_connections: usize,
    /// Seconds of silence before a game leaves the dashboard
    #[clap(long, default_value = "30")]
    inactive_secs: u64,
    /// Seconds of silence before a game is deleted
    #[clap(long, default_value = "3600")]
    expire_secs: u64,
    /// Seconds between stats counter flushes
    #[clap(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..))]
    flush_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_connections: args.max_connections,
        inactive_timeout: Duration::from_secs(args.inactive_secs),
        expire_timeout: Duration::from_secs(args.expire_secs),
        stats_flush_interval: Duration::from_secs(args.flush_secs),
        ..ServerConfig::default()
    };

    info!("Starting server with {:?}", config);
    let mut server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
