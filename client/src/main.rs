use clap::Parser;
use client::network::{Client, Mode};
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Player name
    #[arg(short = 'n', long, default_value = "anonymous")]
    name: String,

    /// Join this game instead of creating one
    #[arg(short = 'g', long, conflicts_with = "watch")]
    game: Option<String>,

    /// Observe all active games instead of playing
    #[arg(short = 'w', long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mode = match (args.game, args.watch) {
        (_, true) => Mode::Watch,
        (Some(game_id), false) => Mode::Join(game_id),
        (None, false) => Mode::Create,
    };

    info!("Starting client...");
    info!("Connecting to: {} as {:?}", args.server, mode);

    let mut client = Client::new(&args.server, &args.name, mode).await?;
    client.run().await?;

    Ok(())
}
