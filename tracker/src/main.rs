use clap::Parser;
use log::info;
use std::time::Duration;
use tracker::{TrackerConfig, TrackerServer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    port: u16,

    /// Grid side length N
    grid_size: usize,

    /// Number of treasures K kept on the grid
    treasure_count: usize,

    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Liveness ping bound in milliseconds
    #[arg(long, default_value = "1000")]
    call_timeout_ms: u64,

    /// Bound on the election run for each registration in milliseconds
    #[arg(long, default_value = "10000")]
    election_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = TrackerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        grid_size: args.grid_size,
        treasure_count: args.treasure_count,
        call_timeout: Duration::from_millis(args.call_timeout_ms),
        election_timeout: Duration::from_millis(args.election_timeout_ms),
    };

    let server = TrackerServer::bind(config).await?;

    tokio::select! {
        _ = server.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Tracker shutting down");
        }
    }

    Ok(())
}
