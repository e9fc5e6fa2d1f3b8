use clap::Parser;
use log::{error, info, warn};
use peer::config::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_ELECTION_TIMEOUT_MS, DEFAULT_PROBE_INTERVAL_MS,
    DEFAULT_PROBE_RETRIES,
};
use peer::input::parse_line;
use peer::view::{render, ViewConfig};
use peer::{Command, Node, NodeConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tracker host name or IP address
    tracker_host: String,

    /// Tracker port
    tracker_port: u16,

    /// Player identity
    player_id: String,

    /// Address the peer listener binds to
    #[arg(long, default_value = "127.0.0.1:0")]
    listen: String,

    /// Heartbeat and watchdog period in milliseconds
    #[arg(long, default_value_t = DEFAULT_PROBE_INTERVAL_MS)]
    probe_interval_ms: u64,

    /// Bound on short peer calls in milliseconds
    #[arg(long, default_value_t = DEFAULT_CALL_TIMEOUT_MS)]
    call_timeout_ms: u64,

    /// Extra probe attempts before a peer is declared dead
    #[arg(long, default_value_t = DEFAULT_PROBE_RETRIES)]
    probe_retries: u32,

    /// Bound on elections and bootstrap waits in milliseconds
    #[arg(long, default_value_t = DEFAULT_ELECTION_TIMEOUT_MS)]
    election_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let tracker_addr = tokio::net::lookup_host((args.tracker_host.as_str(), args.tracker_port))
        .await?
        .next()
        .ok_or("tracker address did not resolve")?;

    let config = NodeConfig::new(&args.player_id, tracker_addr)
        .with_listen_addr(&args.listen)
        .with_probe_interval(Duration::from_millis(args.probe_interval_ms))
        .with_call_timeout(Duration::from_millis(args.call_timeout_ms))
        .with_probe_retries(args.probe_retries)
        .with_election_timeout(Duration::from_millis(args.election_timeout_ms));

    info!("Joining through tracker at {}", tracker_addr);
    info!("Controls: 1 west, 2 south, 3 east, 4 north, 0 refresh, 9 exit");

    let node = Node::join(config).await?;
    show(&node).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Standard input closed, waiting for Ctrl-C");
                    tokio::signal::ctrl_c().await?;
                    break;
                };
                for command in parse_line(&line) {
                    if !execute(&node, command).await {
                        depart(&node).await;
                        return Ok(());
                    }
                }
                show(&node).await;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    depart(&node).await;
    Ok(())
}

/// Runs one command. Returns false when the player asked to exit.
async fn execute(node: &Arc<Node>, command: Command) -> bool {
    let result = match command {
        Command::Refresh => node.resync().await.map(|_| ()),
        Command::Move(direction) => node.step(direction).await.map(|_| ()),
        Command::Exit => return false,
    };
    if let Err(e) = result {
        warn!("{:?} failed: {}", command, e);
    }
    true
}

async fn depart(node: &Arc<Node>) {
    if let Err(e) = node.leave().await {
        error!("Leaving the game failed: {}", e);
    }
    node.deregister().await;
    node.shutdown();
}

async fn show(node: &Arc<Node>) {
    let snapshot = node.snapshot().await;
    let config = ViewConfig {
        own_id: node.id(),
        role: node.role().await,
        primary: node.primary().await,
        backup: node.backup().await,
        grid_size: node.grid_size(),
    };
    println!("{}", render(&snapshot, &config));
}
