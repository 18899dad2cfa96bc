use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{LevelFilter, info};
use size::Size;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::{Client, Config};
use crate::storage::{FilePersister, MemoryPersister, Persister};
use crate::torrent::{Info, Torrent};
use crate::tracker::server::{self, Registry};
use crate::tracker::{HttpTracker, Tracker};

mod bencoding;
mod client;
mod codec;
mod core;
mod download;
mod error;
mod message;
mod peer;
mod storage;
mod torrent;
mod tracker;
mod transport;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(short, long, global = true, default_value = "info")]
    verbosity: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download or seed the file described by a torrent
    Client {
        torrent: PathBuf,
        #[arg(short, long, default_value_t = 6881)]
        port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        ip: IpAddr,
        /// Complete copy of the file to seed from
        #[arg(long)]
        seed: Option<PathBuf>,
        /// Where to write the file once downloaded
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// File keeping downloaded pieces across restarts
        #[arg(long)]
        state: Option<PathBuf>,
        /// Print progress every this many seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        status: Option<u64>,
    },
    /// Track the swarms of one or more torrents
    Tracker {
        #[arg(required = true)]
        torrents: Vec<PathBuf>,
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        ip: IpAddr,
        /// Seconds clients should wait between announces
        #[arg(
            long,
            default_value_t = server::DEFAULT_INTERVAL.as_secs(),
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        interval: u64,
    },
    /// Create a torrent for a local file
    Generate {
        file: PathBuf,
        torrent: PathBuf,
        #[arg(long)]
        url: Url,
        /// Piece size in KiB
        #[arg(long, default_value_t = 256)]
        piece_size: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbosity)
        .parse_default_env()
        .init();

    match cli.command {
        Command::Client {
            torrent,
            port,
            ip,
            seed,
            output,
            state,
            status,
        } => {
            let torrent = Torrent::load(&torrent).await?;
            let mut config = Config::new().with_listen_addr(SocketAddr::new(ip, port));
            if let Some(seed) = seed {
                config = config.with_seed_path(seed);
            }
            if let Some(output) = output {
                config = config.with_output_path(output);
            }
            let persister: Arc<dyn Persister> = match state {
                Some(path) => Arc::new(FilePersister::new(path)),
                None => Arc::new(MemoryPersister::new()),
            };
            let tracker: Arc<dyn Tracker> = Arc::new(HttpTracker::new(torrent.announce.clone()));
            run_client(torrent.info, config, persister, tracker, status.map(Duration::from_secs)).await
        }
        Command::Tracker {
            torrents,
            port,
            ip,
            interval,
        } => {
            let mut info_hashes = Vec::with_capacity(torrents.len());
            for path in &torrents {
                let torrent = Torrent::load(path).await?;
                info!("tracking {} ({})", torrent.info.name, torrent.info.info_hash);
                info_hashes.push(torrent.info.info_hash);
            }
            let registry = Arc::new(Registry::new(Duration::from_secs(interval), info_hashes));
            run_tracker(SocketAddr::new(ip, port), registry).await
        }
        Command::Generate {
            file,
            torrent,
            url,
            piece_size,
        } => {
            let piece_size = Size::from_kibibytes(piece_size).bytes() as usize;
            let info = Info::from_file(&file, piece_size).await?;
            info!(
                "{}: {} pieces, info hash {}",
                info.name,
                info.total_pieces(),
                info.info_hash
            );
            Torrent { announce: url, info }.save(&torrent).await?;
            info!("wrote {}", torrent.display());
            Ok(())
        }
    }
}

async fn run_client(
    info: Info,
    config: Config,
    persister: Arc<dyn Persister>,
    tracker: Arc<dyn Tracker>,
    status_interval: Option<Duration>,
) -> Result<()> {
    let client = Client::start(info, config, persister, Some(tracker)).await?;
    info!("client started on {}", client.local_addr());

    let mut signal = pin!(shutdown_signal());
    match status_interval {
        Some(interval) => {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut signal => break,
                    _ = ticker.tick() => println!("{}", client.status()),
                }
            }
        }
        None => signal.await,
    }

    client.shutdown();
    // let the final announce go out
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

async fn run_tracker(addr: SocketAddr, registry: Arc<Registry>) -> Result<()> {
    let listener = transport::listen(addr).await?;
    let token = CancellationToken::new();
    let server = tokio::spawn(server::serve(listener, registry, token.clone()));
    shutdown_signal().await;
    info!("shutting down...");
    token.cancel();
    server.await?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => tokio::select! {
            _ = tokio::signal::ctrl_c() => (),
            _ = terminate.recv() => (),
        },
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
