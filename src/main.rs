//! Entry point for `cfp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, signal handling, argument parsing).

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use cfp::client::Client;
use cfp::server::Server;
use cfp::sink::DirectorySinks;
use cfp::socket::resolve;
use cfp::Config;

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept clients and store each stream as <DIR>/<conn_id>.file.
    Server {
        /// UDP port to listen on.
        #[arg(short, long)]
        port: u16,
        /// Directory received files are written to.
        #[arg(short, long)]
        dir: PathBuf,
        /// Local IPv4 address to bind.
        #[arg(short, long, default_value_t = Ipv4Addr::UNSPECIFIED)]
        bind: Ipv4Addr,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Send a file to a server.
    Client {
        /// Server host name or IPv4 address.
        #[arg(long)]
        host: String,
        /// Server UDP port.
        #[arg(short, long)]
        port: u16,
        /// File to send.
        #[arg(short, long)]
        file: PathBuf,
        #[command(flatten)]
        tuning: Tuning,
    },
}

/// Protocol tuning shared by both modes.
#[derive(Args)]
struct Tuning {
    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    rto_ms: u64,
    /// Seconds of silence before a connection is dropped.
    #[arg(long, default_value_t = 10)]
    idle_timeout_secs: u64,
    /// Seconds spent in TIME_WAIT.
    #[arg(long, default_value_t = 2)]
    time_wait_secs: u64,
    /// Pick random initial sequence numbers.
    #[arg(long)]
    random_isn: bool,
}

impl Tuning {
    fn config(&self) -> anyhow::Result<Config> {
        let mut config = Config {
            rto: Duration::from_millis(self.rto_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            time_wait: Duration::from_secs(self.time_wait_secs),
            ..Config::default()
        };
        if self.random_isn {
            config = config.with_random_isn();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            port,
            dir,
            bind,
            tuning,
        } => {
            if !dir.is_dir() {
                bail!("{} is not a directory", dir.display());
            }
            let addr = SocketAddr::from((bind, port));
            let mut server = Server::bind(addr, tuning.config()?, DirectorySinks::new(dir))
                .await
                .with_context(|| format!("cannot listen on {addr}"))?;

            tokio::select! {
                result = server.run() => result?,
                _ = tokio::signal::ctrl_c() => log::info!("interrupted, shutting down"),
            }
        }
        Mode::Client {
            host,
            port,
            file,
            tuning,
        } => {
            let server = resolve(&host, port).await?;
            let source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("cannot open {}", file.display()))?;

            let client = Client::connect(server, tuning.config()?, source).await?;
            client.run().await?;
            log::info!("transfer of {} complete", file.display());
        }
    }
    Ok(())
}
