//! shardcache Server Binary
//!
//! Parses the command line, runs the server and tears it down on
//! SIGINT/SIGTERM.

use clap::{ArgAction, Parser};
use shardcache::server::{Config, Transport};
use shardcache::{DuplicatePolicy, Server};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// shardcache - Sharded In-Memory Cache Server
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Port number
    #[arg(short, long, default_value_t = 5000)]
    port: u16,

    /// Serve UDP datagrams instead of TCP connections
    #[arg(short, long)]
    udp: bool,

    /// Number of worker threads (0 = auto-detect based on CPU cores)
    #[arg(short, long, default_value_t = 0)]
    threads: usize,

    /// Number of store shards
    #[arg(short = 'H', long, default_value_t = 256)]
    shards: usize,

    /// Maximum key length in bytes
    #[arg(short = 'k', long, default_value_t = 128)]
    max_key_len: usize,

    /// Maximum value length in bytes
    #[arg(short = 'l', long, default_value_t = 128)]
    max_value_len: usize,

    /// Connection buffers (0 = one per worker)
    #[arg(short = 'c', long, default_value_t = 0)]
    max_connections: usize,

    /// Pin worker threads to CPU cores
    #[arg(long)]
    pin_to_cores: bool,

    /// Reject SET on an existing key instead of replacing it
    #[arg(long)]
    keep_existing: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn config(&self) -> Config {
        let transport = if self.udp {
            Transport::Udp
        } else {
            Transport::Tcp
        };
        let policy = if self.keep_existing {
            DuplicatePolicy::KeepExisting
        } else {
            DuplicatePolicy::Replace
        };

        Config::default()
            .with_bind(&self.bind)
            .with_port(self.port)
            .with_transport(transport)
            .with_workers(self.threads)
            .with_shards(self.shards)
            .with_max_key_val(self.max_key_len, self.max_value_len)
            .with_max_connections(self.max_connections)
            .with_pin_to_cores(self.pin_to_cores)
            .with_duplicate_policy(policy)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("shardcache={}", level).parse()?),
        )
        .with_thread_names(true)
        .init();

    let config = args.config();
    info!(
        "Starting shardcache on {}:{} ({:?}) with {} workers and {} shards",
        config.bind,
        config.port,
        config.transport,
        config.worker_count(),
        config.shards
    );

    let mut server = Server::bind(config)?;
    server.start()?;

    wait_for_signal().await?;
    info!("Signal received, stopping");

    // joins OS threads, keep it off the runtime thread
    tokio::task::spawn_blocking(move || server.shutdown()).await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
