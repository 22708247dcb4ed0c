use clap::Parser;
use feox_lite::{Config, Server};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8323)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Path to FeOx data file
    #[arg(short = 'd', long, default_value = "redis.db")]
    data_path: String,

    /// Keep data in memory only (ignores --data-path)
    #[arg(long)]
    in_memory: bool,

    /// Per-connection receive buffer size in bytes
    #[arg(long, default_value_t = 8192)]
    buffer_size: usize,

    /// Always reply +OK to SET, even when the write failed
    #[arg(long)]
    strict_set_ack: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Create configuration
    let config = if let Some(ref config_path) = args.config {
        Config::from_file(config_path)?
    } else {
        Config {
            bind_addr: args.bind.clone(),
            port: args.port,
            data_path: (!args.in_memory).then(|| args.data_path.clone()),
            connection_buffer_size: args.buffer_size,
            strict_set_ack: args.strict_set_ack,
            log_level: args.log_level.clone(),
            ..Default::default()
        }
    };

    // Initialize tracing
    let log_level = if args.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("feox_lite={},feoxdb=info", log_level))
        .init();

    info!(
        "Starting feox-lite v{} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.bind_addr,
        config.port
    );

    match config.data_path {
        Some(ref path) => info!("Using data file {}", path),
        None => warn!("Running memory-only, data will not survive a restart"),
    }

    if config.strict_set_ack {
        warn!("strict_set_ack enabled: failed SET writes are still acknowledged with +OK");
    }

    let server = Arc::new(Server::new(config)?);

    // Setup signal handlers for graceful shutdown. The handler only holds the
    // flag so the store is dropped, and flushed, when `run` returns.
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, shutting down gracefully...");
        shutdown.store(true, Ordering::Release);
    })?;

    // Run the server
    if let Err(e) = server.run() {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
