//! gatehouse - authenticated TCP command gateway.
//!
//! Usage:
//!   gatehouse serve [--host 127.0.0.1] [--port 8080] [--workers 10]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use gatehouse::approval::StdinApproval;
use gatehouse::config::ServerConfig;
use gatehouse::server::Server;

#[derive(Parser, Debug)]
#[command(name = "gatehouse")]
#[command(about = "Authenticated TCP command gateway")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the TCP server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Number of pooled session workers
        #[arg(long, default_value = "10")]
        workers: usize,

        /// Session and idle timeout in seconds
        #[arg(long, default_value = "60")]
        session_timeout: u64,

        /// Identifier allow-list (comma-separated)
        #[arg(long, default_value = "Jarvis", value_delimiter = ',')]
        allow_id: Vec<String>,

        /// Append-only event log file
        #[arg(long, default_value = "server.log")]
        log_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Serve {
            host,
            port,
            workers,
            session_timeout,
            allow_id,
            log_file,
        } => {
            let config = ServerConfig {
                listen: format!("{host}:{port}")
                    .parse()
                    .with_context(|| format!("invalid listen address {host}:{port}"))?,
                workers,
                session_timeout: Duration::from_secs(session_timeout),
                idle_timeout: Duration::from_secs(session_timeout),
                allowed_ids: allow_id,
                log_file,
                ..ServerConfig::default()
            };
            init_tracing(&config.log_file)?;
            info!("server initialization");

            let server = Server::new(config, Arc::new(StdinApproval));
            server.run().await
        }
    }
}

/// Console logging plus an append-only event log file.
fn init_tracing(log_file: &std::path::Path) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("open log file {}", log_file.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}
