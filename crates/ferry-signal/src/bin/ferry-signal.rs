//! Ferry Signal Server
//!
//! Signaling server for browser-to-browser file transfer.
//!
//! # Usage
//!
//! ```bash
//! # Configuration comes from the environment
//! DATABASE_URL=/var/lib/ferry/shares.db ferry-signal
//!
//! # Flags override individual settings
//! DATABASE_URL=:memory: ferry-signal --port 4100
//! ```

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ferry_core::Config;

#[derive(Parser, Debug)]
#[command(name = "ferry-signal")]
#[command(about = "Signaling server for browser-to-browser file transfer")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path (overrides DATABASE_URL)
    #[arg(short, long)]
    db: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.database_url = db;
    }

    info!("Starting Ferry Signal Server");
    if config.production {
        info!("Running in production mode");
    }

    if let Err(e) = ferry_signal::serve(config).await {
        error!("Server failed: {}", e);
        std::process::exit(1);
    }
}
