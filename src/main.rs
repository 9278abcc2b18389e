//! # rollcall
//!
//! Roll-call server binary: runs the server, mints tokens and loads rosters.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use rollcall_core::{Role, UserId};
use rollcall_server::telemetry::init_logging;
use rollcall_server::{metrics, start, Collaborators, JwtIdentity, ServerConfig};
use rollcall_store::{ClassRepo, Database};

#[derive(Parser, Debug)]
#[command(name = "rollcall", about = "Live attendance roll-call server")]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP/WebSocket server until Ctrl-C.
    Serve {
        /// Port to bind, overriding configuration (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print a signed bearer token.
    Token {
        #[arg(long)]
        user: String,
        /// `teacher` or `student`.
        #[arg(long)]
        role: Role,
        #[arg(long, default_value = "168")]
        ttl_hours: u64,
    },
    /// Load classes and enrollments from a JSON file.
    ImportRoster { file: PathBuf },
}

fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    ServerConfig::load(path).context("Failed to load configuration")
}

async fn serve(mut config: ServerConfig, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.port = port;
    }
    let _ = init_logging(&config.log_level, config.log_format);

    let metrics = if config.metrics_enabled {
        Some(metrics::install_recorder().context("Failed to install metrics recorder")?)
    } else {
        None
    };

    let db = Database::open(&config.database_path)
        .with_context(|| format!("Failed to open database: {}", config.database_path.display()))?;
    let identity = Arc::new(JwtIdentity::new(&config.jwt_secret));
    let server = start(&config, Collaborators::sqlite(db, identity), metrics)
        .await
        .context("Failed to start server")?;

    tracing::info!(addr = %server.addr(), "rollcall listening");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    server.stop().await;
    Ok(())
}

fn token(config: &ServerConfig, user: String, role: Role, ttl_hours: u64) -> Result<()> {
    let identity = JwtIdentity::new(&config.jwt_secret);
    let ttl = Duration::from_secs(ttl_hours.saturating_mul(3600));
    let token = identity
        .issue(&UserId::from_raw(user), role, ttl)
        .context("Failed to sign token")?;
    println!("{token}");
    Ok(())
}

fn import_roster(config: &ServerConfig, file: &Path) -> Result<()> {
    let _ = init_logging(&config.log_level, config.log_format);
    let db = Database::open(&config.database_path)
        .with_context(|| format!("Failed to open database: {}", config.database_path.display()))?;
    let ids = ClassRepo::new(db)
        .import_file(file)
        .with_context(|| format!("Failed to import roster: {}", file.display()))?;
    for id in &ids {
        println!("{id}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port } => serve(config, port).await,
        Command::Token { user, role, ttl_hours } => token(&config, user, role, ttl_hours),
        Command::ImportRoster { file } => import_roster(&config, &file),
    }
}
