//! Notes CLI - sign in and call the notes API from the terminal.

mod commands;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use notes_auth::AuthRuntime;
use notes_config_and_utils::{init_logging, Config, Paths};
use tracing::debug;

/// Notes CLI - Manage your session and call the notes API.
#[derive(Parser)]
#[command(name = "notes")]
#[command(about = "Notes CLI for authentication and API access")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Login with email and password
    Login {
        /// Account email; prompted for when omitted
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Logout and clear session
    Logout,

    /// Check authentication status
    Status,

    /// Refresh the access token now
    Refresh,

    /// Send an authenticated request to the API
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,
        /// Path relative to the API base URL, e.g. notes/42
        path: String,
        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let paths = Paths::new()?;
    paths.ensure_dirs()?;

    let mut config = Config::load(&paths).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    init_logging("cli", &config.log_level, &paths);
    debug!(api_base_url = %config.api_base_url, "Starting notes CLI");

    let runtime = AuthRuntime::from_config(&config, &paths)?;
    runtime.init()?;

    let result = match cli.command {
        Commands::Login { email } => commands::login(&runtime, email, &cli.format).await,
        Commands::Logout => commands::logout(&runtime, &cli.format).await,
        Commands::Status => commands::status(&runtime, &cli.format),
        Commands::Refresh => commands::refresh(&runtime, &cli.format).await,
        Commands::Request { method, path, data } => {
            commands::request(&runtime, &method, &path, data.as_deref(), &cli.format).await
        }
    };

    runtime.dispose();
    result
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
