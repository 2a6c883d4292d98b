//! habitflow - command-line client for the habitflow habit scheduling service.
//!
//! Drives the same session flows as the mobile app: cold-start check,
//! sign-in, sign-up, logout, password reset, and authenticated API calls.

mod cli;

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use habitflow_core::auth::{AuthManager, InitialRoute, RefreshOutcome};
use habitflow_core::Config;

use cli::{Args, Commands};

/// Log file prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "habitflow.log";

/// Initialize the tracing subscriber for logging.
/// Returns the file writer guard, which must live until exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let mut config = Config::load()?;
    if let Some(ref url) = args.base_url {
        config.base_url = url.clone();
    }

    let _guard = init_tracing(&config);
    info!(base_url = %config.base_url, "habitflow starting");

    let manager = AuthManager::from_config(&config)?;
    run(args.command, &manager, &config).await
}

async fn run(command: Commands, manager: &AuthManager, config: &Config) -> Result<()> {
    match command {
        Commands::Status => status(manager).await,
        Commands::Login { email } => {
            let email = match email.or_else(|| config.last_email.clone()) {
                Some(email) => email,
                None => prompt("Email: ")?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            let user = manager.login(&email, &password).await?;
            println!("Signed in as {} ({})", display_name(&user.name, &user.email), user.id);

            Config::remember_email(&email).context("Failed to remember email")?;
            Ok(())
        }
        Commands::Signup { username, email } => {
            let password = rpassword::prompt_password("Choose a password: ")?;
            let user = manager.sign_up(&username, &email, &password).await?;
            println!("Account created for {} ({})", display_name(&user.name, &user.email), user.id);
            Ok(())
        }
        Commands::Logout => {
            let result = manager.logout().await;
            println!("Signed out on this device");
            result.context("Server did not confirm logout")
        }
        Commands::ResetPassword { email } => {
            let message = manager.reset_password(&email).await?;
            println!("{}", message);
            Ok(())
        }
        Commands::Refresh => match manager.refresh().await {
            RefreshOutcome::Success(_) => {
                println!("Tokens refreshed");
                Ok(())
            }
            RefreshOutcome::NoRefreshTokenAvailable => {
                anyhow::bail!("Not signed in")
            }
            RefreshOutcome::Rejected(status) => {
                anyhow::bail!("Session expired (server answered {}); please sign in again", status)
            }
            RefreshOutcome::TransportError(cause) => {
                anyhow::bail!("Could not reach the server: {}", cause)
            }
        },
        Commands::Get { path } => {
            let body: serde_json::Value = manager.transport().get_json(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
    }
}

async fn status(manager: &AuthManager) -> Result<()> {
    let mut bootstrap = manager.bootstrap();
    let state = bootstrap.run().await;

    match state.route() {
        InitialRoute::Home => {
            let user = manager.user_id().await.unwrap_or_else(|| "unknown".to_string());
            println!("Signed in (user {}) - opening home", user);
        }
        InitialRoute::Login => {
            println!("Not signed in - opening login");
            if let Some(RefreshOutcome::TransportError(cause)) = bootstrap.last_outcome() {
                println!("Server unreachable ({}); stored session kept for next launch", cause);
            }
        }
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn display_name<'a>(name: &'a str, email: &'a str) -> &'a str {
    if name.is_empty() {
        email
    } else {
        name
    }
}
