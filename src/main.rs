//! Ecobee bridge binary.
//!
//! Usage: ecobee-bridge [--root <dir>] [run | authorize <account> | dump <account> | status]

use clap::{Parser, Subcommand};
use ecobee_bridge::application::bootstrap::{BootstrapResult, bootstrap_workspace, build_context};
use ecobee_bridge::infrastructure::config::normalize_account_id;
use ecobee_bridge::infrastructure::error::InfraError;
use ecobee_bridge::infrastructure::logging::{LoggingConfig, init_logging};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ecobee-bridge")]
#[command(about = "Polls ecobee thermostats and forwards commands for a home-automation host")]
struct Args {
    /// Workspace holding config/, state/ and logs/. Defaults to the current directory.
    #[arg(long, env = "ECOBEE_BRIDGE_ROOT")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync scheduler until Ctrl-C.
    Run,
    /// Link an account with the ecobee PIN flow.
    Authorize { account: String },
    /// Fetch once and print the account's snapshot as JSON.
    Dump { account: String },
    /// Print each account's authentication status.
    Status,
}

#[tokio::main]
async fn main() -> Result<(), InfraError> {
    let args = Args::parse();
    let workspace_root = match args.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    let bootstrap = bootstrap_workspace(&workspace_root)?;
    let log_dir = bootstrap
        .config
        .log_to_file
        .then(|| bootstrap.logs_dir.clone());
    init_logging(&LoggingConfig::new(bootstrap.config.log_level.clone(), log_dir))?;
    info!(
        workspace = %bootstrap.workspace_root.display(),
        token_backend = bootstrap.config.token_backend.as_str(),
        "ecobee bridge starting"
    );

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&bootstrap).await,
        Command::Authorize { account } => authorize(&bootstrap, &account).await,
        Command::Dump { account } => dump(&bootstrap, &account).await,
        Command::Status => status(&bootstrap),
    }
}

async fn run(bootstrap: &BootstrapResult) -> Result<(), InfraError> {
    let mut context = build_context(bootstrap)?;
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(error) => warn!(error = %error, "could not listen for Ctrl-C; stopping"),
        }
        shutdown.cancel();
    });

    context.run(cancel).await;
    Ok(())
}

async fn authorize(bootstrap: &BootstrapResult, account: &str) -> Result<(), InfraError> {
    let account_id = normalize_account_id(account);
    let mut context = build_context(bootstrap)?;
    let session = context
        .session_mut(&account_id)
        .ok_or_else(|| InfraError::UnknownAccount(account_id.clone()))?;

    let Some(pin) = session.request_pin().await else {
        return Err(InfraError::Transport(
            "ecobee did not issue a PIN; check the API key and network".to_string(),
        ));
    };
    println!("Log in at https://www.ecobee.com, open My Apps > Add Application and enter PIN {pin}.");
    println!("Press Enter once the application is authorized.");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

    session.complete_authorization().await?;
    println!("{account_id}: {}", session.status());
    Ok(())
}

async fn dump(bootstrap: &BootstrapResult, account: &str) -> Result<(), InfraError> {
    let account_id = normalize_account_id(account);
    let mut context = build_context(bootstrap)?;
    if context.session(&account_id).is_none() {
        return Err(InfraError::UnknownAccount(account_id));
    }

    let report = context.tick().await;
    if !report.fetched.contains(&account_id) {
        warn!(account = %account_id, report = ?report, "fetch did not succeed; printing last snapshot");
    }
    let session = context
        .session(&account_id)
        .ok_or_else(|| InfraError::UnknownAccount(account_id.clone()))?;
    println!("{}", session.dump_snapshot()?);
    Ok(())
}

fn status(bootstrap: &BootstrapResult) -> Result<(), InfraError> {
    let context = build_context(bootstrap)?;
    for (account_id, status) in context.statuses() {
        println!("{account_id}: {status}");
    }
    Ok(())
}
