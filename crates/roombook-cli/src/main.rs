//! roombook CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use roombook_core::{TracingConfig, init_tracing};

use roombook_cli::cli::{Cli, Command, ConfigAction};
use roombook_cli::commands::{self, Context};
use roombook_cli::config::RoombookConfig;
use roombook_cli::error::CliResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing = if cli.debug {
        TracingConfig::cli_debug()
    } else if matches!(cli.command, Command::Watch) {
        TracingConfig::daemon()
    } else {
        TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = match cli.config {
        Some(ref path) => RoombookConfig::load_from(path)?,
        None => RoombookConfig::load()?,
    };

    if let Command::Config { ref action } = cli.command {
        return match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config),
        };
    }

    let ctx = Context::open(&cli, &config).await?;
    match cli.command {
        Command::Book { slot, purpose } => commands::reservations::book(&ctx, &slot, purpose).await,
        Command::BookRecurring {
            slot,
            purpose,
            every,
            on,
            until,
        } => commands::reservations::book_recurring(&ctx, &slot, purpose, every, &on, until).await,
        Command::Approve { id, force } => commands::reservations::approve(&ctx, &id, force).await,
        Command::Reject { id, reason } => commands::reservations::reject(&ctx, &id, reason).await,
        Command::Cancel { id, admin } => commands::reservations::cancel(&ctx, &id, admin).await,
        Command::Conflicts { slot, exclude } => {
            commands::reservations::conflicts(&ctx, &slot, exclude.as_deref()).await
        }
        Command::Prefs { action } => commands::prefs::run(&ctx, action).await,
        Command::Notifications { action } => commands::notifications::run(&ctx, action).await,
        Command::Sync => commands::sync::sync(&ctx).await,
        Command::Watch => commands::sync::watch(&ctx).await,
        Command::Config { .. } => Ok(()),
    }
}
