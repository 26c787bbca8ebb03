// Arbiter workflow middleware
// Main entry point for the arbiter binary

use arbiter_engine::cli::{Cli, Command, ConfigAction, HistoryAction, TaskAction};
use arbiter_engine::config::Config;
use arbiter_engine::handlers::{
    handle_call, handle_config_init, handle_config_show, handle_history_clear,
    handle_history_sessions, handle_history_show, handle_purge, handle_task_current,
    handle_task_list, handle_task_show, OutputFormat,
};
use arbiter_engine::telemetry::{init_telemetry, init_telemetry_with_level};
use clap::Parser;
use sdk::errors::{ArbiterErrorExt, WorkflowError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let result = run(Cli::parse()).await;

    if let Err(err) = &result {
        if let Some(workflow) = err.downcast_ref::<WorkflowError>() {
            eprintln!("Hint: {}", workflow.user_hint());
        }
    }

    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // `config init` must work before any config file exists
    if let Command::Config {
        action: ConfigAction::Init { force },
    } = &cli.command
    {
        init_telemetry_with_level(cli.log.as_deref().unwrap_or("info"));
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => Config::default_config_path()?,
        };
        return handle_config_init(&path, *force, format);
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load_or_create()?,
    };

    // --log wins over the config file; RUST_LOG wins over both
    match &cli.log {
        Some(level) => init_telemetry_with_level(level),
        None if config.core.log_level.is_empty() => init_telemetry(),
        None => init_telemetry_with_level(&config.core.log_level),
    }

    tracing::debug!("arbiter v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Task { action } => match action {
            TaskAction::Show { task_id } => handle_task_show(&task_id, &config, format).await,
            TaskAction::Current => handle_task_current(&config, format).await,
            TaskAction::List { limit } => handle_task_list(limit, &config, format).await,
        },

        Command::History { action } => match action {
            HistoryAction::Show {
                session_id,
                limit,
                context,
            } => handle_history_show(&session_id, limit, context, &config, format).await,
            HistoryAction::Sessions => handle_history_sessions(&config, format).await,
            HistoryAction::Clear { session_id } => {
                handle_history_clear(&session_id, &config, format).await
            }
        },

        Command::Purge { watch } => handle_purge(watch, &config, format).await,

        Command::Call {
            operation,
            session,
            input,
        } => handle_call(&operation, &session, &input, &config, format).await,

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
            // Handled before the config was loaded
            ConfigAction::Init { .. } => Ok(()),
        },
    }
}
