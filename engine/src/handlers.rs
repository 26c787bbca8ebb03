//! Command handlers for CLI operations
//!
//! Each handler opens the configured store, does one thing and prints the
//! result as text or JSON. Rendering lives in plain functions so it can be
//! tested without capturing stdout.

use anyhow::{bail, Context, Result};
use sdk::types::Operation;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{open_store, ConversationRecord, Task};
use crate::history::{format_as_context, ConversationHistoryCache, HistoryLimits};
use crate::invoker::{AttemptEvent, AttemptObserver, AttemptOutcome, ResilientInvoker, RetryPolicy};
use crate::judge::{HttpJudge, Judge};
use crate::lifecycle::TaskStateMachine;
use crate::navigator::{CallContext, WorkflowNavigator};

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Wire a navigator from configuration
///
/// Fails when no judge endpoint is configured.
pub async fn build_navigator(
    config: &Config,
    observer: Option<AttemptObserver>,
) -> Result<WorkflowNavigator> {
    let judge = HttpJudge::from_config(&config.judge)?
        .context("judge.endpoint is not configured")?;
    let judge = Arc::new(judge);
    let store = open_store(&config.store_url()).await?;

    let tasks = Arc::new(TaskStateMachine::new(Arc::clone(&store)));
    let history = ConversationHistoryCache::new(store, HistoryLimits::from(&config.database));
    let mut invoker = ResilientInvoker::new(RetryPolicy::from(&config.retry));
    if let Some(observer) = observer {
        invoker = invoker.with_observer(observer);
    }

    let verdicts: Arc<dyn Judge> = Arc::<HttpJudge>::clone(&judge);
    let mut navigator = WorkflowNavigator::new(tasks, history, invoker, verdicts)
        .with_enrichment_count(config.database.context_enrichment_count);
    if config.judge.use_decider {
        navigator = navigator.with_decider(judge);
    }

    Ok(navigator)
}

/// Run one lifecycle operation and print its result
pub async fn handle_call(
    operation: &str,
    session: &str,
    input: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let op: Operation = operation.parse()?;
    let input: serde_json::Value =
        serde_json::from_str(input).context("--input is not valid JSON")?;

    // Retry notices go to stderr so JSON on stdout stays clean
    let observer: AttemptObserver = Arc::new(|event: &AttemptEvent| {
        if let Some(notice) = retry_notice(event) {
            eprintln!("{}", notice);
        }
    });
    let navigator = build_navigator(config, Some(observer)).await?;
    let result = navigator
        .dispatch(&CallContext::new(session), op, input)
        .await;
    // The runtime ends with this command; scheduled evictions must land first
    navigator.history().flush().await;
    let result = result?;

    match format {
        OutputFormat::Text => println!("{}", render_call(&result)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    Ok(())
}

/// One-line notice for a retry, `None` for other attempt outcomes
pub fn retry_notice(event: &AttemptEvent) -> Option<String> {
    match event.outcome {
        AttemptOutcome::Retrying { delay } => Some(format!(
            "Judge is rate limited (attempt {}), retrying in {:.1}s",
            event.attempt,
            delay.as_secs_f64()
        )),
        _ => None,
    }
}

/// Show one task
pub async fn handle_task_show(task_id: &str, config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(&config.store_url()).await?;
    let task = TaskStateMachine::new(store).get(task_id).await?;
    print_tasks(&[task], format)
}

/// Show the task most likely in progress
pub async fn handle_task_current(config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(&config.store_url()).await?;
    let current = TaskStateMachine::new(store).current().await?;

    match (current, format) {
        (Some(task), _) => print_tasks(&[task], format),
        (None, OutputFormat::Text) => {
            println!("No tasks found");
            Ok(())
        }
        (None, OutputFormat::Json) => {
            println!("{}", json!({ "found": false }));
            Ok(())
        }
    }
}

/// List recently updated tasks
pub async fn handle_task_list(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(&config.store_url()).await?;
    let tasks = store
        .recent_tasks(limit)
        .await
        .context("Failed to fetch tasks")?;
    print_tasks(&tasks, format)
}

/// Show recent records of a session
pub async fn handle_history_show(
    session_id: &str,
    limit: usize,
    context: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let history = open_history(config).await?;
    let records = history.recent(session_id, limit).await?;

    match format {
        OutputFormat::Text if context => println!("{}", format_as_context(&records)),
        OutputFormat::Text => println!("{}", render_records(session_id, &records)),
        OutputFormat::Json => {
            let output = json!({
                "session_id": session_id,
                "records": records,
                "count": records.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List sessions that have records
pub async fn handle_history_sessions(config: &Config, format: OutputFormat) -> Result<()> {
    let store = open_store(&config.store_url()).await?;
    let mut sessions = store
        .session_ids()
        .await
        .context("Failed to list sessions")?;
    sessions.sort();

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No sessions found");
            }
            for session in &sessions {
                println!("{}", session);
            }
        }
        OutputFormat::Json => println!(
            "{}",
            json!({ "sessions": sessions, "count": sessions.len() })
        ),
    }

    Ok(())
}

/// Delete every record of a session
pub async fn handle_history_clear(
    session_id: &str,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let history = open_history(config).await?;
    let deleted = history.clear(session_id).await?;

    match format {
        OutputFormat::Text => println!("Deleted {} record(s) from session {}", deleted, session_id),
        OutputFormat::Json => println!(
            "{}",
            json!({ "session_id": session_id, "deleted": deleted })
        ),
    }

    Ok(())
}

/// Run the retention sweep once, or keep it running with `watch`
pub async fn handle_purge(watch: bool, config: &Config, format: OutputFormat) -> Result<()> {
    let history = open_history(config).await?;

    if watch {
        let interval = config.database.cleanup_interval();
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Retention sweeper running; press Ctrl-C to stop"
        );
        let sweeper = history.spawn_retention_sweeper(interval);
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        sweeper.abort();
        return Ok(());
    }

    let deleted = history.purge_expired().await?;

    match format {
        OutputFormat::Text => println!(
            "Deleted {} record(s) older than {}s",
            deleted, config.database.retention_secs
        ),
        OutputFormat::Json => println!(
            "{}",
            json!({ "deleted": deleted, "retention_secs": config.database.retention_secs })
        ),
    }

    Ok(())
}

/// Write a default config file
pub fn handle_config_init(path: &Path, force: bool, format: OutputFormat) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }

    Config::write_default(path)?;

    match format {
        OutputFormat::Text => println!("Wrote default configuration to {}", path.display()),
        OutputFormat::Json => println!("{}", json!({ "path": path })),
    }

    Ok(())
}

/// Print the effective configuration
pub fn handle_config_show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!(
            "{}",
            toml::to_string_pretty(config).context("Failed to serialize config")?
        ),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
    }

    Ok(())
}

async fn open_history(config: &Config) -> Result<ConversationHistoryCache> {
    let store = open_store(&config.store_url()).await?;
    if store.name() == "memory" {
        tracing::warn!("database.url is memory://; history will not outlive this command");
    }
    Ok(ConversationHistoryCache::new(
        store,
        HistoryLimits::from(&config.database),
    ))
}

fn print_tasks(tasks: &[Task], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks found");
            }
            for task in tasks {
                println!("{}", render_task(task));
            }
        }
        OutputFormat::Json => {
            let output = json!({ "tasks": tasks, "count": tasks.len() });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Human-readable summary of a task
pub fn render_task(task: &Task) -> String {
    let approvals = sdk::types::ApprovalStage::ALL
        .iter()
        .map(|stage| {
            let mark = if task.metadata.approvals.get(*stage).is_some() {
                "x"
            } else {
                " "
            };
            format!("[{}] {}", mark, stage)
        })
        .collect::<Vec<_>>()
        .join(" ");

    let mut out = format!(
        "Task ID: {}\n  Title: {}\n  State: {}\n  Approvals: {}\n  Updated: {}",
        task.task_id,
        task.title,
        task.state,
        approvals,
        task.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(origin) = task.metadata.blocked_from {
        out.push_str(&format!("\n  Blocked from: {}", origin));
    }
    out
}

/// Human-readable listing of session records, newest first
pub fn render_records(session_id: &str, records: &[ConversationRecord]) -> String {
    if records.is_empty() {
        return format!("No history for session {}", session_id);
    }

    let mut out = format!("History of {} ({} records):\n", session_id, records.len());
    for record in records {
        out.push_str(&format!(
            "\n{} {} [{}]\n  Input: {}\n  Output: {}\n",
            record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.source,
            record.id,
            truncate(&record.input, 120),
            truncate(&record.output, 120)
        ));
    }
    out
}

/// Short text form of an operation result
pub fn render_call(result: &serde_json::Value) -> String {
    // recover-current-task answers without an envelope
    if result.get("metadata").is_none() {
        return serde_json::to_string_pretty(result).unwrap_or_default();
    }

    let next = result
        .get("next_action")
        .and_then(|v| v.as_str())
        .unwrap_or("none (final)");
    let rationale = result
        .pointer("/instructions/rationale")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let mut out = format!("Next action: {}", next);
    if !rationale.is_empty() {
        out.push_str(&format!("\nRationale: {}", rationale));
    }
    if let Some(steps) = result.pointer("/instructions/steps").and_then(|v| v.as_array()) {
        for step in steps.iter().filter_map(|s| s.as_str()) {
            out.push_str(&format!("\n  - {}", step));
        }
    }
    if let Some(blockers) = result.get("blockers").and_then(|v| v.as_array()) {
        for blocker in blockers.iter().filter_map(|b| b.as_str()) {
            out.push_str(&format!("\n  ! {}", blocker));
        }
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}
