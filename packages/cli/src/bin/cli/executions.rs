// ABOUTME: CLI commands that submit runs and inspect execution records
// ABOUTME: Backs the run, status and list subcommands

use anyhow::Result;
use coderun_cli::App;
use coderun_executions::SubmitRunRequest;
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use std::path::PathBuf;
use std::time::Duration;

use super::utils::{colored_status, print_execution, read_code};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct RunArgs {
    pub session_id: String,
    pub code: Option<String>,
    pub file: Option<PathBuf>,
    pub idempotency_key: Option<String>,
    pub wait: bool,
    pub json: bool,
}

pub async fn run_command(app: &App, args: RunArgs) -> Result<()> {
    let source_code = read_code(args.code, args.file)?;
    let response = app
        .executions
        .submit_run(SubmitRunRequest {
            session_id: args.session_id,
            source_code,
            idempotency_key: args.idempotency_key,
        })
        .await?;

    if !args.wait {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&response)?);
        } else {
            println!("{}", "Execution queued".green());
            println!("ID: {}", response.execution_id.cyan());
            println!("Status: {}", colored_status(response.status));
        }
        return Ok(());
    }

    // Generous bound: every attempt may run to the timeout and back off in between
    let settings = app.queue.settings();
    let wait_limit = settings
        .lease_duration
        .saturating_add(settings.retry.delay_for(settings.retry.attempts))
        .saturating_mul(settings.retry.attempts);

    let view = app
        .wait_for(&response.execution_id, WAIT_POLL_INTERVAL, wait_limit)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_execution(&view);
    }
    Ok(())
}

pub async fn status_command(app: &App, execution_id: &str, json: bool) -> Result<()> {
    let view = app.executions.get_execution(execution_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_execution(&view);
    }
    Ok(())
}

pub async fn list_command(app: &App, session_id: &str, json: bool) -> Result<()> {
    let executions = app.executions.list_executions(session_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!("{}", "No executions found".yellow());
        println!(
            "{}",
            format!("Use 'coderun run {}' to submit one", session_id).dimmed()
        );
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec!["ID", "Status", "Exit", "Time (ms)", "Error", "Queued"]);

    for execution in &executions {
        table.add_row(vec![
            execution.execution_id.clone(),
            execution.status.as_str().to_string(),
            execution
                .exit_code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "-".to_string()),
            execution.execution_time_ms.to_string(),
            execution
                .error_type
                .map(|t| t.as_str().to_string())
                .unwrap_or_else(|| "-".to_string()),
            execution.queued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }

    println!("{}", table);
    println!("Total: {} executions", executions.len().to_string().cyan());
    Ok(())
}
