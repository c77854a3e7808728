// ABOUTME: Output helpers shared by the coderun subcommands
// ABOUTME: Status colouring, code-source resolution and execution detail rendering

use anyhow::{bail, Context, Result};
use coderun_executions::{ExecutionStatus, ExecutionView};
use coderun_sandbox::Language;
use colored::*;
use std::path::PathBuf;

pub fn parse_language(tag: &str) -> std::result::Result<Language, String> {
    Language::parse(&tag.to_lowercase()).ok_or_else(|| {
        let supported: Vec<&str> = Language::ALL.iter().map(|l| l.as_str()).collect();
        format!("unsupported language '{}' (expected one of: {})", tag, supported.join(", "))
    })
}

/// Source code given inline or as a file path; `None` when neither is set
pub fn read_code(code: Option<String>, file: Option<PathBuf>) -> Result<Option<String>> {
    match (code, file) {
        (Some(_), Some(_)) => bail!("Pass either --code or --file, not both"),
        (Some(code), None) => Ok(Some(code)),
        (None, Some(path)) => {
            let code = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(Some(code))
        }
        (None, None) => Ok(None),
    }
}

pub fn colored_status(status: ExecutionStatus) -> ColoredString {
    match status {
        ExecutionStatus::Queued => status.as_str().dimmed(),
        ExecutionStatus::Running => status.as_str().cyan(),
        ExecutionStatus::Completed => status.as_str().green().bold(),
        ExecutionStatus::Failed => status.as_str().red().bold(),
        ExecutionStatus::Timeout => status.as_str().yellow().bold(),
    }
}

pub fn print_execution(view: &ExecutionView) {
    println!("{} {}", "Execution:".bold(), view.execution_id.cyan());
    println!("{} {}", "Status:".bold(), colored_status(view.status));
    if let Some(code) = view.exit_code {
        println!("{} {}", "Exit code:".bold(), code);
    }
    println!("{} {} ms", "Time:".bold(), view.execution_time_ms);
    println!("{} {}", "Queued:".bold(), view.queued_at.to_rfc3339());
    if let Some(finished) = view.finished_at {
        println!("{} {}", "Finished:".bold(), finished.to_rfc3339());
    }
    if let Some(error_type) = view.error_type {
        println!(
            "{} {}",
            "Error:".bold(),
            format!(
                "{} {}",
                error_type.as_str(),
                view.error_message.as_deref().unwrap_or_default()
            )
            .red()
        );
    }

    if !view.stdout.is_empty() {
        println!();
        println!("{}", "stdout".dimmed());
        print!("{}", view.stdout);
        if !view.stdout.ends_with('\n') {
            println!();
        }
    }
    if !view.stderr.is_empty() {
        println!();
        println!("{}", "stderr".dimmed());
        eprint!("{}", view.stderr);
        if !view.stderr.ends_with('\n') {
            eprintln!();
        }
    }
}
