// ABOUTME: CLI commands for inspecting the execution job queue
// ABOUTME: Reports per-state job counts for the configured queue

use anyhow::Result;
use clap::Subcommand;
use coderun_cli::App;
use colored::*;

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show job counts by state
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl QueueCommands {
    pub async fn execute(self, app: &App) -> Result<()> {
        match self {
            QueueCommands::Stats { json } => {
                let counts = app.queue.counts().await?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&counts)?);
                    return Ok(());
                }

                println!(
                    "{}",
                    format!("Queue '{}'", app.queue.settings().name).blue().bold()
                );
                println!("  waiting:   {}", counts.waiting.to_string().cyan());
                println!("  active:    {}", counts.active.to_string().cyan());
                println!("  completed: {}", counts.completed.to_string().green());
                println!("  failed:    {}", counts.failed.to_string().red());
                println!("  total:     {}", counts.total());
                Ok(())
            }
        }
    }
}
