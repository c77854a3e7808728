// ABOUTME: Entry point for the coderun binary
// ABOUTME: Parses the command line, loads configuration and dispatches subcommands

use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;

mod cli;

use cli::executions::{list_command, run_command, status_command, RunArgs};
use cli::queue::QueueCommands;
use cli::sessions::SessionCommands;
use cli::worker::worker_command;
use coderun_cli::logging::init_logging;
use coderun_cli::{App, Config};

#[derive(Parser)]
#[command(name = "coderun")]
#[command(about = "coderun - sandboxed code execution with durable, idempotent runs")]
#[command(version)]
struct Cli {
    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run queue workers until interrupted
    Worker {
        /// Override CODERUN_WORKER_CONCURRENCY
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Manage code sessions
    #[command(subcommand)]
    Session(SessionCommands),
    /// Submit a session's code for execution
    Run {
        session_id: String,
        /// Run this code instead of the session's current code
        #[arg(long)]
        code: Option<String>,
        /// Read the code to run from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Client-chosen key; resubmitting with it returns the same execution
        #[arg(long)]
        idempotency_key: Option<String>,
        /// Block until the execution finishes and print its output
        #[arg(long)]
        wait: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show one execution
    Status {
        execution_id: String,
        #[arg(long)]
        json: bool,
    },
    /// List a session's executions, newest first
    List {
        session_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Inspect the job queue
    #[command(subcommand)]
    Queue(QueueCommands),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Commands::Worker {
        concurrency: Some(concurrency),
    } = &command
    {
        config.worker_concurrency = (*concurrency).max(1);
    }

    let app = App::open(config).await?;

    match command {
        Commands::Worker { .. } => worker_command(&app).await,
        Commands::Session(cmd) => cmd.execute(&app).await,
        Commands::Run {
            session_id,
            code,
            file,
            idempotency_key,
            wait,
            json,
        } => {
            run_command(
                &app,
                RunArgs {
                    session_id,
                    code,
                    file,
                    idempotency_key,
                    wait,
                    json,
                },
            )
            .await
        }
        Commands::Status { execution_id, json } => status_command(&app, &execution_id, json).await,
        Commands::List { session_id, json } => list_command(&app, &session_id, json).await,
        Commands::Queue(cmd) => cmd.execute(&app).await,
    }
}
