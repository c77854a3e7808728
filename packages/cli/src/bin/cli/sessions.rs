// ABOUTME: CLI commands for code sessions
// ABOUTME: Sessions hold the current code that runs snapshot at submission time

use anyhow::Result;
use clap::Subcommand;
use coderun_cli::App;
use coderun_sandbox::Language;
use colored::*;
use std::path::PathBuf;

use super::utils::{parse_language, read_code};

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Create a session, seeded with starter code unless code is given
    Create {
        /// Language of the session (python or javascript)
        #[arg(short, long, value_parser = parse_language)]
        language: Language,

        /// Inline source code
        #[arg(long)]
        code: Option<String>,

        /// Read source code from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

impl SessionCommands {
    pub async fn execute(self, app: &App) -> Result<()> {
        match self {
            SessionCommands::Create {
                language,
                code,
                file,
            } => {
                let source_code = read_code(code, file)?;
                let session = app.sessions.create_session(language, source_code).await?;

                println!(
                    "{}",
                    format!("Created {} session", session.language).green()
                );
                println!("ID: {}", session.id.cyan());
                Ok(())
            }
        }
    }
}
