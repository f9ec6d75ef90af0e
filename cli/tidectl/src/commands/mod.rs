//! CLI commands.

mod abort;
mod apply;
mod list;
mod promote;
mod restart;
mod retry;
mod status;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::client::ApiClient;
use crate::output::OutputFormat;

/// tidectl - drive progressive rollouts.
#[derive(Debug, Parser)]
#[command(name = "tidectl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Controller admin API URL.
    #[arg(
        long,
        global = true,
        env = "TIDECTL_API_URL",
        default_value = "http://127.0.0.1:8400"
    )]
    api_url: String,

    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List rollouts.
    List(list::ListCommand),

    /// Show one rollout in detail.
    Status(status::StatusCommand),

    /// Create or update a rollout from a spec file.
    Apply(apply::ApplyCommand),

    /// Complete the current gate, or skip all remaining steps with --full.
    Promote(promote::PromoteCommand),

    /// Abort an in-flight rollout and roll back to stable.
    Abort(abort::AbortCommand),

    /// Clear a degraded rollout and re-attempt it.
    Retry(retry::RetryCommand),

    /// Force a new revision without a template change.
    Restart(restart::RestartCommand),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let ctx = CommandContext {
            client: ApiClient::new(&self.api_url),
            format: OutputFormat::parse(&self.format),
        };

        match self.command {
            Commands::List(cmd) => cmd.run(ctx).await,
            Commands::Status(cmd) => cmd.run(ctx).await,
            Commands::Apply(cmd) => cmd.run(ctx).await,
            Commands::Promote(cmd) => cmd.run(ctx).await,
            Commands::Abort(cmd) => cmd.run(ctx).await,
            Commands::Retry(cmd) => cmd.run(ctx).await,
            Commands::Restart(cmd) => cmd.run(ctx).await,
        }
    }
}

/// Shared context handed to every command.
pub struct CommandContext {
    pub client: ApiClient,
    pub format: OutputFormat,
}

/// A rollout as returned by the admin API, with just the fields the CLI
/// renders.
#[derive(Debug, Deserialize)]
pub struct Rollout {
    pub name: String,
    pub generation: i64,
    pub status: RolloutStatus,
}

#[derive(Debug, Deserialize)]
pub struct RolloutStatus {
    pub phase: String,

    #[serde(default)]
    pub current_step_index: Option<u32>,

    #[serde(default)]
    pub current_step_weight: i32,

    #[serde(default)]
    pub stable_revision: Option<String>,

    #[serde(default)]
    pub canary_revision: Option<String>,

    #[serde(default)]
    pub abort: bool,

    #[serde(default)]
    pub message: Option<String>,
}

/// Shorten a revision hash for table display.
pub fn short_revision(revision: Option<&str>) -> String {
    match revision {
        Some(rev) => {
            let trimmed = rev.strip_prefix("sha256:").unwrap_or(rev);
            trimmed.chars().take(8).collect()
        }
        None => "-".to_string(),
    }
}
