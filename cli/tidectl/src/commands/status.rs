//! Status command.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use crate::output::{colored_phase, print_json, OutputFormat};

use super::{short_revision, CommandContext, Rollout};

/// Show one rollout in detail.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Rollout name.
    name: String,
}

impl StatusCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let path = format!("/v1/rollouts/{}", self.name);

        if ctx.format == OutputFormat::Json {
            let raw: Value = ctx.client.get(&path).await?;
            print_json(&raw);
            return Ok(());
        }

        let rollout: Rollout = ctx.client.get(&path).await?;
        let status = &rollout.status;

        println!("{}  {}", "Name:".bold(), rollout.name);
        println!("{} {}", "Phase:".bold(), colored_phase(&status.phase));
        println!("{} {}", "Generation:".bold(), rollout.generation);
        println!(
            "{} {}",
            "Step:".bold(),
            status
                .current_step_index
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        println!("{} {}%", "Weight:".bold(), status.current_step_weight);
        println!(
            "{} {}",
            "Stable:".bold(),
            short_revision(status.stable_revision.as_deref())
        );
        println!(
            "{} {}",
            "Canary:".bold(),
            short_revision(status.canary_revision.as_deref())
        );
        if status.abort {
            println!("{} true", "Abort:".bold());
        }
        if let Some(message) = &status.message {
            println!("{} {}", "Message:".bold(), message);
        }
        Ok(())
    }
}
