//! Restart command.

use anyhow::Result;
use clap::Args;

use crate::output::{print_json, print_success, OutputFormat};

use super::{CommandContext, Rollout};

/// Force a new revision (and therefore a fresh rollout) without editing the
/// pod template.
#[derive(Debug, Args)]
pub struct RestartCommand {
    /// Rollout name.
    name: String,
}

impl RestartCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let rollout: Rollout = ctx
            .client
            .post::<(), _>(&format!("/v1/rollouts/{}/restart", self.name), None)
            .await?;

        match ctx.format {
            OutputFormat::Json => {
                let raw: serde_json::Value = ctx
                    .client
                    .get(&format!("/v1/rollouts/{}", self.name))
                    .await?;
                print_json(&raw);
            }
            OutputFormat::Table => {
                print_success(&format!(
                    "Rollout {} restarting (generation {})",
                    rollout.name, rollout.generation
                ));
            }
        }
        Ok(())
    }
}
