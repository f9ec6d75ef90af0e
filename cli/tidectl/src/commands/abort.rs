//! Abort command.

use anyhow::Result;
use clap::Args;

use crate::output::{print_json, print_success, OutputFormat};

use super::{CommandContext, Rollout};

/// Abort an in-flight rollout: traffic back to stable, canary torn down.
#[derive(Debug, Args)]
pub struct AbortCommand {
    /// Rollout name.
    name: String,
}

impl AbortCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let rollout: Rollout = ctx
            .client
            .post::<(), _>(&format!("/v1/rollouts/{}/abort", self.name), None)
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
                print_success(&format!("Rollout {} aborting", rollout.name));
            }
        }
        Ok(())
    }
}
