//! Retry command.

use anyhow::Result;
use clap::Args;

use crate::output::{print_json, print_success, OutputFormat};

use super::{CommandContext, Rollout};

/// Clear a degraded rollout and re-attempt the release from step 0.
#[derive(Debug, Args)]
pub struct RetryCommand {
    /// Rollout name.
    name: String,
}

impl RetryCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let rollout: Rollout = ctx
            .client
            .post::<(), _>(&format!("/v1/rollouts/{}/retry", self.name), None)
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
                print_success(&format!("Rollout {} retrying", rollout.name));
            }
        }
        Ok(())
    }
}
