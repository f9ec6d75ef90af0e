//! Promote command.

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::output::{print_json, print_success, OutputFormat};

use super::{CommandContext, Rollout};

/// Complete the current gate (pause or analysis) and advance one step.
#[derive(Debug, Args)]
pub struct PromoteCommand {
    /// Rollout name.
    name: String,

    /// Skip all remaining steps and promote immediately.
    #[arg(long)]
    full: bool,
}

#[derive(Debug, Serialize)]
struct PromoteRequest {
    full: bool,
}

impl PromoteCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let request = PromoteRequest { full: self.full };
        let rollout: Rollout = ctx
            .client
            .post(
                &format!("/v1/rollouts/{}/promote", self.name),
                Some(&request),
            )
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
                if self.full {
                    print_success(&format!("Rollout {} promoting fully", rollout.name));
                } else {
                    print_success(&format!("Rollout {} promoted one step", rollout.name));
                }
            }
        }
        Ok(())
    }
}
