//! List command.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{colored_phase, print_output};

use super::{short_revision, CommandContext, Rollout};

/// List rollouts known to the controller.
#[derive(Debug, Args)]
pub struct ListCommand {}

#[derive(Debug, Serialize, Tabled)]
struct RolloutRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Phase")]
    phase: String,
    #[tabled(rename = "Step")]
    step: String,
    #[tabled(rename = "Weight")]
    weight: String,
    #[tabled(rename = "Stable")]
    stable: String,
    #[tabled(rename = "Canary")]
    canary: String,
}

impl ListCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let rollouts: Vec<Rollout> = ctx.client.get("/v1/rollouts").await?;

        let rows: Vec<RolloutRow> = rollouts
            .iter()
            .map(|r| RolloutRow {
                name: r.name.clone(),
                phase: colored_phase(&r.status.phase),
                step: r
                    .status
                    .current_step_index
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                weight: format!("{}%", r.status.current_step_weight),
                stable: short_revision(r.status.stable_revision.as_deref()),
                canary: short_revision(r.status.canary_revision.as_deref()),
            })
            .collect();

        print_output(&rows, ctx.format);
        Ok(())
    }
}
