//! Apply command.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use crate::error::CliError;
use crate::output::{print_json, print_success, OutputFormat};

use super::{CommandContext, Rollout};

/// Create or update a rollout from a spec file.
#[derive(Debug, Args)]
pub struct ApplyCommand {
    /// Path to a JSON rollout spec ("-" reads stdin).
    #[arg(short = 'f', long = "file")]
    file: String,
}

impl ApplyCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let raw = if self.file == "-" {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading spec from stdin")?;
            buf
        } else {
            std::fs::read_to_string(&self.file)
                .with_context(|| format!("reading spec file {}", self.file))?
        };

        let spec: Value = serde_json::from_str(&raw)
            .map_err(|e| CliError::Validation(format!("spec is not valid JSON: {e}")))?;
        let name = spec
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| CliError::Validation("spec has no 'name' field".to_string()))?
            .to_string();

        let rollout: Rollout = ctx
            .client
            .put(&format!("/v1/rollouts/{name}"), &spec)
            .await?;

        match ctx.format {
            OutputFormat::Json => {
                let raw: Value = ctx.client.get(&format!("/v1/rollouts/{name}")).await?;
                print_json(&raw);
            }
            OutputFormat::Table => {
                print_success(&format!(
                    "Applied rollout {} (generation {})",
                    rollout.name, rollout.generation
                ));
            }
        }
        Ok(())
    }
}
