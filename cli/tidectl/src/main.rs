//! tidectl - CLI for the tideway rollout controller.
//!
//! The operator's interface to rollouts: inspect status, apply specs, and
//! drive promote/abort/retry/restart against the controller's admin API.

use clap::Parser;

mod client;
mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        let code = error::exit_code(&e);
        error::print_error(&e);
        std::process::exit(code);
    }
}
