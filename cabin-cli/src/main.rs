//! `cabin`: runs fault-injection experiments against a cluster of servers.
//!
//! ```text
//! cabin smoke --timeout 10
//! cabin failover --killinterval 5 --launchdelay 1 --timeout 60
//! cabin election --trials 20 --election-timeout-ms 500
//! cabin reconfigure --timeout 20
//! cabin timeouts 10.0.0.2 10.0.0.3 --count 20
//! ```

mod cli;
mod commands;
mod telemetry;

use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format)?;

    commands::run(cli).await
}
