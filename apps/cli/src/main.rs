//! PersonaMap CLI: crawl a site and map its pages to audience personas.
//!
//! Drives the job orchestrator and answers queries against the local
//! mapping database.

mod commands;
mod progress;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
