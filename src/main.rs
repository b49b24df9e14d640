use anyhow::Result;
use clap::Parser;
use kg_agent::cli::{Cli, CliState};
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize CLI state (loads config and persistence)
    let cli = CliState::initialize(args.config.as_deref())?;

    // Initialize logging based on config
    let log_level = cli.config.logging.level.to_lowercase();
    let default_directive = format!("kg_agent={}", log_level);
    let env_override = env::var("RUST_LOG").unwrap_or_default();
    let combined_filter = if env_override.trim().is_empty() {
        default_directive.clone()
    } else if env_override.contains("kg_agent") {
        env_override
    } else {
        format!("{},{}", env_override, default_directive)
    };

    tracing_subscriber::fmt()
        .with_env_filter(combined_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let output = cli.execute(args.command).await?;
    println!("{}", output);
    Ok(())
}
