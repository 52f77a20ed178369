use anyhow::{Context, Result};
use clap::Parser;

use payer_slurp::{
    args::Args,
    run::{print_run_summary_table, run},
};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    println!("Starting Payer Provider Network Slurp...");
    let summary = run(&args).await.context("payer network slurp failed")?;
    print_run_summary_table(&summary);
    println!("Completed Payer Provider Network Slurp!");
    Ok(())
}
