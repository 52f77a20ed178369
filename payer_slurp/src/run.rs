use anyhow::Result;
use reqwest::Client;
use std::{io::IsTerminal, path::Path, time::Duration};
use tracing::{error, info, warn};

use crate::{
    args::Args,
    common::format_count,
    crawl::{CrawlOptions, PayerSummary, crawl_payer, payer_output_dir},
    fetch::{FetchConfig, Fetcher, build_client},
    payers::{PayerEndpoint, load_payer_endpoints},
};

#[derive(Debug)]
pub struct PayerFailure {
    pub stub: String,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: Vec<(PayerEndpoint, PayerSummary)>,
    pub failed: Vec<PayerFailure>,
}

/// Loads the payer list and crawls every selected payer. Only an unreadable
/// payer list is an error; per-payer failures land in the summary.
pub async fn run(args: &Args) -> Result<RunSummary> {
    let payers_csv = args.payers_csv_path();
    let mut payers = load_payer_endpoints(&payers_csv)?;
    info!(
        count = payers.len(),
        path = %payers_csv.display(),
        "loaded payer endpoints"
    );

    if !args.payers.is_empty() {
        payers.retain(|payer| args.payers.contains(&payer.stub));
        for stub in &args.payers {
            if !payers.iter().any(|payer| &payer.stub == stub) {
                warn!(stub = %stub, "requested payer not found in endpoint list");
            }
        }
    }

    if args.test {
        println!(
            "*** RUNNING IN TEST MODE - LIMITED TO {} ENTRIES PER PAYER ***",
            args.limit
        );
    }

    let client = build_client()?;
    let fetch_config = FetchConfig {
        max_retries: args.max_retries,
        timeout: Duration::from_secs(args.timeout_seconds),
        ..FetchConfig::default()
    };
    let options = CrawlOptions {
        page_size: args.page_size,
        limit: args.record_limit(),
        absent_refetch_limit: args.absent_refetch_limit,
    };

    Ok(run_payers(&client, &payers, &args.output_root(), &fetch_config, &options).await)
}

/// Crawls payers one after another. Each payer gets its own fetcher and caches.
pub async fn run_payers(
    client: &Client,
    payers: &[PayerEndpoint],
    output_root: &Path,
    fetch_config: &FetchConfig,
    options: &CrawlOptions,
) -> RunSummary {
    let mut summary = RunSummary::default();

    for (idx, payer) in payers.iter().enumerate() {
        println!();
        println!(
            "=== Processing payer {}/{}: {} ({}) ===",
            idx + 1,
            payers.len(),
            payer.name,
            payer.stub
        );
        let fetcher = Fetcher::new(client.clone(), fetch_config.clone());
        let result = match payer_output_dir(output_root, payer) {
            Ok(output_dir) => {
                let crawled = crawl_payer(&fetcher, payer, &output_dir, options).await;
                crawled.map(|payer_summary| (output_dir, payer_summary))
            }
            Err(err) => Err(err),
        };

        match result {
            Ok((output_dir, payer_summary)) => {
                print_payer_summary_table(payer, &payer_summary, &output_dir);
                summary.succeeded.push((payer.clone(), payer_summary));
            }
            Err(err) => {
                error!(
                    payer = %payer.name,
                    stub = %payer.stub,
                    base_url = %payer.base_url,
                    error = ?err,
                    "payer failed; continuing with next payer"
                );
                summary.failed.push(PayerFailure {
                    stub: payer.stub.clone(),
                    name: payer.name.clone(),
                    error: format!("{err:#}"),
                });
            }
        }
    }

    summary
}

fn print_payer_summary_table(payer: &PayerEndpoint, summary: &PayerSummary, output_dir: &Path) {
    let use_color = std::io::stdout().is_terminal();
    let reset = if use_color { "\x1b[0m" } else { "" };
    let bold = if use_color { "\x1b[1m" } else { "" };
    let cyan = if use_color { "\x1b[36m" } else { "" };
    let green = if use_color { "\x1b[32m" } else { "" };
    let yellow = if use_color { "\x1b[33m" } else { "" };

    let border = "+--------------------------------------------+--------------------------+";
    let title = format!("COMPLETED {}", payer.stub);

    println!();
    println!("{bold}{cyan}{border}{reset}");
    println!("{bold}{cyan}| {:<42} | {:<24} |{reset}", title, "");
    println!("{bold}{cyan}{border}{reset}");
    let rows: [(&str, String, &str); 14] = [
        (
            "PractitionerRoles",
            format!(
                "{}{}",
                format_count(summary.records),
                if summary.limited { " (limited)" } else { "" }
            ),
            green,
        ),
        ("Pages fetched", format_count(summary.pages), ""),
        ("Skipped entries", format_count(summary.skipped_records), yellow),
        ("Organizations", format_count(summary.organizations), green),
        ("Locations", format_count(summary.locations), green),
        ("Practitioners", format_count(summary.practitioners), green),
        ("Unavailable entities", format_count(summary.absent_entities), yellow),
        ("Organization-PR relationships", format_count(summary.org_to_pr), ""),
        ("Location-PR relationships", format_count(summary.location_to_pr), ""),
        ("Practitioner-PR relationships", format_count(summary.p_to_pr), ""),
        ("Specialty relationships", format_count(summary.spec_to_pr), ""),
        ("Telecom relationships", format_count(summary.tele_to_pr), ""),
        ("HTTP requests (incl. retries)", format_count(summary.fetch.requests), ""),
        ("Failed attempts", format_count(summary.fetch.failed_attempts), yellow),
    ];
    for (label, value, color) in rows {
        println!("| {:<42} | {}{:<24}{} |", label, color, value, reset);
    }
    println!("{bold}{cyan}{border}{reset}");
    println!("  output: {}", output_dir.display());
}

pub fn print_run_summary_table(summary: &RunSummary) {
    let use_color = std::io::stdout().is_terminal();
    let reset = if use_color { "\x1b[0m" } else { "" };
    let bold = if use_color { "\x1b[1m" } else { "" };
    let cyan = if use_color { "\x1b[36m" } else { "" };
    let green = if use_color { "\x1b[32m" } else { "" };
    let red = if use_color { "\x1b[31m" } else { "" };

    let border = "+--------------------------------------------+--------------------------+";

    println!();
    println!("{bold}{cyan}{border}{reset}");
    println!("{bold}{cyan}| {:<42} | {:<24} |{reset}", "PAYER NETWORK SLURP SUMMARY", "");
    println!("{bold}{cyan}{border}{reset}");
    for (payer, payer_summary) in &summary.succeeded {
        println!(
            "| {:<42} | {}{:<24}{} |",
            payer.stub,
            green,
            format!("ok ({} roles)", format_count(payer_summary.records)),
            reset
        );
    }
    for failure in &summary.failed {
        println!("| {:<42} | {}{:<24}{} |", failure.stub, red, "FAILED", reset);
    }
    println!("{bold}{cyan}{border}{reset}");
    for failure in &summary.failed {
        println!("  {} ({}): {}", failure.stub, failure.name, failure.error);
    }
    println!();
}
