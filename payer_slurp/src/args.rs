use clap::Parser;
use std::path::PathBuf;

use crate::common::project_root;
use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_OUTPUT_DIR, DEFAULT_PAGE_SIZE, DEFAULT_PAYERS_CSV,
    DEFAULT_TEST_LIMIT, DEFAULT_TEST_OUTPUT_DIR, DEFAULT_TIMEOUT_SECONDS,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "payer_slurp")]
#[command(about = "Crawl payer FHIR provider directories into per-payer relational CSV tables")]
pub struct Args {
    /// Payer endpoint table (payer_name, payer_stub, payer_provider_directory_fhir_url).
    /// If omitted, it defaults to <project root>/good_payer_endpoints.csv.
    #[arg(long)]
    pub payers_csv: Option<PathBuf>,

    /// Output root for full runs. One subdirectory per payer stub.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Output root used with --test, kept apart from full-run output.
    #[arg(long)]
    pub test_output_dir: Option<PathBuf>,

    /// Sample mode: stop paginating once --limit PractitionerRole entries are collected.
    #[arg(long, default_value_t = false)]
    pub test: bool,

    /// Number of PractitionerRole entries to process per payer in test mode.
    #[arg(long, default_value_t = DEFAULT_TEST_LIMIT)]
    pub limit: usize,

    /// Page size hint sent as _count on the first page request.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Total attempts per resource fetch before it is treated as unavailable.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Per-attempt HTTP timeout.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
    pub timeout_seconds: u64,

    /// Extra resolutions granted to an entity id whose fetch came back unavailable.
    ///
    /// 0 means every entity id is fetched at most once per payer run.
    #[arg(long, default_value_t = 0)]
    pub absent_refetch_limit: u32,

    /// Only crawl the given payer stubs (repeatable).
    #[arg(long = "payer")]
    pub payers: Vec<String>,
}

impl Args {
    pub fn payers_csv_path(&self) -> PathBuf {
        self.payers_csv
            .clone()
            .unwrap_or_else(|| project_root().join(DEFAULT_PAYERS_CSV))
    }

    /// Output root for this run, switched by --test.
    pub fn output_root(&self) -> PathBuf {
        if self.test {
            self.test_output_dir
                .clone()
                .unwrap_or_else(|| project_root().join(DEFAULT_TEST_OUTPUT_DIR))
        } else {
            self.output_dir
                .clone()
                .unwrap_or_else(|| project_root().join(DEFAULT_OUTPUT_DIR))
        }
    }

    /// Per-payer record cap; only set in test mode.
    pub fn record_limit(&self) -> Option<usize> {
        self.test.then_some(self.limit)
    }
}
