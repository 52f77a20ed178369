use anyhow::{Context, Result, bail};
use reqwest::{
    Client, Url,
    header::{ACCEPT, CONTENT_TYPE},
};
use serde_json::Value;
use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    common::truncate_for_log,
    constants::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECONDS, FHIR_JSON_MEDIA_TYPE, USER_AGENT},
};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Total attempts per logical fetch.
    pub max_retries: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Delay after the first failed attempt; doubles after each further failure.
    pub backoff_unit: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl FetchConfig {
    /// Sleep after the failed attempt with 0-based index `attempt`: `unit * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(1u32 << attempt.min(20))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchCounts {
    /// HTTP requests issued, retries included.
    pub requests: usize,
    pub failed_attempts: usize,
    /// Logical fetches that ran out of attempts and came back absent.
    pub exhausted: usize,
}

#[derive(Debug, Default)]
struct FetchStats {
    requests: AtomicUsize,
    failed_attempts: AtomicUsize,
    exhausted: AtomicUsize,
}

/// Single-resource JSON fetcher with bounded retry.
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
    stats: FetchStats,
}

pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .context("Failed creating HTTP client")
}

impl Fetcher {
    pub fn new(client: Client, config: FetchConfig) -> Self {
        Self {
            client,
            config,
            stats: FetchStats::default(),
        }
    }

    pub fn counts(&self) -> FetchCounts {
        FetchCounts {
            requests: self.stats.requests.load(Ordering::Relaxed),
            failed_attempts: self.stats.failed_attempts.load(Ordering::Relaxed),
            exhausted: self.stats.exhausted.load(Ordering::Relaxed),
        }
    }

    /// Fetches `url` as FHIR JSON. Transport errors, non-2xx statuses, and
    /// undecodable bodies are retried; `None` once every attempt has failed.
    pub async fn fetch_json(&self, url: &Url) -> Option<Value> {
        let attempts = self.config.max_retries.max(1);
        for attempt in 0..attempts {
            info!(%url, attempt = attempt + 1, attempts, "fetching");
            self.stats.requests.fetch_add(1, Ordering::Relaxed);
            match self.attempt(url).await {
                Ok(value) => return Some(value),
                Err(err) => {
                    self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        %url,
                        attempt = attempt + 1,
                        attempts,
                        error = %format!("{err:#}"),
                        "fetch attempt failed"
                    );
                    if attempt + 1 < attempts {
                        sleep(self.config.backoff_delay(attempt)).await;
                    }
                }
            }
        }
        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        warn!(%url, attempts, "giving up; resource treated as unavailable");
        None
    }

    async fn attempt(&self, url: &Url) -> Result<Value> {
        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, FHIR_JSON_MEDIA_TYPE)
            .header(CONTENT_TYPE, FHIR_JSON_MEDIA_TYPE)
            .timeout(self.config.timeout)
            .send()
            .await
            .with_context(|| format!("Request failed for {url}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Status {} from {}. Body: {}",
                status,
                url,
                truncate_for_log(&body)
            );
        }

        response
            .json::<Value>()
            .await
            .with_context(|| format!("Invalid JSON body from {url}"))
    }
}
