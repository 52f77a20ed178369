use anyhow::{Context, Result};
use reqwest::Url;
use std::collections::HashSet;
use tracing::{info, warn};

use crate::{
    constants::PRIMARY_COLLECTION,
    fetch::Fetcher,
    fhir::{Bundle, PractitionerRole},
};

#[derive(Debug, Default)]
pub struct PageCrawl {
    pub records: Vec<PractitionerRole>,
    pub pages: usize,
    /// Entries that could not be read as a PractitionerRole and were left out.
    pub skipped: usize,
    /// True when the record limit stopped pagination early.
    pub limited: bool,
}

pub fn first_page_url(base_url: &Url, page_size: usize) -> Result<Url> {
    base_url
        .join(&format!("{PRIMARY_COLLECTION}?_count={page_size}"))
        .with_context(|| format!("Failed building {PRIMARY_COLLECTION} URL from {base_url}"))
}

/// Walks the PractitionerRole search pages of one payer, following `next`
/// links until there are none, a page comes back unavailable, or `limit`
/// records have been collected.
pub async fn fetch_all_practitioner_roles(
    fetcher: &Fetcher,
    base_url: &Url,
    page_size: usize,
    limit: Option<usize>,
) -> Result<PageCrawl> {
    let mut crawl = PageCrawl::default();
    let mut visited: HashSet<Url> = HashSet::new();
    let mut next_url = Some(first_page_url(base_url, page_size)?);

    if let Some(limit) = limit {
        info!(limit, "test mode: limiting {PRIMARY_COLLECTION} entries");
    }

    while let Some(url) = next_url.take() {
        if limit.is_some_and(|limit| crawl.records.len() >= limit) {
            crawl.limited = true;
            break;
        }
        if !visited.insert(url.clone()) {
            warn!(%url, "next link points at an already fetched page; stopping pagination");
            break;
        }

        info!(%url, page = crawl.pages + 1, "fetching {PRIMARY_COLLECTION} page");
        let Some(body) = fetcher.fetch_json(&url).await else {
            warn!(%url, "page unavailable; stopping pagination");
            break;
        };
        crawl.pages += 1;

        let bundle: Bundle = serde_json::from_value(body)
            .with_context(|| format!("Failed decoding Bundle from {url}"))?;
        let page_entries = bundle.entry.len();

        for entry in &bundle.entry {
            if entry.resource_type() != Some(PRIMARY_COLLECTION) {
                continue;
            }
            let Some(resource) = entry.resource.clone() else {
                continue;
            };
            let role = match serde_json::from_value::<PractitionerRole>(resource) {
                Ok(role) => role,
                Err(err) => {
                    warn!(%url, error = %err, "skipping undecodable {PRIMARY_COLLECTION} entry");
                    crawl.skipped += 1;
                    continue;
                }
            };
            crawl.records.push(role);
            if limit.is_some_and(|limit| crawl.records.len() >= limit) {
                break;
            }
        }
        info!(
            page_entries,
            total = crawl.records.len(),
            "retrieved {PRIMARY_COLLECTION} page"
        );

        if limit.is_some_and(|limit| crawl.records.len() >= limit) {
            info!(
                total = crawl.records.len(),
                "test mode: limit reached, stopping pagination"
            );
            crawl.limited = true;
            break;
        }

        next_url = match bundle.next_link() {
            Some(link) => Some(
                base_url
                    .join(link)
                    .with_context(|| format!("Invalid next link {link} on page {url}"))?,
            ),
            None => None,
        };
    }

    info!(
        total = crawl.records.len(),
        pages = crawl.pages,
        "fetched all {PRIMARY_COLLECTION} entries"
    );
    Ok(crawl)
}
