use std::future::Future;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::{page_timeout, PAGE_CONCURRENCY};
use crate::error::{AppError, Result};
use crate::types::{CandidateListing, Source};

/// One decoded page of a source.
#[derive(Debug, Default)]
pub struct Page {
    pub listings: Vec<CandidateListing>,
    /// Page count as reported by the source. `0` and `1` both mean "no more pages".
    pub total_pages: u32,
}

/// What to do when a page after the first one fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePolicy {
    /// Log the loss and keep whatever the other pages returned.
    SkipPage,
    /// Fail the whole source; in-flight sibling pages are dropped.
    AbortSource,
}

/// Drives the page-1-then-bounded-fan-out shape every source shares.
#[derive(Debug, Clone)]
pub struct Paginator {
    source: Source,
    policy: PagePolicy,
    concurrency: usize,
    page_timeout: Duration,
}

impl Paginator {
    pub fn new(source: Source, policy: PagePolicy) -> Self {
        Self {
            source,
            policy,
            concurrency: PAGE_CONCURRENCY,
            page_timeout: page_timeout(),
        }
    }

    /// Fetch page 1, learn the page count, then pull pages `2..=total` with at
    /// most `concurrency` requests in flight. Each page has its own timeout.
    pub async fn collect<F, Fut>(&self, fetch_page: F) -> Result<Vec<CandidateListing>>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<Page>>,
    {
        let source = self.source;

        debug!("[{source}] page 1");
        let first = self.fetch_one(1, &fetch_page).await.map_err(|e| {
            warn!(error = %e, "[{source}] failed on page 1");
            e
        })?;
        let total = first.total_pages;
        info!(
            source = %source,
            items = first.listings.len(),
            total_pages = total,
            "[{source}] page 1 found {} items",
            first.listings.len()
        );

        let mut listings = first.listings;
        if total <= 1 {
            return Ok(listings);
        }

        let fetch_page = &fetch_page;
        let mut pages = stream::iter(2..=total)
            .map(|page| async move {
                debug!("[{source}] page {page}/{total}");
                (page, self.fetch_one(page, fetch_page).await)
            })
            .buffer_unordered(self.concurrency.max(1));

        let mut skipped = 0usize;
        while let Some((page, result)) = pages.next().await {
            match result {
                Ok(p) => {
                    debug!(
                        "[{source}] page {page}/{total} found {} items",
                        p.listings.len()
                    );
                    listings.extend(p.listings);
                }
                Err(e) => match self.policy {
                    PagePolicy::SkipPage => {
                        skipped += 1;
                        warn!(error = %e, "[{source}] failed on page {page}, skipping");
                    }
                    PagePolicy::AbortSource => {
                        warn!(error = %e, "[{source}] failed on page {page}, aborting source");
                        return Err(e);
                    }
                },
            }
        }

        if skipped > 0 {
            warn!(
                source = %source,
                skipped,
                total_pages = total,
                "[{source}] returning partial results"
            );
        }
        Ok(listings)
    }

    async fn fetch_one<F, Fut>(&self, page: u32, fetch_page: &F) -> Result<Page>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<Page>>,
    {
        let after = self.page_timeout;
        match tokio::time::timeout(after, fetch_page(page)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::PageTimeout { page, after }),
        }
    }
}
