use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::ListingStore;
use crate::notify::Notifier;
use crate::sources::SourceFetcher;
use crate::types::{CandidateListing, Source};

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

/// Per-source counters for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub fetched: usize,
    pub over_threshold: usize,
    pub saved: usize,
    pub duplicates: usize,
    pub below_threshold: usize,
    pub store_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    Failed(String),
    /// The run was cancelled while this source was still fetching.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub status: FetchStatus,
    pub stats: RunStats,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub sources: BTreeMap<Source, SourceReport>,
}

impl RunReport {
    pub fn stats(&self, source: Source) -> Option<&RunStats> {
        self.sources.get(&source).map(|r| &r.stats)
    }

    pub fn status(&self, source: Source) -> Option<&FetchStatus> {
        self.sources.get(&source).map(|r| &r.status)
    }

    pub fn total_saved(&self) -> usize {
        self.sources.values().map(|r| r.stats.saved).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another run was already in progress; nothing was done.
    Skipped,
    Completed(RunReport),
}

// ---------------------------------------------------------------------------
// Single-flight
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
}

/// Holds the `Running` state; dropping it (on any exit path) returns to `Idle`.
struct RunGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *lock(self.state) = RunState::Idle;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct SourceBatch {
    source: Source,
    status: FetchStatus,
    listings: Vec<CandidateListing>,
}

type StatsTable = Arc<Mutex<BTreeMap<Source, RunStats>>>;

/// Scrape → filter → insert-if-absent → notify, at most one run at a time.
pub struct Orchestrator {
    sources: Vec<Arc<dyn SourceFetcher>>,
    store: Arc<dyn ListingStore>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<RunState>,
}

impl Orchestrator {
    pub fn new(
        sources: Vec<Arc<dyn SourceFetcher>>,
        store: Arc<dyn ListingStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            sources,
            store,
            notifier,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.state) == RunState::Running
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        let mut state = lock(&self.state);
        if *state == RunState::Running {
            return None;
        }
        *state = RunState::Running;
        Some(RunGuard { state: &self.state })
    }

    /// One full run. Returns immediately with `Skipped` if a run is already in
    /// progress. Cancelling `cancel` aborts in-flight fetches.
    pub async fn run(&self, cancel: CancellationToken) -> RunOutcome {
        let Some(_guard) = self.try_begin() else {
            info!("Scrape already running; skipping");
            return RunOutcome::Skipped;
        };

        let started = Instant::now();
        info!(sources = self.sources.len(), "Scraping started");

        let stats: StatsTable = Arc::new(Mutex::new(BTreeMap::new()));
        let batches = self.fetch_all_sources(&cancel, &stats).await;

        let mut statuses: BTreeMap<Source, FetchStatus> = self
            .sources
            .iter()
            .map(|s| (s.source(), FetchStatus::Failed("source task did not report".to_string())))
            .collect();

        for batch in batches {
            statuses.insert(batch.source, batch.status);
            for listing in batch.listings {
                if cancel.is_cancelled() {
                    debug!("[{}] run cancelled, skipping remaining listings", batch.source);
                    break;
                }
                self.process_listing(batch.source, listing, &stats).await;
            }
        }

        let stats = std::mem::take(&mut *lock(&stats));
        let report = RunReport {
            sources: statuses
                .into_iter()
                .map(|(source, status)| {
                    let stats = stats.get(&source).cloned().unwrap_or_default();
                    (source, SourceReport { status, stats })
                })
                .collect(),
        };

        for (source, r) in &report.sources {
            let s = &r.stats;
            info!(
                source = %source,
                fetched = s.fetched,
                over_threshold = s.over_threshold,
                saved = s.saved,
                duplicates = s.duplicates,
                below_threshold = s.below_threshold,
                store_failures = s.store_failures,
                "[{source}] summary: fetched={} overThreshold={} saved={} duplicates={} belowThreshold={}",
                s.fetched, s.over_threshold, s.saved, s.duplicates, s.below_threshold,
            );
        }
        info!(
            saved = report.total_saved(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Scraping finished"
        );

        RunOutcome::Completed(report)
    }

    /// Fan out to every source, wait for all of them, and hand back whatever
    /// each one produced. A failing or cancelled source yields an empty batch.
    async fn fetch_all_sources(
        &self,
        cancel: &CancellationToken,
        stats: &StatsTable,
    ) -> Vec<SourceBatch> {
        let (tx, mut rx) = mpsc::channel::<SourceBatch>(self.sources.len().max(1));
        let mut tasks = JoinSet::new();

        for fetcher in &self.sources {
            let fetcher = Arc::clone(fetcher);
            let tx = tx.clone();
            let cancel = cancel.clone();
            let stats = Arc::clone(stats);

            tasks.spawn(async move {
                let source = fetcher.source();
                debug!("[{source}] scraping...");

                let (status, listings) = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("[{source}] fetch cancelled");
                        (FetchStatus::Cancelled, Vec::new())
                    }
                    result = fetcher.fetch_all() => match result {
                        Ok(listings) => {
                            info!(source = %source, found = listings.len(), "[{source}] found {} projects", listings.len());
                            (FetchStatus::Ok, listings)
                        }
                        Err(e) => {
                            error!(source = %source, error = %e, "[{source}] scrape failed");
                            (FetchStatus::Failed(e.to_string()), Vec::new())
                        }
                    },
                };

                lock(&stats).entry(source).or_default().fetched += listings.len();
                let _ = tx
                    .send(SourceBatch {
                        source,
                        status,
                        listings,
                    })
                    .await;
            });
        }
        drop(tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Source task ended abnormally: {e}");
            }
        }

        let mut batches = Vec::with_capacity(self.sources.len());
        while let Some(batch) = rx.recv().await {
            batches.push(batch);
        }
        batches
    }

    async fn process_listing(&self, source: Source, listing: CandidateListing, stats: &StatsTable) {
        if !listing.qualifies() {
            lock(stats).entry(source).or_default().below_threshold += 1;
            return;
        }
        lock(stats).entry(source).or_default().over_threshold += 1;

        match self.store.insert_if_absent(&listing.to_new_listing()).await {
            Err(e) => {
                warn!(
                    source = %source,
                    external_id = %listing.external_id,
                    error = %e,
                    "[{source}] insert failed"
                );
                lock(stats).entry(source).or_default().store_failures += 1;
            }
            Ok((_, false)) => {
                lock(stats).entry(source).or_default().duplicates += 1;
                if source.traces_duplicates() {
                    debug!(
                        external_id = %listing.external_id,
                        title = %listing.title,
                        amount_min = listing.amount_min,
                        amount_max = listing.amount_max,
                        link = %listing.link,
                        "[{source}] duplicate high-budget project"
                    );
                }
            }
            Ok((stored, true)) => {
                lock(stats).entry(source).or_default().saved += 1;
                let alert = CandidateListing {
                    source: stored.source,
                    link: stored.link,
                    ..listing
                };
                self.notifier.send_alert(&alert);
            }
        }
    }
}
