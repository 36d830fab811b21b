use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::orchestrator::Orchestrator;

/// Parse a cron expression. Classic 5-field expressions get a `0` seconds
/// field prepended; 6- and 7-field expressions are used as is.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let full = match expr.split_whitespace().count() {
        5 => format!("0 {expr}"),
        _ => expr.to_string(),
    };
    Schedule::from_str(&full)
        .map_err(|e| AppError::Cron(format!("invalid cron expression '{expr}': {e}")))
}

/// Fires a run on every cron tick until cancelled. Overlapping ticks are
/// no-ops thanks to the orchestrator's single-flight guard.
pub struct ScrapeScheduler {
    schedule: Schedule,
    expr: String,
    orchestrator: Arc<Orchestrator>,
    cancel: CancellationToken,
}

impl ScrapeScheduler {
    pub fn new(expr: &str, orchestrator: Arc<Orchestrator>, cancel: CancellationToken) -> Result<Self> {
        Ok(Self {
            schedule: parse_schedule(expr)?,
            expr: expr.trim().to_string(),
            orchestrator,
            cancel,
        })
    }

    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub async fn run(self) {
        info!(cron = %self.expr, "[scheduler] started");

        loop {
            let now = Utc::now();
            let Some(next) = self.next_fire(now) else {
                warn!(cron = %self.expr, "[scheduler] schedule has no upcoming fire time");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            info!(at = %next, "[scheduler] cron tick");
            let orchestrator = Arc::clone(&self.orchestrator);
            let run_cancel = self.cancel.child_token();
            tokio::spawn(async move {
                orchestrator.run(run_cancel).await;
            });
        }

        info!("[scheduler] stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryListingStore;
    use crate::notify::Notifier;
    use crate::types::CandidateListing;
    use chrono::TimeZone;

    struct NullNotifier;

    impl Notifier for NullNotifier {
        fn send_alert(&self, _listing: &CandidateListing) {}
    }

    fn orchestrator() -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new(
            Vec::new(),
            MemoryListingStore::new(),
            Arc::new(NullNotifier),
        ))
    }

    #[test]
    fn five_field_expression_fires_on_the_minute() {
        let s = ScrapeScheduler::new("*/7 * * * *", orchestrator(), CancellationToken::new()).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 30).unwrap();
        assert_eq!(
            s.next_fire(after),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 7, 0).unwrap())
        );
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 10, 57, 0).unwrap();
        assert_eq!(
            s.next_fire(after),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn six_field_expression_is_used_verbatim() {
        let schedule = parse_schedule("30 0 9 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        assert_eq!(
            schedule.after(&after).next(),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 30).unwrap())
        );
    }

    #[test]
    fn invalid_expression_is_a_cron_error() {
        assert!(matches!(parse_schedule("every 7 minutes"), Err(AppError::Cron(_))));
        assert!(matches!(parse_schedule(""), Err(AppError::Cron(_))));
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let cancel = CancellationToken::new();
        let s = ScrapeScheduler::new("0 0 1 1 *", orchestrator(), cancel.clone()).unwrap();
        let handle = tokio::spawn(s.run());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
