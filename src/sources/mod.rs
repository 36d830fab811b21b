pub mod karlancer;
pub mod pagination;
pub mod ponisha;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{CandidateListing, Source};

pub use karlancer::KarlancerSource;
pub use ponisha::PonishaSource;

/// One external origin of listings. Each implementation owns its page fetch,
/// page-count extraction and field mapping; the orchestrator only sees this.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn source(&self) -> Source;

    /// Every qualifying listing across all pages of the source.
    async fn fetch_all(&self) -> Result<Vec<CandidateListing>>;
}

// ---------------------------------------------------------------------------
// Field extraction helpers
// ---------------------------------------------------------------------------

/// Evaluate an ordered chain of extractors and keep the first hit.
pub(crate) fn first_of<T, R>(item: &T, chain: &[fn(&T) -> Option<R>]) -> Option<R> {
    chain.iter().find_map(|extract| extract(item))
}

/// Coerce a loosely-typed JSON scalar into an integer amount.
///
/// Integers, floats (truncated) and numeric strings are accepted. Zero counts
/// as absent so a fallback chain moves on to the next alias.
pub(crate) fn amount(value: Option<&Value>) -> Option<i64> {
    let parsed = match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    };
    parsed.filter(|n| *n != 0)
}

/// Identifier text from a string or a number. Empty strings are absent.
pub(crate) fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            _ => format!("{:.0}", n.as_f64().unwrap_or_default()),
        }),
        _ => None,
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
