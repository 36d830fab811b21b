use chrono::{DateTime, Utc};

use crate::config::BUDGET_THRESHOLD;

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Source {
    Ponisha,
    Karlancer,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Ponisha => "ponisha",
            Source::Karlancer => "karlancer",
        }
    }

    /// Sources whose already-stored high-budget listings get a debug line per run.
    pub fn traces_duplicates(&self) -> bool {
        matches!(self, Source::Karlancer)
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// A listing as scraped from a source page. Lives for one run only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateListing {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub link: String,
    pub budget_text: String,
    pub amount_min: i64,
    pub amount_max: i64,
    pub description: String,
    pub skills: Vec<String>,
    /// Opaque timestamp text as the source reported it.
    pub approved_at: String,
    pub bidding_closed_at: String,
    pub bids_count: Option<i64>,
}

impl CandidateListing {
    pub fn qualifies(&self) -> bool {
        qualifies(self.amount_min, self.amount_max)
    }

    /// The subset of fields the store persists.
    pub fn to_new_listing(&self) -> NewListing {
        NewListing {
            source: self.source.clone(),
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            link: self.link.clone(),
            budget_text: self.budget_text.clone(),
            amount_min: self.amount_min,
            amount_max: self.amount_max,
        }
    }
}

/// Insert payload for the listing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListing {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub link: String,
    pub budget_text: String,
    pub amount_min: i64,
    pub amount_max: i64,
}

/// A listing row as the store holds it. Never mutated after the first insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedListing {
    pub id: i64,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub link: String,
    pub budget_text: String,
    pub amount_min: i64,
    pub amount_max: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// True when either bound is strictly above [`BUDGET_THRESHOLD`].
pub fn qualifies(amount_min: i64, amount_max: i64) -> bool {
    amount_max > BUDGET_THRESHOLD || amount_min > BUDGET_THRESHOLD
}

/// Human-readable budget range in toman, as shown in alerts.
pub fn format_budget_text(amount_min: i64, amount_max: i64) -> String {
    match (amount_min > 0, amount_max > 0) {
        (true, true) => format!(
            "از {} تا {} تومان",
            group_thousands(amount_min),
            group_thousands(amount_max)
        ),
        (false, true) => format!("تا {} تومان", group_thousands(amount_max)),
        (true, false) => format!("از {} تومان", group_thousands(amount_min)),
        (false, false) => "نامشخص".to_string(),
    }
}

/// `1250000` → `1,250,000`.
pub fn group_thousands(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        out.push('-');
    }
    let lead = match digits.len() % 3 {
        0 => 3,
        n => n,
    };
    for (i, ch) in digits.chars().enumerate() {
        if i >= lead && (i - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
