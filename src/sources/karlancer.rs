use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;
use serde_json::Value;

use super::pagination::{Page, PagePolicy, Paginator};
use super::{amount, first_of, id_text, non_empty, SourceFetcher};
use crate::config::{KARLANCER_BASE_URL, USER_AGENT};
use crate::error::{AppError, Result};
use crate::types::{format_budget_text, qualifies, CandidateListing, Source};

const UNTITLED: &str = "بدون عنوان";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    last_page: Option<Value>,
    #[serde(default)]
    data: Option<Vec<KarlancerProject>>,
}

/// The API has changed field names over time; every alias is kept and the
/// extractor chains below decide which one wins.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KarlancerProject {
    id: Option<Value>,
    uuid: Option<Value>,
    #[serde(rename = "_id")]
    alt_id: Option<Value>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    min_budget: Option<Value>,
    budget_from: Option<Value>,
    amount_min: Option<Value>,
    price_min: Option<Value>,
    max_budget: Option<Value>,
    budget_to: Option<Value>,
    amount_max: Option<Value>,
    price_max: Option<Value>,
    published_at: Option<String>,
    approved_at: Option<String>,
    expired_at: Option<String>,
    #[serde(rename = "expiredAt")]
    expired_at_alt: Option<String>,
    bids_count: Option<Value>,
    #[serde(rename = "bidsCount")]
    bids_count_alt: Option<Value>,
    skills: Option<Vec<KarlancerSkill>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KarlancerSkill {
    name: Option<String>,
    title: Option<String>,
}

// ---------------------------------------------------------------------------
// Extractor chains, highest priority first
// ---------------------------------------------------------------------------

type Extract<R> = fn(&KarlancerProject) -> Option<R>;

const ID: &[Extract<String>] = &[
    |p| id_text(p.id.as_ref()),
    |p| id_text(p.uuid.as_ref()),
    |p| id_text(p.alt_id.as_ref()),
];

const AMOUNT_MIN: &[Extract<i64>] = &[
    |p| amount(p.min_budget.as_ref()),
    |p| amount(p.budget_from.as_ref()),
    |p| amount(p.amount_min.as_ref()),
    |p| amount(p.price_min.as_ref()),
];

const AMOUNT_MAX: &[Extract<i64>] = &[
    |p| amount(p.max_budget.as_ref()),
    |p| amount(p.budget_to.as_ref()),
    |p| amount(p.amount_max.as_ref()),
    |p| amount(p.price_max.as_ref()),
];

const APPROVED_AT: &[Extract<String>] = &[
    |p| non_empty(p.published_at.as_deref()),
    |p| non_empty(p.approved_at.as_deref()),
];

const BIDDING_CLOSED_AT: &[Extract<String>] = &[
    |p| non_empty(p.expired_at.as_deref()),
    |p| non_empty(p.expired_at_alt.as_deref()),
];

const BIDS_COUNT: &[Extract<i64>] = &[
    |p| p.bids_count.as_ref().and_then(Value::as_i64),
    |p| p.bids_count_alt.as_ref().and_then(Value::as_i64),
];

/// Karlancer public search API.
///
/// Any failing page aborts the whole source for the run. The API is a cheap
/// JSON endpoint, so a failure usually means the service is down rather than
/// a single bad page.
pub struct KarlancerSource {
    client: reqwest::Client,
    base_url: String,
    paginator: Paginator,
}

impl KarlancerSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            paginator: Paginator::new(Source::Karlancer, PagePolicy::AbortSource),
        }
    }

    async fn fetch_page(&self, page: u32) -> Result<Page> {
        let url = format!("{}/api/publics/search/projects", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("page", page.to_string()), ("order", "newest".to_string())])
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/json, text/plain, */*")
            .header(header::REFERER, format!("{KARLANCER_BASE_URL}/"))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = resp.text().await?;
        parse_search_response(&body)
    }
}

#[async_trait]
impl SourceFetcher for KarlancerSource {
    fn source(&self) -> Source {
        Source::Karlancer
    }

    async fn fetch_all(&self) -> Result<Vec<CandidateListing>> {
        self.paginator.collect(|page| self.fetch_page(page)).await
    }
}

pub(crate) fn parse_search_response(body: &str) -> Result<Page> {
    let resp: SearchResponse = serde_json::from_str(body)?;
    let Some(data) = resp.data else {
        return Ok(Page::default());
    };

    let total_pages = amount(data.last_page.as_ref())
        .map(|n| n.clamp(0, u32::MAX as i64) as u32)
        .unwrap_or(0);

    let listings = data
        .data
        .unwrap_or_default()
        .iter()
        .filter_map(to_listing)
        .collect();

    Ok(Page {
        listings,
        total_pages,
    })
}

fn to_listing(p: &KarlancerProject) -> Option<CandidateListing> {
    let id = first_of(p, ID)?;
    let amount_min = first_of(p, AMOUNT_MIN).unwrap_or(0);
    let amount_max = first_of(p, AMOUNT_MAX).unwrap_or(0);
    if !qualifies(amount_min, amount_max) {
        return None;
    }

    let slug = non_empty(p.url.as_deref()).unwrap_or_else(|| id.clone());
    let skills = p
        .skills
        .iter()
        .flatten()
        .filter_map(|s| non_empty(s.name.as_deref()).or_else(|| non_empty(s.title.as_deref())))
        .collect();

    Some(CandidateListing {
        source: Source::Karlancer.to_string(),
        external_id: id,
        title: non_empty(p.title.as_deref()).unwrap_or_else(|| UNTITLED.to_string()),
        link: format!("{KARLANCER_BASE_URL}/projects/{slug}"),
        budget_text: format_budget_text(amount_min, amount_max),
        amount_min,
        amount_max,
        description: p.description.clone().unwrap_or_default(),
        skills,
        approved_at: first_of(p, APPROVED_AT).unwrap_or_default(),
        bidding_closed_at: first_of(p, BIDDING_CLOSED_AT).unwrap_or_default(),
        bids_count: first_of(p, BIDS_COUNT),
    })
}
