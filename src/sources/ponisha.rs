use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header;
use serde_json::Value;

use super::pagination::{Page, PagePolicy, Paginator};
use super::{amount, first_of, id_text, non_empty, SourceFetcher};
use crate::config::{PONISHA_BASE_URL, USER_AGENT};
use crate::error::{AppError, Result};
use crate::types::{format_budget_text, qualifies, CandidateListing, Source};

static NEXT_DATA: OnceLock<Regex> = OnceLock::new();

const ID: &[fn(&Value) -> Option<String>] = &[|p| id_text(p.get("id"))];
const AMOUNT_MIN: &[fn(&Value) -> Option<i64>] = &[|p| amount(p.get("amount_min"))];
const AMOUNT_MAX: &[fn(&Value) -> Option<i64>] = &[|p| amount(p.get("amount_max"))];

/// Ponisha search results. The listings are only available as the Next.js
/// dehydrated state embedded in the HTML, so every page is a scrape.
///
/// A failing page after the first one is skipped: the search index is large
/// and one flaky page should not hide the rest.
pub struct PonishaSource {
    client: reqwest::Client,
    base_url: String,
    paginator: Paginator,
}

impl PonishaSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            paginator: Paginator::new(Source::Ponisha, PagePolicy::SkipPage),
        }
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}/search/projects?page={page}&order=approved_at%7Cdesc&promotion=-&filterByProjectStatus=open",
            self.base_url
        )
    }

    async fn fetch_page(&self, page: u32) -> Result<Page> {
        let url = self.page_url(page);
        let resp = self
            .client
            .get(&url)
            .header(header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let html = resp.text().await?;
        parse_search_page(&html)
    }
}

#[async_trait]
impl SourceFetcher for PonishaSource {
    fn source(&self) -> Source {
        Source::Ponisha
    }

    async fn fetch_all(&self) -> Result<Vec<CandidateListing>> {
        self.paginator.collect(|page| self.fetch_page(page)).await
    }
}

// ---------------------------------------------------------------------------
// Page parsing
// ---------------------------------------------------------------------------

/// A page without the embedded state, or without a paginated projects query,
/// is an empty page rather than an error.
pub(crate) fn parse_search_page(html: &str) -> Result<Page> {
    let re = NEXT_DATA.get_or_init(|| {
        Regex::new(r#"(?is)<script[^>]*\bid\s*=\s*["']__NEXT_DATA__["'][^>]*>(.*?)</script>"#)
            .expect("next data regex")
    });

    let Some(script) = re.captures(html).and_then(|c| c.get(1)) else {
        return Ok(Page::default());
    };
    let raw = script.as_str().trim();
    if raw.is_empty() {
        return Ok(Page::default());
    }

    let payload: Value = serde_json::from_str(raw)
        .map_err(|e| AppError::Parse(format!("ponisha __NEXT_DATA__: {e}")))?;

    let Some(data) = projects_query(&payload).and_then(|q| q.pointer("/state/data")) else {
        return Ok(Page::default());
    };

    let total_pages = data
        .pointer("/meta/pagination/total_pages")
        .and_then(|v| amount(Some(v)))
        .map(|n| n.clamp(0, u32::MAX as i64) as u32)
        .unwrap_or(0);

    let listings = data
        .get("data")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_project).collect())
        .unwrap_or_default();

    Ok(Page {
        listings,
        total_pages,
    })
}

/// Prefer the `["search", "projects", ..]` query; fall back to any query that
/// carries pagination metadata.
fn projects_query(payload: &Value) -> Option<&Value> {
    let queries = payload
        .pointer("/props/pageProps/dehydratedState/queries")?
        .as_array()?;

    let has_pagination =
        |q: &&Value| q.pointer("/state/data/meta/pagination").is_some_and(Value::is_object);
    let is_search_projects = |q: &&Value| {
        q.get("queryKey")
            .and_then(Value::as_array)
            .is_some_and(|key| {
                key.len() >= 2
                    && key[0].as_str() == Some("search")
                    && key[1].as_str() == Some("projects")
            })
    };

    queries
        .iter()
        .filter(has_pagination)
        .find(is_search_projects)
        .or_else(|| queries.iter().find(has_pagination))
}

fn parse_project(item: &Value) -> Option<CandidateListing> {
    if !item.is_object() {
        return None;
    }
    let id = first_of(item, ID)?;
    let amount_min = first_of(item, AMOUNT_MIN).unwrap_or(0);
    let amount_max = first_of(item, AMOUNT_MAX).unwrap_or(0);
    if !qualifies(amount_min, amount_max) {
        return None;
    }

    let text = |key: &str| non_empty(item.get(key).and_then(Value::as_str)).unwrap_or_default();
    let slug = text("slug");

    let skills = item
        .get("skills")
        .and_then(Value::as_array)
        .map(|skills| {
            skills
                .iter()
                .filter_map(|s| non_empty(s.get("name").and_then(Value::as_str)))
                .collect()
        })
        .unwrap_or_default();

    let bids_count = item
        .get("project_bids_count")
        .filter(|v| !v.is_null())
        .map(|v| amount(Some(v)).unwrap_or(0));

    Some(CandidateListing {
        source: Source::Ponisha.to_string(),
        link: format!("{PONISHA_BASE_URL}/project/{id}/{slug}"),
        external_id: id,
        title: text("title"),
        budget_text: format_budget_text(amount_min, amount_max),
        amount_min,
        amount_max,
        description: text("description"),
        skills,
        approved_at: text("approved_at"),
        bidding_closed_at: text("bidding_closed_at"),
        bids_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn html(queries: Value) -> String {
        let next = json!({
            "props": {"pageProps": {"dehydratedState": {"queries": queries}}}
        });
        format!(
            "<html><head></head><body><div id=\"__next\"></div>\
             <script id=\"__NEXT_DATA__\" type=\"application/json\">{next}</script></body></html>"
        )
    }

    fn search_query(total_pages: u32, items: Vec<Value>) -> Value {
        json!({
            "queryKey": ["search", "projects", {"page": 1}],
            "state": {"data": {
                "data": items,
                "meta": {"pagination": {"total_pages": total_pages, "current_page": 1}}
            }}
        })
    }

    fn project(id: u64, min: i64, max: i64) -> Value {
        json!({
            "id": id,
            "slug": format!("project-{id}"),
            "title": format!("Project {id}"),
            "description": "Build a marketplace",
            "amount_min": min,
            "amount_max": max,
            "approved_at": "2024-03-20 10:30:00",
            "bidding_closed_at": "2024-04-20T10:30:00Z",
            "project_bids_count": 7,
            "skills": [{"name": "Rust"}, {"name": ""}, {"name": "PostgreSQL"}]
        })
    }

    #[test]
    fn parses_qualifying_projects() {
        let page = parse_search_page(&html(json!([search_query(
            3,
            vec![project(11, 0, 150_000_000), project(12, 10_000_000, 50_000_000)]
        )])))
        .unwrap();

        assert_eq!(page.total_pages, 3);
        assert_eq!(page.listings.len(), 1);
        let l = &page.listings[0];
        assert_eq!(l.source, "ponisha");
        assert_eq!(l.external_id, "11");
        assert_eq!(l.link, "https://ponisha.ir/project/11/project-11");
        assert_eq!(l.skills, vec!["Rust", "PostgreSQL"]);
        assert_eq!(l.bids_count, Some(7));
        assert_eq!(l.budget_text, "تا 150,000,000 تومان");
    }

    #[test]
    fn prefers_the_search_projects_query() {
        let other = json!({
            "queryKey": ["categories"],
            "state": {"data": {
                "data": [project(1, 0, 500_000_000)],
                "meta": {"pagination": {"total_pages": 9}}
            }}
        });
        let page = parse_search_page(&html(json!([
            other,
            search_query(2, vec![project(2, 0, 500_000_000)])
        ])))
        .unwrap();
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.listings[0].external_id, "2");
    }

    #[test]
    fn falls_back_to_any_paginated_query() {
        let q = json!({
            "queryKey": ["projects-list"],
            "state": {"data": {
                "data": [project(5, 0, 200_000_000)],
                "meta": {"pagination": {"total_pages": "4"}}
            }}
        });
        let page = parse_search_page(&html(json!([{"queryKey": ["me"]}, q]))).unwrap();
        assert_eq!(page.total_pages, 4);
        assert_eq!(page.listings.len(), 1);
    }

    #[test]
    fn missing_state_is_an_empty_page() {
        let page = parse_search_page("<html><body>maintenance</body></html>").unwrap();
        assert_eq!(page.total_pages, 0);
        assert!(page.listings.is_empty());

        let page = parse_search_page(&html(json!([{"queryKey": ["me"]}]))).unwrap();
        assert!(page.listings.is_empty());
    }

    #[test]
    fn malformed_state_is_a_parse_error() {
        let err = parse_search_page(
            "<script id=\"__NEXT_DATA__\" type=\"application/json\">{not json</script>",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn items_without_id_are_dropped() {
        let mut no_id = project(0, 0, 300_000_000);
        no_id["id"] = json!("");
        let page = parse_search_page(&html(json!([search_query(1, vec![no_id])]))).unwrap();
        assert!(page.listings.is_empty());
    }

    async fn mount_page(server: &MockServer, page: u32, body: String) {
        Mock::given(method("GET"))
            .and(path("/search/projects"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn failed_page_is_skipped() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            1,
            html(json!([search_query(3, vec![project(1, 0, 120_000_000)])])),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/search/projects"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;
        mount_page(
            &server,
            3,
            html(json!([search_query(3, vec![project(3, 0, 130_000_000)])])),
        )
        .await;

        let source = PonishaSource::new(reqwest::Client::new(), server.uri());
        let mut ids: Vec<String> = source
            .fetch_all()
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.external_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn first_page_failure_fails_the_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = PonishaSource::new(reqwest::Client::new(), server.uri());
        let err = source.fetch_all().await.unwrap_err();
        assert!(matches!(err, AppError::Status { status: 503, .. }));
    }
}
