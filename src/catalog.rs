//! Authenticated CMR search.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Response;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, ServiceErrorBody};
use crate::granule::{CollectionSummary, GranuleRecord, LinkFilter};
use crate::http::{HttpSession, parse_json, read_text};
use crate::query::CatalogQuery;
use crate::token::{TokenLifecycleManager, TokenSource};
use crate::util::urljoin;

const HITS_HEADER: &str = "CMR-Hits";
const SEARCH_AFTER_HEADER: &str = "CMR-Search-After";

/// Filters for [`CatalogClient::list_collections`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    pub provider: Option<String>,
    pub project: Option<String>,
    pub cloud_hosted: bool,
    pub has_granules: bool,
    pub page_size: usize,
}

impl Default for CollectionQuery {
    fn default() -> Self {
        Self {
            provider: None,
            project: None,
            cloud_hosted: true,
            has_granules: true,
            page_size: 100,
        }
    }
}

impl CollectionQuery {
    /// Cloud-hosted collections of one provider and project, e.g.
    /// `LPCLOUD` / `ECOSTRESS`.
    pub fn for_project(provider: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            project: Some(project.into()),
            ..Self::default()
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("cloud_hosted", self.cloud_hosted.to_string()),
            ("has_granules", self.has_granules.to_string()),
        ];
        if let Some(p) = &self.provider {
            params.push(("provider", p.clone()));
        }
        if let Some(p) = &self.project {
            params.push(("project", p.clone()));
        }
        params.push(("page_size", self.page_size.to_string()));
        params
    }
}

/// Everything a granule search produced.
#[derive(Debug, Default)]
pub struct SearchResults {
    pub granules: Vec<GranuleRecord>,
    /// Entries that could not be turned into records.
    pub rejected: Vec<Error>,
    /// Total hits reported by the catalog.
    pub hits: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    feed: Feed,
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    entry: Vec<Value>,
}

struct Page {
    entries: Vec<Value>,
    hits: Option<u64>,
    search_after: Option<String>,
}

/// CMR search client authenticated with Earthdata Login bearer tokens.
#[derive(Debug)]
pub struct CatalogClient<T = Arc<TokenLifecycleManager>> {
    http: HttpSession,
    base_url: String,
    auth_host: String,
    tokens: T,
    links: LinkFilter,
    progress: bool,
}

impl<T: TokenSource> CatalogClient<T> {
    /// `base_url` is the CMR search root, e.g.
    /// `https://cmr.earthdata.nasa.gov/search`; tokens are requested for
    /// `auth_host`.
    pub fn new(http: HttpSession, base_url: impl Into<String>, auth_host: impl Into<String>, tokens: T) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            auth_host: auth_host.into(),
            tokens,
            links: LinkFilter::default(),
            progress: false,
        }
    }

    pub fn with_link_filter(mut self, links: LinkFilter) -> Self {
        self.links = links;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Granules matching `query`. Malformed entries are logged and skipped.
    pub fn search(&self, query: &CatalogQuery) -> Result<Vec<GranuleRecord>> {
        Ok(self.search_detailed(query)?.granules)
    }

    pub fn search_detailed(&self, query: &CatalogQuery) -> Result<SearchResults> {
        let url = urljoin(&self.base_url, "granules.json");
        let params = query.params();

        let pb = if self.progress {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {pos}/{len} granules {wide_bar} {eta}") {
                pb.set_style(style.progress_chars("=>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        let mut results = SearchResults::default();
        let mut search_after: Option<String> = None;
        let mut pages = 0usize;

        loop {
            pages += 1;
            let page = self.get_page(&url, &params, search_after.as_deref())?;

            if pages == 1 {
                results.hits = page.hits;
                if let Some(hits) = page.hits {
                    pb.set_length(hits);
                }
                info!(
                    collection = %query.collection_id,
                    hits = page.hits.unwrap_or_default(),
                    "granule search"
                );
            }

            let count = page.entries.len();
            for entry in &page.entries {
                match GranuleRecord::from_entry(entry, &self.links) {
                    Ok(g) => {
                        debug!(id = %g.id, data_center = %g.data_center, dataset = %g.dataset_id, "granule");
                        results.granules.push(g);
                    }
                    Err(e) => {
                        warn!(error = %e, "skipping malformed granule entry");
                        results.rejected.push(e);
                    }
                }
            }
            pb.inc(count as u64);

            let seen = (results.granules.len() + results.rejected.len()) as u64;
            let done = count < query.page_size
                || page.search_after.is_none()
                || results.hits.is_some_and(|h| seen >= h)
                || query.max_pages.is_some_and(|m| pages >= m);
            if done {
                break;
            }
            search_after = page.search_after;
        }

        pb.finish_and_clear();
        Ok(results)
    }

    /// Collections matching `query`, for discovery.
    pub fn list_collections(&self, query: &CollectionQuery) -> Result<Vec<CollectionSummary>> {
        let url = urljoin(&self.base_url, "collections.json");
        let page = self.get_page(&url, &query.params(), None)?;
        info!(hits = page.hits.unwrap_or_default(), "collection search");

        let mut out = Vec::with_capacity(page.entries.len());
        for entry in page.entries {
            match serde_json::from_value::<CollectionSummary>(entry) {
                Ok(c) => {
                    debug!(
                        archive_center = c.archive_center.as_deref().unwrap_or(""),
                        dataset = c.dataset_id.as_deref().unwrap_or(""),
                        id = %c.concept_id,
                        "collection"
                    );
                    out.push(c);
                }
                Err(e) => warn!(error = %e, "skipping malformed collection entry"),
            }
        }
        Ok(out)
    }

    fn get_page(&self, url: &str, params: &[(&'static str, String)], search_after: Option<&str>) -> Result<Page> {
        let token = self.tokens.bearer_token(&self.auth_host)?;

        let resp = self.http.robust_request(url, |c| {
            let mut req = c
                .get(url)
                .bearer_auth(&token.value)
                .header(ACCEPT, "application/json")
                .query(params);
            if let Some(sa) = search_after {
                req = req.header(SEARCH_AFTER_HEADER, sa);
            }
            req.send()
        })?;

        let hits = header(&resp, HITS_HEADER).and_then(|h| h.parse::<u64>().ok());
        let next = header(&resp, SEARCH_AFTER_HEADER);
        let (status, text) = read_text(url, resp)?;

        if !status.is_success() {
            let (code, description) = ServiceErrorBody::parse(&text).code_and_description(status, &text);
            return Err(Error::CatalogQuery {
                status: status.as_u16(),
                code,
                description,
            });
        }

        let envelope: FeedEnvelope = parse_json(url, &text)?;
        Ok(Page {
            entries: envelope.feed.entry,
            hits,
            search_after: next,
        })
    }
}

fn header(resp: &Response, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_query_defaults_match_cloud_discovery() {
        let q = CollectionQuery::for_project("LPCLOUD", "ECOSTRESS");
        assert_eq!(
            q.params(),
            vec![
                ("cloud_hosted", "true".to_string()),
                ("has_granules", "true".to_string()),
                ("provider", "LPCLOUD".to_string()),
                ("project", "ECOSTRESS".to_string()),
                ("page_size", "100".to_string()),
            ]
        );
    }
}
