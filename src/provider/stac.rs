//! Generic STAC API provider.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use stac::Item;
use std::time::Duration;
use toml::Table;
use tracing::debug;
use url::Url;

use super::{kwarg_str, Provider};
use crate::catalog::{CatalogItem, SearchQuery, PROVIDER_MAX_ITEMS};
use crate::error::ProviderError;

/// Items requested per page.
const PAGE_SIZE: usize = 100;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// One page of an item search.
#[derive(Deserialize, Debug)]
struct SearchPage {
    #[serde(default)]
    features: Vec<Item>,
    #[serde(default)]
    links: Vec<PageLink>,
}

#[derive(Deserialize, Debug)]
struct PageLink {
    rel: String,
    href: String,
    method: Option<String>,
    body: Option<Map<String, Value>>,
    #[serde(default)]
    merge: bool,
}

/// How to fetch the next page of results.
#[derive(Debug, Clone, PartialEq)]
enum NextPage {
    Get(Url),
    Post(Url, Map<String, Value>),
}

pub struct StacProvider {
    client: Client,
    search_url: Url,
    description: String,
    max_items: usize,
    /// Added to the query string of every search request.
    query_params: Vec<(String, String)>,
}

impl StacProvider {
    pub fn new(client_url: &str, description: impl Into<String>) -> Result<Self, ProviderError> {
        let description = description.into();
        let search_url = Url::parse(&format!("{}/search", client_url.trim_end_matches('/')))
            .map_err(|e| ProviderError::Misconfigured(description.clone(), e.to_string()))?;
        let client = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Misconfigured(description.clone(), e.to_string()))?;
        Ok(Self {
            client,
            search_url,
            description,
            max_items: PROVIDER_MAX_ITEMS,
            query_params: vec![],
        })
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    /// Builds from `kwargs.client_url`, required for a bare STAC provider.
    pub fn from_kwargs(kwargs: &Table) -> Result<Self, ProviderError> {
        let url = kwarg_str(kwargs, "client_url").ok_or(ProviderError::Misconfigured(
            "STAC".to_string(),
            "kwargs.client_url is required".to_string(),
        ))?;
        Self::new(url, format!("STAC API ({url})"))
    }

    pub fn search_url(&self) -> &Url {
        &self.search_url
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn search_body(&self, query: &SearchQuery, limit: usize) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("collections".into(), json!([query.collection]));
        body.insert("datetime".into(), json!(query.datetime));
        body.insert("limit".into(), json!(limit.min(PAGE_SIZE)));
        if let Some(region) = &query.region {
            body.insert("intersects".into(), region.geometry().clone());
        }
        body
    }

    fn page_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        let present: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query_params {
                if !present.contains(name) {
                    pairs.append_pair(name, value);
                }
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        url
    }

    async fn fetch_page(&self, page: &NextPage) -> Result<SearchPage> {
        let request = match page {
            NextPage::Get(url) => self.client.get(self.page_url(url)),
            NextPage::Post(url, body) => self.client.post(self.page_url(url)).json(body),
        };
        let page = request.send().await?.error_for_status()?.json().await?;
        Ok(page)
    }
}

fn next_page(links: Vec<PageLink>, previous: &Map<String, Value>) -> Result<Option<NextPage>> {
    let Some(link) = links.into_iter().find(|l| l.rel == "next") else {
        return Ok(None);
    };
    let url = Url::parse(&link.href).map_err(|e| anyhow!("Bad next link {}: {e}", link.href))?;
    let is_post = link
        .method
        .as_deref()
        .map(|m| m.eq_ignore_ascii_case("POST"))
        .unwrap_or(false);
    if !is_post {
        return Ok(Some(NextPage::Get(url)));
    }

    let body = match (link.body, link.merge) {
        (Some(body), true) => {
            let mut merged = previous.clone();
            merged.extend(body);
            merged
        }
        (Some(body), false) => body,
        (None, _) => previous.clone(),
    };
    Ok(Some(NextPage::Post(url, body)))
}

#[async_trait]
impl Provider for StacProvider {
    fn description(&self) -> &str {
        &self.description
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CatalogItem>> {
        let limit = query.item_limit(self.max_items);
        let mut items = vec![];
        let mut body = self.search_body(query, limit);
        let mut page = NextPage::Post(self.search_url.clone(), body.clone());

        while items.len() < limit {
            let SearchPage { features, links } = self.fetch_page(&page).await?;
            if features.is_empty() {
                break;
            }
            debug!(
                provider = %self.description,
                collection = %query.collection,
                page_items = features.len(),
                "received search page"
            );
            items.extend(
                features
                    .iter()
                    .take(limit - items.len())
                    .map(|item| CatalogItem::from_stac(item, &query.collection)),
            );
            match next_page(links, &body)? {
                Some(next) => {
                    if let NextPage::Post(_, next_body) = &next {
                        body = next_body.clone();
                    }
                    page = next;
                }
                None => break,
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    fn link(value: Value) -> PageLink {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_search_url() {
        let provider = StacProvider::new("https://example.com/api/stac/v1/", "Example").unwrap();
        assert_eq!(
            provider.search_url().as_str(),
            "https://example.com/api/stac/v1/search"
        );
        assert!(StacProvider::new("not a url", "Broken").is_err());
    }

    #[test]
    fn test_from_kwargs_requires_url() {
        assert!(StacProvider::from_kwargs(&Table::new()).is_err());
        let mut kwargs = Table::new();
        kwargs.insert("client_url".into(), "https://stac.example.com".into());
        let provider = StacProvider::from_kwargs(&kwargs).unwrap();
        assert_eq!(provider.description(), "STAC API (https://stac.example.com)");
    }

    #[test]
    fn test_search_body() {
        let provider = StacProvider::new("https://example.com", "Example").unwrap();
        let region = Region::from_geojson(json!({"type": "Point", "coordinates": [1.0, 2.0]})).unwrap();
        let query = SearchQuery {
            region: Some(region),
            datetime: "2022-01-01/2022-02-01".to_string(),
            collection: "sentinel-2-l2a".to_string(),
            max_items: 20,
        };
        let body = provider.search_body(&query, 20);
        assert_eq!(body["collections"], json!(["sentinel-2-l2a"]));
        assert_eq!(body["limit"], json!(20));
        assert_eq!(body["intersects"]["type"], "Point");

        let body = provider.search_body(&query, 5000);
        assert_eq!(body["limit"], json!(PAGE_SIZE));
    }

    #[test]
    fn test_page_url_query_params() {
        let provider = StacProvider::new("https://e.com", "Example").unwrap();
        let search = provider.search_url().clone();
        assert_eq!(provider.page_url(&search).as_str(), "https://e.com/search");

        let provider = provider.with_query_param("key", "abc");
        assert_eq!(provider.page_url(&search).as_str(), "https://e.com/search?key=abc");
        let next = Url::parse("https://e.com/search?token=t1&key=abc").unwrap();
        assert_eq!(
            provider.page_url(&next).as_str(),
            "https://e.com/search?token=t1&key=abc"
        );
    }

    #[test]
    fn test_next_page_get() {
        let links = vec![
            link(json!({"rel": "self", "href": "https://e.com/search"})),
            link(json!({"rel": "next", "href": "https://e.com/search?token=abc"})),
        ];
        let next = next_page(links, &Map::new()).unwrap();
        assert_eq!(
            next,
            Some(NextPage::Get(Url::parse("https://e.com/search?token=abc").unwrap()))
        );
    }

    #[test]
    fn test_next_page_post_merges_body() {
        let mut previous = Map::new();
        previous.insert("collections".into(), json!(["naip"]));
        let links = vec![link(json!({
            "rel": "next",
            "href": "https://e.com/search",
            "method": "POST",
            "body": {"token": "next:abc"},
            "merge": true
        }))];
        match next_page(links, &previous).unwrap() {
            Some(NextPage::Post(_, body)) => {
                assert_eq!(body["collections"], json!(["naip"]));
                assert_eq!(body["token"], "next:abc");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_no_next_page() {
        let links = vec![link(json!({"rel": "prev", "href": "https://e.com/search"}))];
        assert_eq!(next_page(links, &Map::new()).unwrap(), None);
    }
}
