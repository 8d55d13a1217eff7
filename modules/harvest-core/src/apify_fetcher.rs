// Fetcher backed by the Apify tweet-scraper actor. A navigation runs the
// search to completion; each advance-step reads the next page of its dataset.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};

use apify_client::{ApifyClient, ApifyError, Tweet};
use harvest_common::{BackendConfig, FetchError, RawUnit, SearchTab};

use crate::fetcher::{EntryPoint, Fetcher};

/// Twitter's legacy `created_at` format, e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const TWITTER_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

pub struct ApifyFetcher {
    client: ApifyClient,
    page_size: u32,
    max_items: u32,
    tab: SearchTab,
    dataset: Option<String>,
    offset: usize,
}

impl ApifyFetcher {
    pub fn new(client: ApifyClient, backend: &BackendConfig) -> Self {
        Self {
            client,
            page_size: backend.page_size,
            max_items: backend.max_items,
            tab: backend.search_tab,
            dataset: None,
            offset: 0,
        }
    }

    fn sort(&self) -> &'static str {
        match self.tab {
            SearchTab::Latest => "Latest",
            _ => "Top",
        }
    }
}

#[async_trait]
impl Fetcher for ApifyFetcher {
    fn name(&self) -> &str {
        "apify"
    }

    fn entry_point(&self, query_text: &str) -> EntryPoint {
        EntryPoint::new(query_text)
    }

    async fn navigate(&mut self, entry: &EntryPoint) -> Result<(), FetchError> {
        self.dataset = None;
        self.offset = 0;

        let run = self
            .client
            .search_tweets(&[entry.as_str()], self.max_items, self.sort())
            .await
            .map_err(fetch_error)?;

        info!(run_id = %run.id, dataset_id = %run.default_dataset_id, "Search run ready");
        self.dataset = Some(run.default_dataset_id);
        Ok(())
    }

    async fn advance(&mut self) -> Result<Vec<RawUnit>, FetchError> {
        let dataset = self
            .dataset
            .as_deref()
            .ok_or_else(|| FetchError::Fatal("advance called before navigate".into()))?;

        let items: Vec<serde_json::Value> = self
            .client
            .get_dataset_page(dataset, self.offset, self.page_size)
            .await
            .map_err(fetch_error)?;

        let start = self.offset;
        // Skipped items still occupy dataset positions.
        self.offset += items.len();
        debug!(offset = start, count = items.len(), "Fetched dataset page");
        Ok(page_to_units(items, start))
    }

    async fn close(&mut self) -> Result<(), FetchError> {
        self.dataset = None;
        Ok(())
    }
}

/// Network hiccups and rate limiting are worth retrying; everything else
/// (bad token, failed run, unparsable payload) ends the query.
fn fetch_error(e: ApifyError) -> FetchError {
    if e.is_transient() {
        FetchError::Transient(e.to_string())
    } else {
        FetchError::Fatal(e.to_string())
    }
}

/// Decode a dataset page item by item. An item that does not have the
/// expected shape is logged and skipped; the rest of the page survives.
fn page_to_units(items: Vec<serde_json::Value>, offset: usize) -> Vec<RawUnit> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<Tweet>(item) {
            Ok(tweet) => Some(tweet_to_unit(&tweet)),
            Err(e) => {
                warn!(position = offset + i, error = %e, "Skipping malformed dataset item");
                None
            }
        })
        .collect()
}

fn tweet_to_unit(tweet: &Tweet) -> RawUnit {
    let author = tweet.author.as_ref();
    RawUnit {
        source_id: tweet.id.clone(),
        author_handle: author.and_then(|a| a.user_name.clone()),
        author_href: author.and_then(|a| a.url.clone()),
        display_name: author.and_then(|a| a.name.clone()),
        timestamp: tweet.created_at.as_deref().map(normalize_timestamp),
        text: tweet.content().map(String::from),
        truncated: false,
        image_urls: tweet.media_urls(),
        likes_text: tweet.like_count.map(|n| n.to_string()),
        retweets_text: tweet.retweet_count.map(|n| n.to_string()),
    }
}

/// RFC 3339 input is kept as-is. Twitter-style dates are converted to UTC
/// RFC 3339 with millisecond precision. Anything else passes through and is
/// rejected later by identity validation.
fn normalize_timestamp(raw: &str) -> String {
    let raw = raw.trim();
    if DateTime::parse_from_rfc3339(raw).is_ok() {
        return raw.to_string();
    }
    match DateTime::parse_from_str(raw, TWITTER_DATE_FORMAT) {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        Err(_) => raw.to_string(),
    }
}
