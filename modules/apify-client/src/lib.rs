pub mod error;
pub mod types;

pub use error::{ApifyError, Result};
pub use types::{RunData, Tweet, TweetAuthor, TweetEntities, TweetMedia, TweetSearchInput};

use serde::de::DeserializeOwned;
use types::ApiResponse;

const BASE_URL: &str = "https://api.apify.com/v2";

/// Actor ID for apidojo/tweet-scraper.
const TWEET_SCRAPER: &str = "61RPP7dywgiy0JPD0";

/// Seconds the API may hold a run-status request open before answering.
const WAIT_FOR_FINISH_SECS: u32 = 60;

pub struct ApifyClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApifyClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(BASE_URL, token)
    }

    /// Point the client at a different API root (proxies, local fakes).
    pub fn with_base_url(base_url: &str, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Start a keyword search run. Returns as soon as the run is queued.
    pub async fn start_tweet_search(
        &self,
        search_terms: &[&str],
        max_items: u32,
        sort: &str,
    ) -> Result<RunData> {
        let input = TweetSearchInput {
            search_terms: search_terms.iter().map(|s| s.to_string()).collect(),
            max_items,
            sort: sort.to_string(),
        };

        let url = format!("{}/acts/{}/runs", self.base_url, TWEET_SCRAPER);
        let request = self.client.post(&url).bearer_auth(&self.token).json(&input);
        let resp = send_checked(request).await?;
        let api_resp: ApiResponse<RunData> = resp.json().await?;
        Ok(api_resp.data)
    }

    /// Long-poll a run until it reaches a terminal status.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<RunData> {
        let url = format!(
            "{}/actor-runs/{}?waitForFinish={}",
            self.base_url, run_id, WAIT_FOR_FINISH_SECS
        );
        loop {
            let request = self.client.get(&url).bearer_auth(&self.token);
            let resp = send_checked(request).await?;
            let run = resp.json::<ApiResponse<RunData>>().await?.data;

            match run.status.as_str() {
                "SUCCEEDED" => return Ok(run),
                "FAILED" | "ABORTED" | "TIMED-OUT" => {
                    return Err(ApifyError::RunFailed(run.status));
                }
                status => tracing::debug!(run_id, status, "Run still in progress"),
            }
        }
    }

    /// Fetch one page of dataset items starting at `offset`. An empty page
    /// means the dataset is exhausted.
    pub async fn get_dataset_page<T: DeserializeOwned>(
        &self,
        dataset_id: &str,
        offset: usize,
        limit: u32,
    ) -> Result<Vec<T>> {
        let url = format!("{}/datasets/{}/items", self.base_url, dataset_id);
        let request = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("format", "json"), ("clean", "true")])
            .query(&[("offset", offset as u64), ("limit", u64::from(limit))]);

        let body = send_checked(request).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Run a keyword search to completion. The finished run's dataset can then
    /// be paged with [`ApifyClient::get_dataset_page`].
    pub async fn search_tweets(
        &self,
        search_terms: &[&str],
        max_items: u32,
        sort: &str,
    ) -> Result<RunData> {
        tracing::info!(?search_terms, max_items, sort, "Starting tweet search run");

        let run = self.start_tweet_search(search_terms, max_items, sort).await?;
        tracing::info!(run_id = %run.id, "Apify run started, polling for completion");

        let completed = self.wait_for_run(&run.id).await?;
        tracing::info!(
            run_id = %completed.id,
            dataset_id = %completed.default_dataset_id,
            "Run completed, dataset ready"
        );
        Ok(completed)
    }
}

/// Send a request and turn non-2xx responses into `ApifyError::Api`.
async fn send_checked(request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let resp = request.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(ApifyError::Api {
        status: status.as_u16(),
        message,
    })
}
