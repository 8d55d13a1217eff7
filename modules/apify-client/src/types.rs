use serde::{Deserialize, Serialize};

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Input for X/Twitter keyword search via apidojo/tweet-scraper.
#[derive(Debug, Clone, Serialize)]
pub struct TweetSearchInput {
    #[serde(rename = "searchTerms")]
    pub search_terms: Vec<String>,
    #[serde(rename = "maxItems")]
    pub max_items: u32,
    /// "Top" or "Latest".
    pub sort: String,
}

/// Author info nested inside a Tweet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetAuthor {
    #[serde(rename = "userName")]
    pub user_name: Option<String>,
    pub name: Option<String>,
    pub url: Option<String>,
}

/// A media attachment on a tweet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetMedia {
    pub media_url_https: Option<String>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TweetEntities {
    #[serde(default)]
    pub media: Vec<TweetMedia>,
}

/// A single tweet from the Apify dataset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Tweet {
    pub id: Option<String>,
    pub text: Option<String>,
    #[serde(rename = "full_text", alias = "fullText")]
    pub full_text: Option<String>,
    /// Twitter-style date, e.g. "Wed Oct 10 20:19:24 +0000 2018".
    #[serde(rename = "created_at", alias = "createdAt")]
    pub created_at: Option<String>,
    pub author: Option<TweetAuthor>,
    #[serde(rename = "likeCount")]
    pub like_count: Option<i64>,
    #[serde(rename = "retweetCount")]
    pub retweet_count: Option<i64>,
    #[serde(rename = "extendedEntities")]
    pub extended_entities: Option<TweetEntities>,
}

impl Tweet {
    /// Returns whichever text field is populated, preferring `full_text`.
    pub fn content(&self) -> Option<&str> {
        self.full_text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.text.as_deref())
    }

    /// HTTPS URLs of attached media, in order.
    pub fn media_urls(&self) -> Vec<String> {
        self.extended_entities
            .as_ref()
            .map(|e| {
                e.media
                    .iter()
                    .filter_map(|m| m.media_url_https.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Apify actor run metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
}
