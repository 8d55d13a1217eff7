use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// --- Identity & Record ---

/// The `(username, timestamp)` pair used to deduplicate records.
///
/// The timestamp is kept exactly as the source reported it so that identities
/// written by earlier runs compare equal to freshly extracted ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub timestamp: String,
}

impl Identity {
    pub fn new(username: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Both halves must be non-blank for the key to be usable.
    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.timestamp.trim().is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.username, self.timestamp)
    }
}

/// A collected post, one per line in a store.
///
/// Serialized field names match files written by earlier versions of the tool:
/// `username`, `name`, `timestamp`, `content`, `image`, `likes`, `retweets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub identity: Identity,
    #[serde(rename = "name", default)]
    pub display_name: String,
    #[serde(default)]
    pub content: String,
    /// Empty when the post carries no media.
    #[serde(rename = "image", default)]
    pub image_url: String,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub retweets: u64,
}

impl Record {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn has_image(&self) -> bool {
        !self.image_url.is_empty()
    }
}

// --- Raw units ---

/// One fetched item (rendered element or API result) before validation.
///
/// Every field is optional; the extraction stage is the only place that
/// decides what a usable record looks like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawUnit {
    /// Platform-assigned id, when the source exposes one.
    pub source_id: Option<String>,
    /// Handle with or without a leading `@`.
    pub author_handle: Option<String>,
    /// Profile link; the handle is its last path segment.
    pub author_href: Option<String>,
    pub display_name: Option<String>,
    pub timestamp: Option<String>,
    pub text: Option<String>,
    /// Set when the source shows a "show more" affordance for this text.
    pub truncated: bool,
    pub image_urls: Vec<String>,
    pub likes_text: Option<String>,
    pub retweets_text: Option<String>,
}

impl RawUnit {
    /// Normalized `@handle`, from the explicit handle or the profile link.
    pub fn handle(&self) -> Option<String> {
        let raw = match self
            .author_handle
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
        {
            Some(handle) => handle.to_string(),
            None => handle_from_href(self.author_href.as_deref()?)?,
        };

        let bare = raw.trim_start_matches('@');
        if bare.is_empty() {
            return None;
        }
        Some(format!("@{bare}"))
    }

    /// First non-empty image URL, if any.
    pub fn first_image(&self) -> Option<&str> {
        self.image_urls
            .iter()
            .map(|u| u.trim())
            .find(|u| !u.is_empty())
    }

    /// Key used to surface each unit once per pagination run. Prefers the
    /// platform id, then the author and timestamp, so a unit whose text
    /// changes on re-render keeps its key. Text only keys units with neither.
    pub fn surface_key(&self) -> String {
        if let Some(id) = self.source_id.as_deref().filter(|id| !id.is_empty()) {
            return format!("id:{id}");
        }
        let timestamp = self.timestamp.as_deref().map(str::trim).unwrap_or_default();
        if let Some(handle) = self.handle().filter(|_| !timestamp.is_empty()) {
            return format!("identity:{handle}|{timestamp}");
        }
        format!(
            "unit:{}|{}|{}",
            self.handle().unwrap_or_default(),
            self.timestamp.as_deref().unwrap_or_default(),
            self.text.as_deref().unwrap_or_default(),
        )
    }
}

/// Last non-empty path segment of a profile link. Relative links resolve
/// against the site root.
fn handle_from_href(href: &str) -> Option<String> {
    let base = url::Url::parse(SITE_ROOT).ok()?;
    let url = base.join(href.trim()).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(String::from)
}

// --- Queries ---

/// A unit of work: a search expression plus the label its store is named after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Query {
    /// Opaque search expression handed to the fetcher.
    #[serde(rename = "query")]
    pub query_text: String,
    pub description: String,
    /// Overrides `limits.max_records_per_query` for this query.
    #[serde(default)]
    pub max_records: Option<usize>,
    #[serde(default)]
    pub since: Option<NaiveDate>,
    #[serde(default)]
    pub until: Option<NaiveDate>,
}

impl Query {
    pub fn new(query_text: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            description: description.into(),
            max_records: None,
            since: None,
            until: None,
        }
    }

    /// The query text with `since:`/`until:` operators appended.
    pub fn search_expression(&self) -> String {
        let mut expr = self.query_text.trim().to_string();
        if let Some(since) = self.since {
            expr.push_str(&format!(" since:{}", since.format("%Y-%m-%d")));
        }
        if let Some(until) = self.until {
            expr.push_str(&format!(" until:{}", until.format("%Y-%m-%d")));
        }
        expr
    }
}

/// Result tab of the search page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTab {
    #[default]
    Top,
    Latest,
    People,
    Photos,
    Videos,
}

impl SearchTab {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchTab::Top => "top",
            SearchTab::Latest => "latest",
            SearchTab::People => "people",
            SearchTab::Photos => "photos",
            SearchTab::Videos => "videos",
        }
    }
}

impl fmt::Display for SearchTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const SITE_ROOT: &str = "https://x.com/";
const SEARCH_BASE_URL: &str = "https://x.com/search";

/// Search page URL for a query expression on the given tab.
pub fn search_url(query_text: &str, tab: SearchTab) -> String {
    let params = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("q", query_text)
        .append_pair("src", "typed_query")
        .append_pair("f", tab.as_str())
        .finish();
    format!("{SEARCH_BASE_URL}?{params}")
}
