// The Fetcher seam: everything the collection pipeline needs from whatever
// produces raw page content (browser session, API client, test script).

use std::fmt;

use async_trait::async_trait;

use harvest_common::{FetchError, RawUnit};

/// Opaque navigation target for one query (a search URL, a search term).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryPoint(String);

impl EntryPoint {
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of raw units for a query. Injected into the collector, which owns
/// its lifecycle: `open` once, then per query `navigate` followed by repeated
/// `advance`, and finally `close`.
#[async_trait]
pub trait Fetcher: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn open(&mut self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Build the navigation target for a search expression.
    fn entry_point(&self, query_text: &str) -> EntryPoint;

    /// Point the fetcher at a query's results. Resets any pagination state.
    async fn navigate(&mut self, entry: &EntryPoint) -> Result<(), FetchError>;

    /// Perform one advance-step (scroll, next page) and return the units that
    /// are visible afterwards. Units already returned by an earlier step may
    /// appear again.
    async fn advance(&mut self) -> Result<Vec<RawUnit>, FetchError>;

    /// Expand truncated text. Best-effort; the default has no way to expand.
    async fn expand(&mut self, _unit: &RawUnit) -> Result<RawUnit, FetchError> {
        Err(FetchError::Unsupported("expand"))
    }

    async fn close(&mut self) -> Result<(), FetchError> {
        Ok(())
    }
}
