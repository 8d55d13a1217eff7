// Test doubles for the collection pipeline.
//
// MockFetcher scripts the Fetcher boundary per query: each advance-step pops
// the next scripted batch (or failure). Plus helpers for building units and
// records.

use std::collections::HashMap;

use async_trait::async_trait;

use harvest_common::{FetchError, Identity, RawUnit, Record};

use crate::fetcher::{EntryPoint, Fetcher};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

type Step = Result<Vec<RawUnit>, FetchError>;

/// Scripted fetcher. Navigating to an unregistered query is an error.
/// Once a script runs out every further step returns an empty batch.
/// Re-navigating replays the script from the start.
///
/// Builder pattern: `.on_query()`, `.on_query_steps()`, `.on_expand()`,
/// `.fail_navigation()`, `.fail_navigation_times()`.
#[derive(Default)]
pub struct MockFetcher {
    scripts: HashMap<String, Vec<Step>>,
    /// Error plus how many more navigations it applies to (`None`: all).
    navigation_failures: HashMap<String, (FetchError, Option<usize>)>,
    expansions: HashMap<String, Result<String, FetchError>>,
    current: Option<String>,
    cursor: usize,
    advance_calls: usize,
    expand_calls: usize,
    navigations: Vec<String>,
    opened: usize,
    closed: usize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one batch per advance-step for `query`.
    pub fn on_query(self, query: &str, steps: Vec<Vec<RawUnit>>) -> Self {
        self.on_query_steps(query, steps.into_iter().map(Ok).collect())
    }

    /// Like `on_query` but individual steps may fail.
    pub fn on_query_steps(mut self, query: &str, steps: Vec<Step>) -> Self {
        self.scripts.insert(query.to_string(), steps);
        self
    }

    /// Expansion result for `unit`, matched by its surface key.
    pub fn on_expand(mut self, unit: &RawUnit, result: Result<String, FetchError>) -> Self {
        self.expansions.insert(unit.surface_key(), result);
        self
    }

    /// Every navigation to `query` fails with `error`.
    pub fn fail_navigation(mut self, query: &str, error: FetchError) -> Self {
        self.navigation_failures
            .insert(query.to_string(), (error, None));
        self
    }

    /// The first `times` navigations to `query` fail, later ones succeed.
    pub fn fail_navigation_times(mut self, query: &str, error: FetchError, times: usize) -> Self {
        self.navigation_failures
            .insert(query.to_string(), (error, Some(times)));
        self
    }

    pub fn advance_calls(&self) -> usize {
        self.advance_calls
    }

    pub fn expand_calls(&self) -> usize {
        self.expand_calls
    }

    /// Entry points navigated to, in order.
    pub fn navigations(&self) -> &[String] {
        &self.navigations
    }

    pub fn opened(&self) -> usize {
        self.opened
    }

    pub fn closed(&self) -> usize {
        self.closed
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&mut self) -> Result<(), FetchError> {
        self.opened += 1;
        Ok(())
    }

    fn entry_point(&self, query_text: &str) -> EntryPoint {
        EntryPoint::new(query_text)
    }

    async fn navigate(&mut self, entry: &EntryPoint) -> Result<(), FetchError> {
        let query = entry.as_str().to_string();
        self.navigations.push(query.clone());
        self.current = None;
        self.cursor = 0;

        if let Some((error, remaining)) = self.navigation_failures.get_mut(&query) {
            match remaining {
                None => return Err(error.clone()),
                Some(0) => {}
                Some(n) => {
                    *n -= 1;
                    return Err(error.clone());
                }
            }
        }
        if !self.scripts.contains_key(&query) {
            return Err(FetchError::Fatal(format!(
                "MockFetcher: no script registered for {query}"
            )));
        }
        self.current = Some(query);
        Ok(())
    }

    async fn advance(&mut self) -> Result<Vec<RawUnit>, FetchError> {
        self.advance_calls += 1;
        let query = self
            .current
            .as_ref()
            .ok_or_else(|| FetchError::Fatal("MockFetcher: advance before navigate".into()))?;
        let step = self
            .scripts
            .get(query)
            .and_then(|steps| steps.get(self.cursor))
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()));
        self.cursor += 1;
        step
    }

    async fn expand(&mut self, unit: &RawUnit) -> Result<RawUnit, FetchError> {
        self.expand_calls += 1;
        match self.expansions.get(&unit.surface_key()) {
            Some(Ok(text)) => Ok(RawUnit {
                text: Some(text.clone()),
                truncated: false,
                ..unit.clone()
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(FetchError::Unsupported("expand")),
        }
    }

    async fn close(&mut self) -> Result<(), FetchError> {
        self.closed += 1;
        self.current = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A raw unit with the three fields that matter for identity and content.
/// `handle` is given without the leading `@`.
pub fn unit(handle: &str, timestamp: &str, text: &str) -> RawUnit {
    RawUnit {
        author_handle: Some(handle.to_string()),
        author_href: Some(format!("/{handle}")),
        display_name: Some(handle.to_string()),
        timestamp: Some(timestamp.to_string()),
        text: Some(text.to_string()),
        ..Default::default()
    }
}

/// The record `unit(handle, timestamp, text)` extracts to.
pub fn record(handle: &str, timestamp: &str, text: &str) -> Record {
    Record {
        identity: Identity::new(format!("@{handle}"), timestamp),
        display_name: handle.to_string(),
        content: text.to_string(),
        image_url: String::new(),
        likes: 0,
        retweets: 0,
    }
}
