// Pagination loop: drive a fetcher through advance-steps and surface each
// raw unit once, in the order it first becomes visible.
//
// Infinite-scroll and cursor sources expose no total count, so the loop stops
// on stagnation (consecutive steps with nothing new) bounded by hard caps.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use harvest_common::{LimitsConfig, PacingConfig, RawUnit, Result};

use crate::fetcher::{EntryPoint, Fetcher};

#[derive(Debug, Clone, TypedBuilder)]
pub struct PaginationConfig {
    #[builder(default = 50)]
    pub max_advance_steps: usize,
    /// Consecutive steps without a new unit before declaring end-of-results.
    #[builder(default = 2)]
    pub max_empty_steps: usize,
    /// Cap on units surfaced in one run.
    #[builder(default)]
    pub max_results: Option<usize>,
    /// Retries of a transiently failing step before giving up on the query.
    #[builder(default = 3)]
    pub max_fetch_retries: u32,
    #[builder(default = Duration::from_secs(2))]
    pub step_delay: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub retry_delay: Duration,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PaginationConfig {
    pub fn from_config(limits: &LimitsConfig, pacing: &PacingConfig) -> Self {
        Self {
            max_advance_steps: limits.max_advance_steps,
            max_empty_steps: limits.max_empty_steps,
            max_results: limits.max_results,
            max_fetch_retries: limits.max_fetch_retries,
            step_delay: pacing.step_delay(),
            retry_delay: pacing.retry_delay(),
        }
    }
}

/// Why a pagination run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The sink collected as many records as it wanted.
    MaxRecords,
    MaxResults,
    MaxAdvanceSteps,
    /// Consecutive steps produced nothing new.
    EndOfResults,
    /// Transient fetch failures outlasted the retry budget.
    FetchExhausted,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::MaxRecords => "max records reached",
            StopReason::MaxResults => "max results reached",
            StopReason::MaxAdvanceSteps => "max advance steps reached",
            StopReason::EndOfResults => "end of results",
            StopReason::FetchExhausted => "fetch retries exhausted",
        };
        f.write_str(s)
    }
}

/// Sink verdict after each unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop(StopReason),
}

/// Receives each newly surfaced unit. Gets the fetcher back so it can ask for
/// expansions. An error aborts the run.
#[async_trait]
pub trait UnitSink: Send {
    async fn on_unit(&mut self, fetcher: &mut dyn Fetcher, unit: RawUnit) -> Result<Flow>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationOutcome {
    pub stop_reason: StopReason,
    pub steps: usize,
    pub surfaced: usize,
}

pub struct Paginator {
    config: PaginationConfig,
}

impl Paginator {
    pub fn new(config: PaginationConfig) -> Self {
        Self { config }
    }

    /// Advance `fetcher` until a stop condition, feeding each unit not yet
    /// surfaced in this run to `sink`. The fetcher must already be navigated.
    pub async fn run(
        &self,
        fetcher: &mut dyn Fetcher,
        sink: &mut dyn UnitSink,
    ) -> Result<PaginationOutcome> {
        let mut surfaced_keys: HashSet<String> = HashSet::new();
        let mut steps = 0;
        let mut empty_steps = 0;

        let outcome = |stop_reason, steps, surfaced_keys: &HashSet<String>| PaginationOutcome {
            stop_reason,
            steps,
            surfaced: surfaced_keys.len(),
        };

        loop {
            if steps >= self.config.max_advance_steps {
                info!(steps, "Reached max advance steps");
                return Ok(outcome(StopReason::MaxAdvanceSteps, steps, &surfaced_keys));
            }
            if steps > 0 {
                pause(self.config.step_delay).await;
            }

            let Some(batch) = self.advance_with_retry(fetcher, steps + 1).await? else {
                return Ok(outcome(StopReason::FetchExhausted, steps, &surfaced_keys));
            };
            steps += 1;

            let visible = batch.len();
            let mut fresh = 0;
            for unit in batch {
                if !surfaced_keys.insert(unit.surface_key()) {
                    continue;
                }
                fresh += 1;

                if let Flow::Stop(reason) = sink.on_unit(&mut *fetcher, unit).await? {
                    return Ok(outcome(reason, steps, &surfaced_keys));
                }
                if self
                    .config
                    .max_results
                    .is_some_and(|max| surfaced_keys.len() >= max)
                {
                    info!(steps, surfaced = surfaced_keys.len(), "Reached max results");
                    return Ok(outcome(StopReason::MaxResults, steps, &surfaced_keys));
                }
            }

            debug!(step = steps, visible, fresh, "Advance step complete");

            if fresh == 0 {
                empty_steps += 1;
                info!(
                    step = steps,
                    empty_steps,
                    max_empty_steps = self.config.max_empty_steps,
                    "No new units this step"
                );
                if empty_steps >= self.config.max_empty_steps {
                    return Ok(outcome(StopReason::EndOfResults, steps, &surfaced_keys));
                }
            } else {
                empty_steps = 0;
            }
        }
    }

    /// Navigate `fetcher` to `entry`, retrying transient failures with the
    /// same budget as advance-steps. Once the budget is spent the last error
    /// is returned.
    pub async fn navigate(&self, fetcher: &mut dyn Fetcher, entry: &EntryPoint) -> Result<()> {
        let mut failures = 0;
        loop {
            match fetcher.navigate(entry).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && failures < self.config.max_fetch_retries => {
                    failures += 1;
                    warn!(%entry, attempt = failures, error = %e, "Transient navigation failure, retrying");
                    pause(self.config.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// One advance-step, retrying transient failures at the same position.
    /// `None` means the retry budget ran out.
    async fn advance_with_retry(
        &self,
        fetcher: &mut dyn Fetcher,
        step: usize,
    ) -> Result<Option<Vec<RawUnit>>> {
        let mut failures = 0;
        loop {
            match fetcher.advance().await {
                Ok(batch) => return Ok(Some(batch)),
                Err(e) if e.is_transient() => {
                    failures += 1;
                    if failures > self.config.max_fetch_retries {
                        warn!(
                            step,
                            failures,
                            error = %e,
                            "Transient fetch failures exhausted, treating as end of results"
                        );
                        return Ok(None);
                    }
                    warn!(step, attempt = failures, error = %e, "Transient fetch failure, retrying");
                    pause(self.config.retry_delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
