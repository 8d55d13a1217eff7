// Collection controller: one query at a time, fetch → extract → dedup →
// persist, with failures contained to the query that raised them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, info_span, Instrument};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use harvest_common::{FetchError, FileConfig, Query, RawUnit, Result};

use crate::extract::extract;
use crate::fetcher::Fetcher;
use crate::identity::IdentityIndex;
use crate::paginate::{Flow, PaginationConfig, Paginator, StopReason, UnitSink};
use crate::store::OutputStore;

#[derive(Debug, Clone, TypedBuilder)]
pub struct CollectSettings {
    #[builder(default)]
    pub pagination: PaginationConfig,
    /// Wait between consecutive queries in `collect_all`.
    #[builder(default = Duration::from_secs(5))]
    pub query_delay: Duration,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CollectSettings {
    pub fn from_config(config: &FileConfig) -> Self {
        Self {
            pagination: PaginationConfig::from_config(&config.limits, &config.pacing),
            query_delay: config.pacing.query_delay(),
        }
    }
}

/// One query plus where its records go and how many to add this run.
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub query: Query,
    pub store_path: PathBuf,
    pub max_records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Completed { stop_reason: StopReason, steps: usize },
    Failed { error: String },
}

/// Per-query counters for the end-of-run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryReport {
    pub description: String,
    pub store_path: PathBuf,
    /// Records already in the store when the query started.
    pub previously_stored: usize,
    pub added: usize,
    pub surfaced: usize,
    pub duplicates: usize,
    pub unidentifiable: usize,
    pub outcome: QueryOutcome,
}

impl QueryReport {
    fn new(description: &str, store_path: &Path) -> Self {
        Self {
            description: description.to_string(),
            store_path: store_path.to_path_buf(),
            previously_stored: 0,
            added: 0,
            surfaced: 0,
            duplicates: 0,
            unidentifiable: 0,
            outcome: QueryOutcome::Failed {
                error: "not started".into(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, QueryOutcome::Failed { .. })
    }
}

impl fmt::Display for QueryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} new ({} already stored, {} duplicates, {} unidentifiable) -> {}",
            self.description,
            self.added,
            self.previously_stored,
            self.duplicates,
            self.unidentifiable,
            self.store_path.display(),
        )?;
        match &self.outcome {
            QueryOutcome::Completed { stop_reason, steps } => {
                write!(f, " [{stop_reason} after {steps} steps]")
            }
            QueryOutcome::Failed { error } => write!(f, " [FAILED: {error}]"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub reports: Vec<QueryReport>,
}

impl RunSummary {
    pub fn total_added(&self) -> usize {
        self.reports.iter().map(|r| r.added).sum()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_failed()).count()
    }

    pub fn log(&self) {
        for report in &self.reports {
            info!(
                query = %report.description,
                added = report.added,
                previously_stored = report.previously_stored,
                duplicates = report.duplicates,
                unidentifiable = report.unidentifiable,
                failed = report.is_failed(),
                "Query summary"
            );
        }
        info!(
            run_id = %self.run_id,
            queries = self.reports.len(),
            total_added = self.total_added(),
            failed = self.failed(),
            "Run complete"
        );
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;
        for report in &self.reports {
            writeln!(f, "  {report}")?;
        }
        write!(
            f,
            "Total: {} new records across {} queries ({} failed)",
            self.total_added(),
            self.reports.len(),
            self.failed()
        )
    }
}

/// Per-query state machine. Transitions are logged at debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    LoadingIndex,
    Streaming,
    Done,
}

fn enter(phase: Phase) {
    debug!(?phase, "Query phase");
}

/// Runs queries against an injected fetcher, which it owns for the lifetime
/// of the collector.
pub struct Collector<F: Fetcher> {
    fetcher: F,
    settings: CollectSettings,
}

impl<F: Fetcher> Collector<F> {
    pub fn new(fetcher: F, settings: CollectSettings) -> Self {
        Self { fetcher, settings }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn fetcher_mut(&mut self) -> &mut F {
        &mut self.fetcher
    }

    pub fn into_inner(self) -> F {
        self.fetcher
    }

    pub async fn open(&mut self) -> std::result::Result<(), FetchError> {
        info!(fetcher = self.fetcher.name(), "Opening fetcher");
        self.fetcher.open().await
    }

    pub async fn close(&mut self) -> std::result::Result<(), FetchError> {
        info!(fetcher = self.fetcher.name(), "Closing fetcher");
        self.fetcher.close().await
    }

    /// Run every job in order, pausing between queries. A failed query is
    /// recorded in its report and the run moves on.
    pub async fn collect_all(&mut self, jobs: &[QueryJob]) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);

        async {
            info!(queries = jobs.len(), "Starting collection run");
            let mut reports = Vec::with_capacity(jobs.len());

            for (i, job) in jobs.iter().enumerate() {
                if i > 0 && !self.settings.query_delay.is_zero() {
                    debug!(
                        delay_ms = self.settings.query_delay.as_millis() as u64,
                        "Pausing between queries"
                    );
                    tokio::time::sleep(self.settings.query_delay).await;
                }
                let report = self
                    .collect(&job.query, &job.store_path, job.max_records)
                    .instrument(info_span!("query", query = %job.query.description))
                    .await;
                reports.push(report);
            }

            let summary = RunSummary { run_id, reports };
            summary.log();
            summary
        }
        .instrument(span)
        .await
    }

    /// Collect up to `max_records` new records for one query into the store
    /// at `store_path`. Never fails: errors end the query and are reported.
    pub async fn collect(
        &mut self,
        query: &Query,
        store_path: &Path,
        max_records: usize,
    ) -> QueryReport {
        let mut report = QueryReport::new(&query.description, store_path);

        match self.try_collect(query, max_records, &mut report).await {
            Ok((stop_reason, steps)) => {
                info!(
                    added = report.added,
                    duplicates = report.duplicates,
                    surfaced = report.surfaced,
                    steps,
                    %stop_reason,
                    "Query complete"
                );
                report.outcome = QueryOutcome::Completed { stop_reason, steps };
            }
            Err(e) => {
                error!(
                    added = report.added,
                    error = %e,
                    "Query failed, continuing with next query"
                );
                report.outcome = QueryOutcome::Failed {
                    error: e.to_string(),
                };
            }
        }
        enter(Phase::Done);
        report
    }

    async fn try_collect(
        &mut self,
        query: &Query,
        max_records: usize,
        report: &mut QueryReport,
    ) -> Result<(StopReason, usize)> {
        enter(Phase::Init);
        let store = OutputStore::open(&report.store_path)?;

        enter(Phase::LoadingIndex);
        let (index, stats) = IdentityIndex::load(&store)?;
        report.previously_stored = stats.records;

        if max_records == 0 {
            info!("max_records is 0, nothing to collect");
            return Ok((StopReason::MaxRecords, 0));
        }

        let expression = query.search_expression();
        let entry = self.fetcher.entry_point(&expression);
        info!(%entry, max_records, "Navigating to query");
        let paginator = Paginator::new(self.settings.pagination.clone());
        paginator.navigate(&mut self.fetcher, &entry).await?;

        enter(Phase::Streaming);
        let mut session = QuerySession {
            store,
            index,
            max_records,
            report,
        };
        let outcome = paginator.run(&mut self.fetcher, &mut session).await?;
        Ok((outcome.stop_reason, outcome.steps))
    }
}

/// Streaming state for one query: the open store, its identity index and the
/// report being filled in.
struct QuerySession<'a> {
    store: OutputStore,
    index: IdentityIndex,
    max_records: usize,
    report: &'a mut QueryReport,
}

#[async_trait]
impl<'a> UnitSink for QuerySession<'a> {
    async fn on_unit(&mut self, fetcher: &mut dyn Fetcher, unit: RawUnit) -> Result<Flow> {
        self.report.surfaced += 1;

        let Some(record) = extract(fetcher, unit).await else {
            self.report.unidentifiable += 1;
            return Ok(Flow::Continue);
        };

        if self.index.contains(record.identity()) {
            self.report.duplicates += 1;
            debug!(identity = %record.identity, "Already collected, skipping");
            return Ok(Flow::Continue);
        }

        // Only register the identity once the line is durable.
        self.store.append(&record)?;
        self.index.add(record.identity.clone());
        self.report.added += 1;
        info!(
            username = %record.identity.username,
            timestamp = %record.identity.timestamp,
            added = self.report.added,
            max_records = self.max_records,
            "Stored new record"
        );

        if self.report.added >= self.max_records {
            return Ok(Flow::Stop(StopReason::MaxRecords));
        }
        Ok(Flow::Continue)
    }
}
