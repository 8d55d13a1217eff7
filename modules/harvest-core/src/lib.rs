pub mod apify_fetcher;
pub mod collector;
pub mod extract;
pub mod fetcher;
pub mod identity;
pub mod paginate;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use apify_fetcher::ApifyFetcher;
pub use collector::{CollectSettings, Collector, QueryJob, QueryOutcome, QueryReport, RunSummary};
pub use extract::{build_record, extract, parse_count};
pub use fetcher::{EntryPoint, Fetcher};
pub use identity::{IdentityIndex, LoadStats};
pub use paginate::{Flow, PaginationConfig, PaginationOutcome, Paginator, StopReason, UnitSink};
pub use store::OutputStore;
