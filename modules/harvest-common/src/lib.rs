pub mod config;
pub mod error;
pub mod types;

pub use config::{
    load_config, BackendConfig, FileConfig, LimitsConfig, OutputConfig, PacingConfig, Secrets,
};
pub use error::{FetchError, HarvestError, Result};
pub use types::{search_url, Identity, Query, RawUnit, Record, SearchTab};
