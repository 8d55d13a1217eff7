use std::collections::HashSet;

use tracing::{info, warn};

use harvest_common::{HarvestError, Identity, Result};

use crate::store::OutputStore;

/// Identity keys already present in one store. Built once per query run by
/// replaying the store, then grown as records are appended.
#[derive(Debug, Default, Clone)]
pub struct IdentityIndex {
    keys: HashSet<Identity>,
}

/// What a replay of the store found.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub records: usize,
    pub corrupt_lines: usize,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay every line of `store`. Corrupt lines (including a torn final
    /// line left by a crash) are logged and skipped; only I/O errors fail.
    pub fn load(store: &OutputStore) -> Result<(Self, LoadStats)> {
        let mut index = Self::new();
        let mut stats = LoadStats::default();

        for item in store.iter()? {
            match item {
                Ok(record) => {
                    stats.records += 1;
                    index.add(record.identity);
                }
                Err(HarvestError::CorruptLine { line, reason }) => {
                    stats.corrupt_lines += 1;
                    warn!(
                        path = %store.path().display(),
                        line,
                        reason = %reason,
                        "Skipping corrupt line in store"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            path = %store.path().display(),
            identities = index.len(),
            records = stats.records,
            corrupt_lines = stats.corrupt_lines,
            "Loaded existing identities"
        );
        Ok((index, stats))
    }

    pub fn contains(&self, key: &Identity) -> bool {
        self.keys.contains(key)
    }

    /// Returns `false` if the key was already present.
    pub fn add(&mut self, key: Identity) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
