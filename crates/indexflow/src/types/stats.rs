//! Index update statistics.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceUpdateInfo {
    pub source_name: String,
    pub num_insertions: u64,
    pub num_deletions: u64,
    pub num_no_change: u64,
    pub num_errors: u64,
}

impl SourceUpdateInfo {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            ..Default::default()
        }
    }

    pub fn total(&self) -> u64 {
        self.num_insertions + self.num_deletions + self.num_no_change + self.num_errors
    }
}

/// A snapshot of index-update counters for one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IndexUpdateInfo {
    pub sources: Vec<SourceUpdateInfo>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl IndexUpdateInfo {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            sources: Vec::new(),
            started_at,
            finished_at: None,
        }
    }

    pub fn source(&self, name: &str) -> Option<&SourceUpdateInfo> {
        self.sources.iter().find(|s| s.source_name == name)
    }
}

impl fmt::Display for SourceUpdateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} added, {} removed, {} unchanged",
            self.source_name, self.num_insertions, self.num_deletions, self.num_no_change
        )?;
        if self.num_errors > 0 {
            write!(f, ", {} errors", self.num_errors)?;
        }
        Ok(())
    }
}

impl fmt::Display for IndexUpdateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sources.is_empty() {
            return write!(f, "no sources updated");
        }
        for (i, source) in self.sources.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{source}")?;
        }
        Ok(())
    }
}
