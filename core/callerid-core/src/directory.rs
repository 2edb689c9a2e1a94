//! Phone-book → platform caller-ID directory synchronization.
//!
//! ## Pipeline
//!
//! ```text
//! raw entries ─normalize─▶ BTreeMap<u64, label> ─▶ DirectorySnapshot ─publish─▶ DirectorySink
//!              (drop None,   (last write wins,        (ascending)          (clear if incremental,
//!               blank label)  sorted keys)                                   add…, complete)
//! ```
//!
//! The host's registration primitive requires strictly ascending numbers, so
//! `publish` re-checks ordering before every call and refuses anything that
//! would break it. Each run replaces the previous data set wholesale.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};

use callerid_protocol::PhoneBookEntry;

use crate::error::{CallerIdError, Result};
use crate::normalize::normalize;
use crate::storage::{write_atomic, StorageConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct DirectoryEntry {
    pub number: u64,
    pub label: String,
}

/// Normalized, deduplicated, ascending entries for one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    entries: Vec<DirectoryEntry>,
}

impl DirectorySnapshot {
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<DirectoryEntry> {
        self.entries
    }
}

pub fn synchronize<'a, I>(entries: I, country_code: &str) -> DirectorySnapshot
where
    I: IntoIterator<Item = &'a PhoneBookEntry>,
{
    let mut by_number: BTreeMap<u64, String> = BTreeMap::new();
    let mut dropped = 0usize;

    for entry in entries {
        let number = match normalize(&entry.number, country_code) {
            Some(number) if !entry.label.trim().is_empty() => number,
            _ => {
                dropped += 1;
                continue;
            }
        };
        if let Some(previous) = by_number.insert(number, entry.label.clone()) {
            tracing::debug!(number, previous = %previous, "Duplicate number; later label wins");
        }
    }

    if dropped > 0 {
        tracing::info!(dropped, "Dropped unusable phone-book entries");
    }

    DirectorySnapshot {
        entries: by_number
            .into_iter()
            .map(|(number, label)| DirectoryEntry { number, label })
            .collect(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Publication
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum RequestMode {
    /// Clear existing entries, then republish the full list.
    Incremental,
    /// Publish directly into a fresh data set.
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, uniffi::Record)]
pub struct PublishReport {
    pub applied: u64,
    pub rejected: u64,
}

impl PublishReport {
    pub fn is_partial_failure(&self) -> bool {
        self.rejected > 0
    }
}

/// The platform directory-provider context, implemented by the host.
#[uniffi::export(with_foreign)]
pub trait DirectorySink: Send + Sync {
    fn remove_all_entries(&self);
    /// Registers one entry. Returns false if the host rejected it.
    fn add_entry(&self, number: u64, label: String) -> bool;
    /// Ends the request. Always called exactly once per publish.
    fn complete(&self, report: PublishReport);
}

pub fn publish(
    snapshot: &DirectorySnapshot,
    sink: &dyn DirectorySink,
    mode: RequestMode,
) -> PublishReport {
    if mode == RequestMode::Incremental {
        sink.remove_all_entries();
    }

    let mut report = PublishReport::default();
    let mut previous: Option<u64> = None;

    for entry in snapshot.entries() {
        if let Some(previous) = previous {
            if entry.number <= previous {
                let err = CallerIdError::DirectoryOutOfOrder {
                    previous,
                    number: entry.number,
                };
                tracing::error!(error = %err, "Skipping directory entry");
                report.rejected += 1;
                continue;
            }
        }
        previous = Some(entry.number);

        if sink.add_entry(entry.number, entry.label.clone()) {
            report.applied += 1;
        } else {
            let err = CallerIdError::DirectoryRejected {
                number: entry.number,
                details: "host returned false".to_string(),
            };
            tracing::warn!(error = %err, "Directory entry rejected");
            report.rejected += 1;
        }
    }

    tracing::info!(
        mode = ?mode,
        applied = report.applied,
        rejected = report.rejected,
        "Directory published"
    );
    sink.complete(report.clone());
    report
}

// ─────────────────────────────────────────────────────────────────────────────
// Status (diagnostics)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryStatus {
    pub applied_count: u64,
    #[serde(default)]
    pub rejected_count: u64,
    pub applied_at: DateTime<Utc>,
}

impl DirectoryStatus {
    pub fn from_report(report: &PublishReport, applied_at: DateTime<Utc>) -> Self {
        Self {
            applied_count: report.applied,
            rejected_count: report.rejected,
            applied_at,
        }
    }
}

pub fn record_status(storage: &StorageConfig, status: &DirectoryStatus) -> Result<()> {
    let content = serde_json::to_vec_pretty(status).map_err(|source| CallerIdError::Json {
        context: "Failed to serialize directory status".to_string(),
        source,
    })?;
    write_atomic(&storage.directory_status_file(), &content)
}

/// Stamps `report` with the current time and records it.
pub fn record_report(storage: &StorageConfig, report: &PublishReport) -> Result<DirectoryStatus> {
    let status = DirectoryStatus::from_report(report, Utc::now());
    record_status(storage, &status)?;
    tracing::debug!(
        applied_count = status.applied_count,
        rejected_count = status.rejected_count,
        "Directory status recorded"
    );
    Ok(status)
}

/// Reads the last recorded status; `None` if no run was recorded or the file is unreadable.
pub fn load_status(storage: &StorageConfig) -> Option<DirectoryStatus> {
    let path = storage.directory_status_file();
    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(status) => Some(status),
        Err(err) => {
            tracing::warn!(error = %err, "Failed to parse directory status");
            None
        }
    }
}
