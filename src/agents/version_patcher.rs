use crate::error::{MsiverError, Result, StatementError};
use crate::installer::FileTableStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// A requested version change for one file of the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileVersionEntry {
    pub file_name: String,
    pub version: Option<String>,
}

impl FileVersionEntry {
    pub fn new(file_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            version: Some(version.into()),
        }
    }

    pub fn without_version(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            version: None,
        }
    }

    /// The version to apply, if one was actually given.
    pub fn effective_version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !v.is_empty())
    }
}

/// Why an entry did not change the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SkipReason {
    NoVersion,
    NotFound,
    UpdateFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoVersion => f.write_str("no version specified"),
            SkipReason::NotFound => f.write_str("not found in File table"),
            SkipReason::UpdateFailed(message) => write!(f, "update failed: {}", message),
        }
    }
}

/// Result of applying a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum EntryOutcome {
    Updated,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub file_name: String,
    pub version: Option<String>,
    pub outcome: EntryOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub file_name: String,
    pub reason: SkipReason,
}

/// Summary of one patch run, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchResult {
    pub updated_count: usize,
    pub skipped: Vec<SkippedEntry>,
    pub entries: Vec<EntryReport>,
}

impl PatchResult {
    fn record(&mut self, entry: &FileVersionEntry, outcome: EntryOutcome) {
        match &outcome {
            EntryOutcome::Updated => self.updated_count += 1,
            EntryOutcome::Skipped(reason) => self.skipped.push(SkippedEntry {
                file_name: entry.file_name.clone(),
                reason: reason.clone(),
            }),
        }
        self.entries.push(EntryReport {
            file_name: entry.file_name.clone(),
            version: entry.version.clone(),
            outcome,
        });
    }

    pub fn skipped_names(&self) -> BTreeSet<&str> {
        self.skipped.iter().map(|s| s.file_name.as_str()).collect()
    }

    pub fn not_found_count(&self) -> usize {
        self.count_skipped(|r| matches!(r, SkipReason::NotFound))
    }

    pub fn no_version_count(&self) -> usize {
        self.count_skipped(|r| matches!(r, SkipReason::NoVersion))
    }

    pub fn failed_count(&self) -> usize {
        self.count_skipped(|r| matches!(r, SkipReason::UpdateFailed(_)))
    }

    pub fn has_skips(&self) -> bool {
        !self.skipped.is_empty()
    }

    fn count_skipped(&self, predicate: impl Fn(&SkipReason) -> bool) -> usize {
        self.skipped.iter().filter(|s| predicate(&s.reason)).count()
    }
}

/// Applies file version entries to an open file table.
///
/// Each entry is an update-or-skip: a missing version or an unknown file
/// name is recorded and the loop moves on, and so is a statement the store
/// rejects for that row alone. Only failures of the store itself abort the
/// batch. The patcher never commits.
pub struct VersionPatcher;

impl VersionPatcher {
    pub fn patch<S: FileTableStore + ?Sized>(
        store: &mut S,
        entries: &[FileVersionEntry],
    ) -> Result<PatchResult> {
        Self::patch_with(store, entries, |_, _| {})
    }

    /// Like [`VersionPatcher::patch`], calling `observer` after each entry.
    pub fn patch_with<S, F>(
        store: &mut S,
        entries: &[FileVersionEntry],
        mut observer: F,
    ) -> Result<PatchResult>
    where
        S: FileTableStore + ?Sized,
        F: FnMut(&FileVersionEntry, &EntryOutcome),
    {
        let mut result = PatchResult::default();
        if entries.is_empty() {
            return Ok(result);
        }

        store.prepare_version_update()?;

        for entry in entries {
            let outcome = Self::apply(store, entry)?;
            observer(entry, &outcome);
            result.record(entry, outcome);
        }

        Ok(result)
    }

    fn apply<S: FileTableStore + ?Sized>(
        store: &mut S,
        entry: &FileVersionEntry,
    ) -> Result<EntryOutcome> {
        let Some(version) = entry.effective_version() else {
            return Ok(EntryOutcome::Skipped(SkipReason::NoVersion));
        };

        match store.update_file_version(&entry.file_name, version) {
            Ok(0) => Ok(EntryOutcome::Skipped(SkipReason::NotFound)),
            Ok(_) => Ok(EntryOutcome::Updated),
            Err(StatementError::Row(message)) => {
                Ok(EntryOutcome::Skipped(SkipReason::UpdateFailed(message)))
            }
            Err(StatementError::Handle(message)) => Err(MsiverError::OperationAborted(format!(
                "updating '{}' failed: {}",
                entry.file_name, message
            ))),
        }
    }
}
