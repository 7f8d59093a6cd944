//! Per-document version history.
//!
//! The [`VersionStore`] keeps an append-only list of [`Version`]s for every
//! normalized document title. Ordinals come from a single counter shared
//! by all documents, so they double as a global turn index.
//!
//! Recording content equal to the current tail is a no-op that reports
//! the tail's position. The equality check and the append happen under
//! one write lock.
//!
//! Histories stay in the tens of entries, so lookups re-scan the list
//! instead of keeping an index.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use chrono::Utc;

use crate::models::{Language, Version};

/// Normalize a document title into its history key (trimmed, lowercase).
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// What [`VersionStore::record_version`] reports back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    /// Snapshot of the full history after the call.
    pub history: Vec<Version>,
    /// Content of the entry before the tail, if any.
    pub previous_content: Option<String>,
    /// 1-based position of the current tail.
    pub version_number: usize,
    /// `false` when the content matched the tail and nothing was appended.
    pub appended: bool,
}

#[derive(Default)]
struct Inner {
    histories: HashMap<String, Vec<Version>>,
    ordinal: u64,
}

/// Process-wide, append-only version log keyed by normalized title.
#[derive(Default)]
pub struct VersionStore {
    inner: RwLock<Inner>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record `content` as the newest version of `title`.
    ///
    /// If the tail already holds exactly this content nothing is appended
    /// and the tail's position is returned. Otherwise a new version is
    /// stamped with the next global ordinal and the current time.
    pub fn record_version(&self, title: &str, content: &str, language: Language) -> RecordOutcome {
        let key = normalize_title(title);
        let mut inner = self.write();

        let is_duplicate = inner
            .histories
            .get(&key)
            .and_then(|h| h.last())
            .is_some_and(|tail| tail.content == content);

        if !is_duplicate {
            inner.ordinal += 1;
            let version = Version {
                content: content.to_string(),
                language,
                timestamp: Utc::now(),
                ordinal: inner.ordinal,
            };
            inner.histories.entry(key.clone()).or_default().push(version);
        }

        let history = inner.histories.get(&key).cloned().unwrap_or_default();
        let len = history.len();
        let previous_content = if len >= 2 {
            Some(history[len - 2].content.clone())
        } else {
            None
        };

        RecordOutcome {
            history,
            previous_content,
            version_number: len,
            appended: !is_duplicate,
        }
    }

    /// Full history for `title`, oldest first. Empty if never recorded.
    pub fn history(&self, title: &str) -> Vec<Version> {
        self.read()
            .histories
            .get(&normalize_title(title))
            .cloned()
            .unwrap_or_default()
    }

    /// The newest version of `title`.
    pub fn latest(&self, title: &str) -> Option<Version> {
        self.read()
            .histories
            .get(&normalize_title(title))
            .and_then(|h| h.last().cloned())
    }

    /// Version `number` (1-based) of `title`.
    pub fn version(&self, title: &str, number: usize) -> Option<Version> {
        if number == 0 {
            return None;
        }
        self.read()
            .histories
            .get(&normalize_title(title))
            .and_then(|h| h.get(number - 1).cloned())
    }

    /// Number of versions recorded for `title`.
    pub fn len(&self, title: &str) -> usize {
        self.read()
            .histories
            .get(&normalize_title(title))
            .map_or(0, Vec::len)
    }

    /// Re-record an older version as new content.
    ///
    /// History is never rewound: the restored content goes through
    /// [`record_version`](Self::record_version), so restoring the content
    /// already at the tail is a no-op.
    pub fn restore(&self, title: &str, number: usize) -> Result<RecordOutcome> {
        let Some(version) = self.version(title, number) else {
            bail!(
                "no version {} for '{}' ({} recorded)",
                number,
                normalize_title(title),
                self.len(title)
            );
        };
        Ok(self.record_version(title, &version.content, version.language))
    }

    /// All normalized titles with at least one version, sorted.
    pub fn titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self.read().histories.keys().cloned().collect();
        titles.sort();
        titles
    }

    /// The most recently issued global ordinal (0 before any version).
    pub fn current_ordinal(&self) -> u64 {
        self.read().ordinal
    }
}
