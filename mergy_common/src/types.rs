use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::error::{MergyError, Result};

/// BLAKE3 content digest (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters, the suffix used for archived conflict
    /// losers under `.merged/`. This is a durable on-disk format.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl From<blake3::Hash> for ContentDigest {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

/// Metadata for one top-level folder, produced by the scanner and
/// consumed read-only by the matching and merge engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRecord {
    /// Absolute, canonical path
    pub path: PathBuf,
    /// Display name, typically the last path segment
    pub name: String,
    pub file_count: u64,
    pub total_size: u64,
    /// For an empty folder both bounds equal the folder's own mtime
    pub oldest_modified: SystemTime,
    pub newest_modified: SystemTime,
}

/// Which matching tier produced a match, in decreasing priority and
/// confidence ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// One name is a delimiter-bounded prefix of the other
    ExactPrefix,
    /// Names are equal after collapsing delimiter runs
    Normalized,
    /// Token sets overlap (Jaccard similarity)
    TokenMatch,
    /// Token-order-independent string similarity
    FuzzyMatch,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchTier::ExactPrefix => "exact_prefix",
            MatchTier::Normalized => "normalized",
            MatchTier::TokenMatch => "token_match",
            MatchTier::FuzzyMatch => "fuzzy_match",
        }
    }
}

impl std::fmt::Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transitively-closed group of folders believed to represent the same
/// logical source. Members are sorted by name; confidence and tier come
/// from the strongest pair inside the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderMatchGroup {
    pub folders: Vec<FolderRecord>,
    /// In [0.0, 1.0], at least the matcher's configured minimum
    pub confidence: f64,
    pub tier: MatchTier,
    /// Representative name for the group
    pub base_name: String,
}

/// The user's (or orchestrator's) choice of what to merge where.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeSelection {
    pub primary: FolderRecord,
    pub sources: Vec<FolderRecord>,
    pub group: FolderMatchGroup,
}

impl MergeSelection {
    /// Build a selection, enforcing that there is at least one source and
    /// that the primary is not also listed as a source.
    pub fn new(
        primary: FolderRecord,
        sources: Vec<FolderRecord>,
        group: FolderMatchGroup,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(MergyError::Config(
                "merge selection requires at least one source folder".to_string(),
            ));
        }
        if sources.iter().any(|s| s.path == primary.path) {
            return Err(MergyError::Config(format!(
                "primary folder {} cannot also be a merge source",
                primary.path.display()
            )));
        }
        Ok(Self {
            primary,
            sources,
            group,
        })
    }
}

/// Two files at the same relative path with different content.
///
/// Timestamps are file modification times; resolution keeps the file with
/// the later mtime, ties favoring the primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConflict {
    /// Path within either folder root, nested components preserved
    pub relative_path: PathBuf,
    pub primary_file: PathBuf,
    pub conflicting_file: PathBuf,
    pub primary_hash: ContentDigest,
    pub conflict_hash: ContentDigest,
    pub primary_mtime: SystemTime,
    pub conflict_mtime: SystemTime,
}

/// Result of one merge call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOperation {
    pub selection: MergeSelection,
    pub dry_run: bool,
    /// Operation start time
    pub timestamp: SystemTime,
    /// New files copied into the primary
    pub files_copied: u64,
    /// True duplicates skipped
    pub files_skipped: u64,
    pub conflicts_resolved: u64,
    /// Emptied source directories reclaimed
    pub folders_removed: u64,
    /// Non-fatal per-item failures; processing continued past these
    pub errors: Vec<String>,
    /// Conflicts encountered, retained for detailed logging
    pub conflicts: Vec<FileConflict>,
    /// True when out-of-space cut this operation short; partial counts
    /// cover whatever completed before the abort
    pub aborted: bool,
}

impl MergeOperation {
    pub fn new(selection: MergeSelection, dry_run: bool) -> Self {
        Self {
            selection,
            dry_run,
            timestamp: SystemTime::now(),
            files_copied: 0,
            files_skipped: 0,
            conflicts_resolved: 0,
            folders_removed: 0,
            errors: Vec::new(),
            conflicts: Vec::new(),
            aborted: false,
        }
    }
}

/// Aggregation of the merge operations performed in one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeSummary {
    pub total_operations: u64,
    pub files_copied: u64,
    pub files_skipped: u64,
    pub conflicts_resolved: u64,
    pub folders_removed: u64,
    pub errors: Vec<String>,
    pub duration: Duration,
    /// True when a fatal condition stopped the run early
    pub interrupted: bool,
}

impl MergeSummary {
    pub fn absorb(&mut self, operation: &MergeOperation) {
        self.total_operations += 1;
        self.files_copied += operation.files_copied;
        self.files_skipped += operation.files_skipped;
        self.conflicts_resolved += operation.conflicts_resolved;
        self.folders_removed += operation.folders_removed;
        self.errors.extend(operation.errors.iter().cloned());
        if operation.aborted {
            self.interrupted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> FolderRecord {
        FolderRecord {
            path: PathBuf::from(format!("/data/{name}")),
            name: name.to_string(),
            file_count: 1,
            total_size: 10,
            oldest_modified: SystemTime::UNIX_EPOCH,
            newest_modified: SystemTime::UNIX_EPOCH,
        }
    }

    fn group(members: Vec<FolderRecord>) -> FolderMatchGroup {
        FolderMatchGroup {
            folders: members,
            confidence: 1.0,
            tier: MatchTier::ExactPrefix,
            base_name: "laptop".to_string(),
        }
    }

    #[test]
    fn short_hex_is_sixteen_chars() {
        let digest = ContentDigest([0xab; 32]);
        assert_eq!(digest.short_hex().len(), 16);
        assert!(digest.to_hex().starts_with(&digest.short_hex()));
    }

    #[test]
    fn selection_rejects_empty_sources() {
        let primary = record("laptop");
        let g = group(vec![primary.clone()]);
        let result = MergeSelection::new(primary, vec![], g);
        assert!(matches!(result, Err(MergyError::Config(_))));
    }

    #[test]
    fn selection_rejects_primary_in_sources() {
        let primary = record("laptop");
        let g = group(vec![primary.clone()]);
        let result = MergeSelection::new(primary.clone(), vec![primary], g);
        assert!(matches!(result, Err(MergyError::Config(_))));
    }

    #[test]
    fn summary_accumulates_operations() {
        let primary = record("laptop");
        let source = record("laptop-backup");
        let g = group(vec![primary.clone(), source.clone()]);
        let selection = MergeSelection::new(primary, vec![source], g).unwrap();

        let mut op = MergeOperation::new(selection, false);
        op.files_copied = 3;
        op.files_skipped = 2;
        op.errors.push("permission denied: /data/x".to_string());

        let mut summary = MergeSummary::default();
        summary.absorb(&op);
        summary.absorb(&op);

        assert_eq!(summary.total_operations, 2);
        assert_eq!(summary.files_copied, 6);
        assert_eq!(summary.files_skipped, 4);
        assert_eq!(summary.errors.len(), 2);
        assert!(!summary.interrupted);
    }

    #[test]
    fn summary_marks_interrupted_on_abort() {
        let primary = record("laptop");
        let source = record("laptop.old");
        let g = group(vec![primary.clone(), source.clone()]);
        let selection = MergeSelection::new(primary, vec![source], g).unwrap();

        let mut op = MergeOperation::new(selection, false);
        op.aborted = true;

        let mut summary = MergeSummary::default();
        summary.absorb(&op);
        assert!(summary.interrupted);
    }

    #[test]
    fn tier_priority_order() {
        assert!(MatchTier::ExactPrefix < MatchTier::Normalized);
        assert!(MatchTier::Normalized < MatchTier::TokenMatch);
        assert!(MatchTier::TokenMatch < MatchTier::FuzzyMatch);
    }
}
