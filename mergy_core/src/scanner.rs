use crate::merge_engine::MERGED_DIR_NAME;
use jwalk::WalkDir;
use mergy_common::{FolderRecord, MergyError, Result};
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Builds [`FolderRecord`]s for the immediate subdirectories of a base
/// path, the unit the matcher and merge engine operate on.
pub struct FolderScanner {
    follow_symlinks: bool,
}

impl Default for FolderScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FolderScanner {
    pub fn new() -> Self {
        Self { follow_symlinks: false }
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Scan the immediate subdirectories of `base`, sorted by name.
    ///
    /// Unreadable subdirectories are skipped with a warning in `errors`
    /// rather than failing the whole scan; an unreadable base is an
    /// error.
    pub fn scan(&self, base: &Path, errors: &mut Vec<String>) -> Result<Vec<FolderRecord>> {
        let metadata = fs::metadata(base).map_err(|e| MergyError::from_io(e, base))?;
        if !metadata.is_dir() {
            return Err(MergyError::NotFound(format!(
                "{} is not a directory",
                base.display()
            )));
        }

        info!(base = %base.display(), "scanning for folders");

        let mut records = Vec::new();
        let entries = fs::read_dir(base).map_err(|e| MergyError::from_io(e, base))?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(format!("Error reading entry under {}: {e}", base.display()));
                    continue;
                }
            };
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir || entry.file_name() == MERGED_DIR_NAME {
                continue;
            }
            match self.scan_folder(&path, errors) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(folder = %path.display(), error = %e, "skipping unreadable folder");
                    errors.push(format!("Error scanning {}: {e}", path.display()));
                }
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        info!(folders = records.len(), "scan complete");
        Ok(records)
    }

    /// Summarize one folder: recursive file count, total size, and the
    /// mtime range of its files. A folder with no files reports its own
    /// mtime for both bounds.
    pub fn scan_folder(&self, path: &Path, errors: &mut Vec<String>) -> Result<FolderRecord> {
        let metadata = fs::metadata(path).map_err(|e| MergyError::from_io(e, path))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let mut file_count = 0u64;
        let mut total_size = 0u64;
        let mut oldest: Option<SystemTime> = None;
        let mut newest: Option<SystemTime> = None;

        let walker = WalkDir::new(path)
            .follow_links(self.follow_symlinks)
            .skip_hidden(false);

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    errors.push(format!("Error walking {}: {e}", path.display()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            // archived conflict losers never count toward folder stats
            let in_merged = entry
                .path()
                .strip_prefix(path)
                .map(|rel| rel.iter().any(|c| c == MERGED_DIR_NAME))
                .unwrap_or(false);
            if in_merged {
                continue;
            }
            let file_meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    errors.push(format!("Error reading {}: {e}", entry.path().display()));
                    continue;
                }
            };
            file_count += 1;
            total_size += file_meta.len();
            if let Ok(modified) = file_meta.modified() {
                oldest = Some(oldest.map_or(modified, |o| o.min(modified)));
                newest = Some(newest.map_or(modified, |n| n.max(modified)));
            }
        }

        let folder_mtime = metadata
            .modified()
            .map_err(|e| MergyError::from_io(e, path))?;

        debug!(
            folder = %path.display(),
            files = file_count,
            bytes = total_size,
            "folder summarized"
        );

        Ok(FolderRecord {
            path: path.to_path_buf(),
            name,
            file_count,
            total_size,
            oldest_modified: oldest.unwrap_or(folder_mtime),
            newest_modified: newest.unwrap_or(folder_mtime),
        })
    }
}
