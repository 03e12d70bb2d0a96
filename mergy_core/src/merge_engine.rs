use crate::hasher::ContentHasher;
use mergy_common::{
    ContentDigest, FileConflict, MergeOperation, MergeSelection, MergyError, Result,
};
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Directory name under which conflict losers are archived. Never merged
/// from, never cleaned up. The `<stem>_<hash16><.ext>` naming inside it
/// is a durable on-disk format.
pub const MERGED_DIR_NAME: &str = ".merged";

/// File-level merge of source folders into a primary folder.
///
/// Single-threaded and synchronous; the optional progress callback runs
/// inline between file operations. Owns the content hasher so duplicate
/// detection across sources shares one cache.
pub struct MergeEngine {
    hasher: ContentHasher,
}

impl MergeEngine {
    pub fn new(hasher: ContentHasher) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    /// Merge every source folder of the selection into its primary.
    pub fn merge(&mut self, selection: &MergeSelection, dry_run: bool) -> MergeOperation {
        self.merge_with_progress(selection, dry_run, |_, _, _| {})
    }

    /// Like [`merge`](Self::merge), invoking `progress` with
    /// `(index, total, relative_path)` before each file is processed, in
    /// both dry and live runs.
    ///
    /// Soft failures are recorded in the operation's error list and
    /// processing continues; out-of-space is recorded and aborts the rest
    /// of this call, leaving partial counts and `aborted` set.
    pub fn merge_with_progress<F>(
        &mut self,
        selection: &MergeSelection,
        dry_run: bool,
        mut progress: F,
    ) -> MergeOperation
    where
        F: FnMut(usize, usize, &Path),
    {
        let mut operation = MergeOperation::new(selection.clone(), dry_run);
        let primary_root = selection.primary.path.clone();

        info!(
            primary = %primary_root.display(),
            sources = selection.sources.len(),
            dry_run,
            "starting merge"
        );

        let mut queue: Vec<(PathBuf, PathBuf)> = Vec::new();
        for source in &selection.sources {
            enumerate_files(&source.path, &mut queue, &mut operation.errors);
        }
        let total = queue.len();

        for (index, (source_file, relative_path)) in queue.iter().enumerate() {
            progress(index, total, relative_path);

            let dest_file = primary_root.join(relative_path);
            match self.process_file(source_file, &dest_file, relative_path, dry_run, &mut operation)
            {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    let msg = format!("Disk full - aborting merge operation: {e}");
                    error!("{msg}");
                    operation.errors.push(msg);
                    operation.aborted = true;
                    return operation;
                }
                Err(e) => {
                    let msg = format!("Error processing {}: {e}", source_file.display());
                    warn!("{msg}");
                    operation.errors.push(msg);
                }
            }
        }

        for source in &selection.sources {
            if dry_run {
                operation.folders_removed += count_removable_dirs(&source.path);
            } else {
                operation.folders_removed += remove_empty_dirs(&source.path);
            }
        }

        info!(
            copied = operation.files_copied,
            skipped = operation.files_skipped,
            conflicts = operation.conflicts_resolved,
            folders_removed = operation.folders_removed,
            errors = operation.errors.len(),
            "merge finished"
        );
        operation
    }

    /// Classify one file as new, duplicate, or conflicting and apply the
    /// corresponding action.
    fn process_file(
        &mut self,
        source_file: &Path,
        dest_file: &Path,
        relative_path: &Path,
        dry_run: bool,
        operation: &mut MergeOperation,
    ) -> Result<()> {
        if !dest_file.exists() {
            if dry_run {
                check_readable(source_file)?;
                check_destination_writable(dest_file)?;
            } else {
                copy_preserving_mtime(source_file, dest_file)?;
            }
            operation.files_copied += 1;
            debug!(path = %relative_path.display(), "copied new file");
            return Ok(());
        }

        let primary_hash = self.hasher.fingerprint(dest_file)?;
        let conflict_hash = self.hasher.fingerprint(source_file)?;

        if primary_hash == conflict_hash {
            operation.files_skipped += 1;
            debug!(path = %relative_path.display(), "skipped duplicate");
            return Ok(());
        }

        let conflict = FileConflict {
            relative_path: relative_path.to_path_buf(),
            primary_file: dest_file.to_path_buf(),
            conflicting_file: source_file.to_path_buf(),
            primary_hash,
            conflict_hash,
            primary_mtime: file_mtime(dest_file)?,
            conflict_mtime: file_mtime(source_file)?,
        };

        self.resolve_conflict(&conflict, dry_run)?;
        operation.conflicts_resolved += 1;
        operation.conflicts.push(conflict);
        debug!(path = %relative_path.display(), "resolved conflict");
        Ok(())
    }

    /// Keep the file with the later mtime at the primary location (ties
    /// favor the primary) and move the loser into `.merged/` beside the
    /// conflicting destination.
    fn resolve_conflict(&mut self, conflict: &FileConflict, dry_run: bool) -> Result<()> {
        let primary_wins = conflict.primary_mtime >= conflict.conflict_mtime;

        let (loser, loser_hash) = if primary_wins {
            (&conflict.conflicting_file, &conflict.conflict_hash)
        } else {
            (&conflict.primary_file, &conflict.primary_hash)
        };

        let parent = conflict
            .primary_file
            .parent()
            .ok_or_else(|| MergyError::NotFound(conflict.primary_file.display().to_string()))?;
        let merged_dir = parent.join(MERGED_DIR_NAME);
        let preserved_path = merged_dir.join(archived_name(&conflict.relative_path, loser_hash));

        if dry_run {
            check_readable(loser)?;
            check_destination_writable(&preserved_path)?;
            return Ok(());
        }

        fs::create_dir_all(&merged_dir).map_err(|e| MergyError::from_io(e, &merged_dir))?;
        move_file(loser, &preserved_path)?;

        if !primary_wins {
            copy_preserving_mtime(&conflict.conflicting_file, &conflict.primary_file)?;
        }

        info!(
            path = %conflict.relative_path.display(),
            preserved = %preserved_path.display(),
            "conflict resolved, older version archived"
        );
        Ok(())
    }
}

/// Archived name for a conflict loser: `<stem>_<hash16><.ext>`, or
/// `<name>_<hash16>` when there is no extension.
fn archived_name(relative_path: &Path, digest: &ContentDigest) -> String {
    let hash16 = digest.short_hex();
    let stem = relative_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match relative_path.extension() {
        Some(ext) => format!("{stem}_{hash16}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{hash16}"),
    }
}

/// Recursive enumeration of regular files under `root`, skipping any
/// subtree rooted at a directory named `.merged`. Sorted walk keeps the
/// processing order (and progress totals) stable for a given tree.
fn enumerate_files(root: &Path, queue: &mut Vec<(PathBuf, PathBuf)>, errors: &mut Vec<String>) {
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == MERGED_DIR_NAME));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                errors.push(format!("Error walking {}: {e}", root.display()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.path().strip_prefix(root) {
            Ok(rel) => queue.push((entry.path().to_path_buf(), rel.to_path_buf())),
            Err(e) => errors.push(format!("Error relativizing {}: {e}", entry.path().display())),
        }
    }
}

fn file_mtime(path: &Path) -> Result<std::time::SystemTime> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| MergyError::from_io(e, path))
}

fn copy_preserving_mtime(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| MergyError::from_io(e, parent))?;
    }

    fs::copy(source, dest).map_err(|e| MergyError::from_io(e, dest))?;

    if let Ok(metadata) = fs::metadata(source) {
        if let Ok(modified) = metadata.modified() {
            let _ = set_file_mtime(dest, FileTime::from_system_time(modified));
        }
    }
    Ok(())
}

/// Rename, falling back to copy+delete across filesystems.
fn move_file(source: &Path, dest: &Path) -> Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            #[cfg(unix)]
            let is_cross_device = e.raw_os_error() == Some(18); // EXDEV

            #[cfg(windows)]
            let is_cross_device = e.raw_os_error() == Some(17); // ERROR_NOT_SAME_DEVICE

            #[cfg(not(any(unix, windows)))]
            let is_cross_device = true;

            if is_cross_device {
                debug!(
                    source = %source.display(),
                    dest = %dest.display(),
                    "cross-filesystem move, using copy+delete"
                );
                fs::copy(source, dest).map_err(|err| MergyError::from_io(err, dest))?;
                fs::remove_file(source).map_err(|err| MergyError::from_io(err, source))?;
                Ok(())
            } else {
                Err(MergyError::from_io(e, source))
            }
        }
    }
}

fn check_readable(path: &Path) -> Result<()> {
    fs::File::open(path).map_err(|e| MergyError::from_io(e, path))?;
    Ok(())
}

/// Dry-run stand-in for a write: the nearest existing ancestor of the
/// destination must be a writable directory.
fn check_destination_writable(dest: &Path) -> Result<()> {
    let ancestor = dest
        .ancestors()
        .skip(1)
        .find(|p| p.exists())
        .ok_or_else(|| MergyError::NotFound(dest.display().to_string()))?;

    let metadata = fs::metadata(ancestor).map_err(|e| MergyError::from_io(e, ancestor))?;
    if metadata.permissions().readonly() {
        return Err(MergyError::PermissionDenied(ancestor.display().to_string()));
    }
    Ok(())
}

/// Remove empty directories bottom-up, never touching `.merged`
/// directories or the walk root itself. Deepest-first `remove_dir`
/// cascades: a directory holding only emptied directories goes too.
fn remove_empty_dirs(root: &Path) -> u64 {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == MERGED_DIR_NAME))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir() && e.path() != root)
        .map(|e| e.path().to_path_buf())
        .collect();
    dirs.sort_by(|a, b| b.components().count().cmp(&a.components().count()));

    let mut removed = 0;
    for dir in dirs {
        // remove_dir refuses non-empty directories, which is exactly the
        // bottom-up emptiness test
        if fs::remove_dir(&dir).is_ok() {
            debug!(dir = %dir.display(), "removed empty directory");
            removed += 1;
        }
    }
    removed
}

/// Dry-run counterpart of [`remove_empty_dirs`]: counts the directories a
/// live cleanup would remove, cascading through directories that hold
/// only removable children, without deleting anything.
fn count_removable_dirs(root: &Path) -> u64 {
    fn visit(dir: &Path) -> (bool, u64) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return (false, 0),
        };

        let mut removable_children = 0;
        let mut empty = true;
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                empty = false;
                continue;
            }
            if entry.file_name() == MERGED_DIR_NAME {
                empty = false;
                continue;
            }
            let (child_empty, child_count) = visit(&entry.path());
            removable_children += child_count;
            if !child_empty {
                empty = false;
            }
        }
        let count = removable_children + u64::from(empty);
        (empty, count)
    }

    let (root_empty, count) = visit(root);
    // the source root itself is never removed
    if root_empty {
        count - 1
    } else {
        count
    }
}
