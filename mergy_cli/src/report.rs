use chrono::{DateTime, Local};
use mergy_common::{FolderMatchGroup, FolderRecord, MergeOperation, MergeSummary, MergyError};
use std::fs;
use std::path::Path;
use std::time::Duration;

const RULE: &str =
    "================================================================================";
const SECTION_RULE: &str = "----------------------------------------";

/// Default merge log file name, e.g. `merge_log_2026-08-29_14-02-33.log`.
pub fn default_log_name(started: DateTime<Local>) -> String {
    format!("merge_log_{}.log", started.format("%Y-%m-%d_%H-%M-%S"))
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    if total_secs >= 3600 {
        format!(
            "{}h {}m {}s",
            total_secs / 3600,
            (total_secs % 3600) / 60,
            total_secs % 60
        )
    } else if total_secs >= 60 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else if total_secs >= 1 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Write the human-readable merge log: what was scanned, what each
/// operation did, and the run totals.
pub fn write_merge_log(
    path: &Path,
    started: DateTime<Local>,
    folders: &[FolderRecord],
    groups: &[FolderMatchGroup],
    operations: &[MergeOperation],
    summary: &MergeSummary,
) -> mergy_common::Result<()> {
    let mut out = String::new();

    out.push_str(RULE);
    out.push('\n');
    out.push_str("MERGY MERGE LOG\n");
    out.push_str(&format!(
        "Started: {}\n",
        started.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(RULE);
    out.push_str("\n\n");

    out.push_str("SCAN PHASE\n");
    out.push_str(SECTION_RULE);
    out.push('\n');
    out.push_str(&format!("Folders examined: {}\n", folders.len()));
    out.push_str(&format!("Match groups:     {}\n", groups.len()));
    for (index, group) in groups.iter().enumerate() {
        out.push_str(&format!(
            "\nGroup {}: \"{}\" ({}, confidence {:.2})\n",
            index + 1,
            group.base_name,
            group.tier,
            group.confidence
        ));
        for folder in &group.folders {
            out.push_str(&format!(
                "  - {} ({} files, {})\n",
                folder.name,
                folder.file_count,
                format_size(folder.total_size)
            ));
        }
    }
    out.push('\n');

    out.push_str("MERGE OPERATIONS\n");
    out.push_str(SECTION_RULE);
    out.push('\n');
    if operations.is_empty() {
        out.push_str("(none)\n");
    }
    for (index, operation) in operations.iter().enumerate() {
        let sources: Vec<&str> = operation
            .selection
            .sources
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        let mode = if operation.dry_run { " (dry run)" } else { "" };
        out.push_str(&format!(
            "\n[{}] {} -> {}{}\n",
            index + 1,
            sources.join(" + "),
            operation.selection.primary.name,
            mode
        ));
        out.push_str(&format!("    Files copied:       {}\n", operation.files_copied));
        out.push_str(&format!("    Duplicates skipped: {}\n", operation.files_skipped));
        out.push_str(&format!("    Conflicts resolved: {}\n", operation.conflicts_resolved));
        out.push_str(&format!("    Folders removed:    {}\n", operation.folders_removed));

        if !operation.conflicts.is_empty() {
            out.push_str("    Conflicts:\n");
            for conflict in &operation.conflicts {
                let outcome = if conflict.primary_mtime >= conflict.conflict_mtime {
                    "kept primary copy"
                } else {
                    "kept source copy"
                };
                out.push_str(&format!(
                    "      {} ({outcome}, loser archived under .merged/)\n",
                    conflict.relative_path.display()
                ));
            }
        }
        if !operation.errors.is_empty() {
            out.push_str("    Errors:\n");
            for message in &operation.errors {
                out.push_str(&format!("      {message}\n"));
            }
        }
        if operation.aborted {
            out.push_str("    *** ABORTED: out of disk space ***\n");
        }
    }
    out.push('\n');

    out.push_str("SUMMARY\n");
    out.push_str(SECTION_RULE);
    out.push('\n');
    out.push_str(&format!("Operations:         {}\n", summary.total_operations));
    out.push_str(&format!("Files copied:       {}\n", summary.files_copied));
    out.push_str(&format!("Duplicates skipped: {}\n", summary.files_skipped));
    out.push_str(&format!("Conflicts resolved: {}\n", summary.conflicts_resolved));
    out.push_str(&format!("Folders removed:    {}\n", summary.folders_removed));
    out.push_str(&format!("Errors:             {}\n", summary.errors.len()));
    for message in &summary.errors {
        out.push_str(&format!("  ! {message}\n"));
    }
    out.push_str(&format!(
        "Duration:           {}\n",
        format_duration(summary.duration)
    ));
    let status = if summary.interrupted {
        "INTERRUPTED (out of disk space)"
    } else if summary.errors.is_empty() {
        "completed"
    } else {
        "completed with errors"
    };
    out.push_str(&format!("Status:             {status}\n"));
    out.push_str(RULE);
    out.push('\n');

    fs::write(path, out).map_err(|e| MergyError::from_io(e, path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mergy_common::{MatchTier, MergeSelection};
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn record(name: &str) -> FolderRecord {
        FolderRecord {
            path: PathBuf::from(format!("/data/{name}")),
            name: name.to_string(),
            file_count: 3,
            total_size: 2048,
            oldest_modified: SystemTime::UNIX_EPOCH,
            newest_modified: SystemTime::UNIX_EPOCH,
        }
    }

    fn sample_operation() -> MergeOperation {
        let primary = record("laptop");
        let source = record("laptop-backup");
        let group = FolderMatchGroup {
            folders: vec![primary.clone(), source.clone()],
            confidence: 1.0,
            tier: MatchTier::ExactPrefix,
            base_name: "laptop".to_string(),
        };
        let selection = MergeSelection::new(primary, vec![source], group).unwrap();
        let mut operation = MergeOperation::new(selection, false);
        operation.files_copied = 2;
        operation.files_skipped = 1;
        operation
    }

    #[test]
    fn default_log_name_embeds_timestamp() {
        let when = Local.with_ymd_and_hms(2026, 8, 29, 14, 2, 33).unwrap();
        assert_eq!(default_log_name(when), "merge_log_2026-08-29_14-02-33.log");
    }

    #[test]
    fn durations_humanize() {
        assert_eq!(format_duration(Duration::from_millis(450)), "450ms");
        assert_eq!(format_duration(Duration::from_millis(2_300)), "2.3s");
        assert_eq!(format_duration(Duration::from_secs(83)), "1m 23s");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1h 2m 5s");
    }

    #[test]
    fn sizes_humanize() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn log_has_all_sections() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("merge.log");

        let operation = sample_operation();
        let mut summary = MergeSummary::default();
        summary.absorb(&operation);
        summary.duration = Duration::from_secs(2);

        let group = operation.selection.group.clone();
        let folders = group.folders.clone();
        let started = Local.with_ymd_and_hms(2026, 8, 29, 10, 0, 0).unwrap();

        write_merge_log(
            &log_path,
            started,
            &folders,
            &[group],
            &[operation],
            &summary,
        )
        .unwrap();

        let contents = fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("MERGY MERGE LOG"));
        assert!(contents.contains("SCAN PHASE"));
        assert!(contents.contains("MERGE OPERATIONS"));
        assert!(contents.contains("SUMMARY"));
        assert!(contents.contains("laptop-backup -> laptop"));
        assert!(contents.contains("Files copied:       2"));
        assert!(contents.contains("Status:             completed"));
    }

    #[test]
    fn interrupted_run_is_called_out() {
        let temp = TempDir::new().unwrap();
        let log_path = temp.path().join("merge.log");

        let mut operation = sample_operation();
        operation.aborted = true;
        operation.errors.push("Disk full".to_string());

        let mut summary = MergeSummary::default();
        summary.absorb(&operation);

        let started = Local.with_ymd_and_hms(2026, 8, 29, 10, 0, 0).unwrap();
        write_merge_log(&log_path, started, &[], &[], &[operation], &summary).unwrap();

        let contents = fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("ABORTED"));
        assert!(contents.contains("INTERRUPTED"));
    }
}
