mod report;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use mergy_common::{
    load_config, FolderMatchGroup, FolderRecord, MergeOperation, MergeSelection, MergeSummary,
    MergyError,
};
use mergy_core::{ContentHasher, FolderMatcher, FolderScanner, MergeEngine};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mergy")]
#[command(author = "Mergy Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Find and merge folders that hold copies of the same data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory and report groups of folders that look mergeable
    Scan {
        /// Directory whose immediate subfolders are examined
        base: PathBuf,

        /// Minimum match confidence, between 0 and 1
        #[arg(short = 'm', long)]
        min_confidence: Option<f64>,

        /// Follow symbolic links
        #[arg(short = 'L', long)]
        follow_symlinks: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Merge each matched group of folders into its primary folder
    Merge {
        /// Directory whose immediate subfolders are examined
        base: PathBuf,

        /// Minimum match confidence, between 0 and 1
        #[arg(short = 'm', long)]
        min_confidence: Option<f64>,

        /// Follow symbolic links
        #[arg(short = 'L', long)]
        follow_symlinks: bool,

        /// Plan and report without touching any file
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Merge every group without prompting
        #[arg(short = 'y', long)]
        yes: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Where to write the merge log (default: merge_log_<timestamp>.log)
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Skip writing the merge log
        #[arg(long, conflicts_with = "log_file")]
        no_log: bool,
    },
}

fn main() {
    // Initialize tracing to stderr (so JSON output can go cleanly to stdout)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scan {
            base,
            min_confidence,
            follow_symlinks,
            json,
        } => run_scan(base, min_confidence, follow_symlinks, json),
        Commands::Merge {
            base,
            min_confidence,
            follow_symlinks,
            dry_run,
            yes,
            json,
            log_file,
            no_log,
        } => run_merge(
            base,
            min_confidence,
            follow_symlinks,
            dry_run,
            yes,
            json,
            log_file,
            no_log,
        ),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

fn build_tools(
    min_confidence: Option<f64>,
    follow_symlinks: bool,
) -> anyhow::Result<(FolderMatcher, FolderScanner)> {
    let loaded = load_config(false)?;
    let mut config = loaded.config;
    if let Some(value) = min_confidence {
        config.min_confidence = value;
    }
    if follow_symlinks {
        config.follow_symlinks = true;
    }

    let matcher = FolderMatcher::new(config.min_confidence)?;
    let scanner = FolderScanner::new().follow_symlinks(config.follow_symlinks);
    Ok((matcher, scanner))
}

fn run_scan(
    base: PathBuf,
    min_confidence: Option<f64>,
    follow_symlinks: bool,
    json: bool,
) -> anyhow::Result<i32> {
    let (matcher, scanner) = build_tools(min_confidence, follow_symlinks)?;

    let mut scan_errors = Vec::new();
    let folders = scanner.scan(&base, &mut scan_errors)?;
    info!("Found {} folders under {}", folders.len(), base.display());

    let groups = matcher.find_matches(&folders);
    for message in &scan_errors {
        warn!("{message}");
    }

    if json {
        let report = ScanReport {
            base: base.to_string_lossy().to_string(),
            folders_scanned: folders.len(),
            groups: &groups,
            errors: &scan_errors,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_scan_results(&folders, &groups);
    }

    Ok(if scan_errors.is_empty() { 0 } else { 2 })
}

fn run_merge(
    base: PathBuf,
    min_confidence: Option<f64>,
    follow_symlinks: bool,
    dry_run: bool,
    yes: bool,
    json: bool,
    log_file: Option<PathBuf>,
    no_log: bool,
) -> anyhow::Result<i32> {
    let (matcher, scanner) = build_tools(min_confidence, follow_symlinks)?;
    let started = chrono::Local::now();
    let clock = Instant::now();

    let mut scan_errors = Vec::new();
    let folders = scanner.scan(&base, &mut scan_errors)?;
    let groups = matcher.find_matches(&folders);
    info!(
        "Found {} folders, {} mergeable groups",
        folders.len(),
        groups.len()
    );

    let mut engine = MergeEngine::new(ContentHasher::new());
    let mut summary = MergeSummary::default();
    summary.errors.extend(scan_errors);
    let mut operations: Vec<MergeOperation> = Vec::new();

    for group in &groups {
        let selection = match plan_selection(group) {
            Ok(selection) => selection,
            Err(e) => {
                warn!("Skipping group '{}': {e}", group.base_name);
                summary.errors.push(format!("Group '{}': {e}", group.base_name));
                continue;
            }
        };

        if !yes && !dry_run && !confirm(&selection)? {
            info!("Skipping '{}'", selection.primary.name);
            continue;
        }

        let bar = progress_bar();
        let operation = engine.merge_with_progress(&selection, dry_run, |index, total, path| {
            bar.set_length(total as u64);
            bar.set_position(index as u64 + 1);
            bar.set_message(path.display().to_string());
        });
        bar.finish_and_clear();

        let aborted = operation.aborted;
        summary.absorb(&operation);
        operations.push(operation);

        if aborted {
            error!("Out of disk space, remaining groups left untouched");
            break;
        }
    }
    summary.duration = clock.elapsed();

    let cache = engine.hasher().stats();
    info!(
        hash_hits = cache.hits,
        hash_misses = cache.misses,
        "content hash cache statistics"
    );

    if !no_log {
        let log_path =
            log_file.unwrap_or_else(|| PathBuf::from(report::default_log_name(started)));
        report::write_merge_log(&log_path, started, &folders, &groups, &operations, &summary)?;
        info!("Merge log written to {}", log_path.display());
    }

    if json {
        let out = MergeReport {
            base: base.to_string_lossy().to_string(),
            dry_run,
            operations: &operations,
            summary: &summary,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_merge_summary(&summary, dry_run);
    }

    Ok(if summary.interrupted || !summary.errors.is_empty() {
        2
    } else {
        0
    })
}

/// Pick a primary for the group: most files, then largest, then first by
/// name. The rest become merge sources.
fn plan_selection(group: &FolderMatchGroup) -> mergy_common::Result<MergeSelection> {
    let mut members = group.folders.clone();
    members.sort_by(|a, b| {
        b.file_count
            .cmp(&a.file_count)
            .then_with(|| b.total_size.cmp(&a.total_size))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.path.cmp(&b.path))
    });

    let mut members = members.into_iter();
    let primary = members
        .next()
        .ok_or_else(|| MergyError::Config("match group has no members".to_string()))?;
    MergeSelection::new(primary, members.collect(), group.clone())
}

fn confirm(selection: &MergeSelection) -> anyhow::Result<bool> {
    let sources: Vec<&str> = selection.sources.iter().map(|s| s.name.as_str()).collect();
    eprint!(
        "Merge [{}] into '{}'? [y/N] ",
        sources.join(", "),
        selection.primary.name
    );
    std::io::stderr().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("[{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

fn print_scan_results(folders: &[FolderRecord], groups: &[FolderMatchGroup]) {
    println!("\n{}", "=".repeat(80));
    println!("Folder Match Groups");
    println!("{}", "=".repeat(80));

    if groups.is_empty() {
        println!("No mergeable folder groups found.");
    }

    for (index, group) in groups.iter().enumerate() {
        println!(
            "\nGroup {}: \"{}\" ({}, confidence {:.2})",
            index + 1,
            group.base_name,
            group.tier,
            group.confidence
        );
        for folder in &group.folders {
            println!(
                "  {:<40} {:>8} files  {:>10}",
                folder.name,
                folder.file_count,
                report::format_size(folder.total_size)
            );
        }
    }

    println!("\n{}", "=".repeat(80));
    println!(
        "Scanned {} folders, found {} groups",
        folders.len(),
        groups.len()
    );
    println!("{}", "=".repeat(80));
}

fn print_merge_summary(summary: &MergeSummary, dry_run: bool) {
    let title = if dry_run {
        "Merge Summary (dry run)"
    } else {
        "Merge Summary"
    };

    println!("\n{}", "=".repeat(80));
    println!("{title}");
    println!("{}", "=".repeat(80));
    println!("  Operations:          {}", summary.total_operations);
    println!("  Files copied:        {}", summary.files_copied);
    println!("  Duplicates skipped:  {}", summary.files_skipped);
    println!("  Conflicts resolved:  {}", summary.conflicts_resolved);
    println!("  Folders removed:     {}", summary.folders_removed);
    println!("  Errors:              {}", summary.errors.len());
    println!(
        "  Elapsed:             {}",
        report::format_duration(summary.duration)
    );
    for message in &summary.errors {
        println!("    ! {message}");
    }
    if summary.interrupted {
        println!("  *** Merge interrupted: out of disk space ***");
    }
    println!("{}", "=".repeat(80));
}

#[derive(Serialize)]
struct ScanReport<'a> {
    base: String,
    folders_scanned: usize,
    groups: &'a [FolderMatchGroup],
    errors: &'a [String],
}

#[derive(Serialize)]
struct MergeReport<'a> {
    base: String,
    dry_run: bool,
    operations: &'a [MergeOperation],
    summary: &'a MergeSummary,
}
