use std::collections::HashSet;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use crate::audit::{AuditRecorder, AuditSink, NullAudit};
use crate::classify::classify_all;
use crate::error::ScanError;
use crate::filter::PathFilter;
use crate::model::{
    AuditStatus, FileRecord, RootFailure, ScanMetadata, ScanMetrics, ScanPhase,
    ScanProgressEvent, ScanReport, REPORT_VERSION,
};
use crate::report::{build_report, ReportOptions, DEFAULT_TOP_FILES};
use crate::rules::{PrefixSet, RuleSet};
use crate::volume::{
    detect_mount_points, detect_primary_volume, detect_volumes, should_skip_auto_root,
};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Roots to walk, in order. Empty means every detected volume.
    pub paths: Vec<PathBuf>,
    pub exclude_system: bool,
    pub excludes: Vec<String>,
    pub rules: RuleSet,
    /// Volume checked by move suggestions. `None` means the detected OS volume.
    pub primary_volume: Option<PathBuf>,
    /// Mount table used to tell the primary volume from volumes mounted
    /// inside it. `None` means the detected volumes.
    pub mount_points: Option<Vec<PathBuf>>,
    pub top_files_limit: usize,
    pub progress: bool,
    pub scan_id: Option<String>,
    pub emit_progress_events: bool,
    /// Minimum spacing of walk progress events and progress log lines.
    pub progress_interval_ms: u64,
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            exclude_system: true,
            excludes: Vec::new(),
            rules: RuleSet::detect(),
            primary_volume: None,
            mount_points: None,
            top_files_limit: DEFAULT_TOP_FILES,
            progress: false,
            scan_id: None,
            emit_progress_events: false,
            progress_interval_ms: 250,
            cancel_flag: None,
        }
    }
}

/// Walk progress after each completed directory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WalkProgress {
    pub fraction: f64,
    pub visited_directories: u64,
    pub total_directories: u64,
    pub scanned_files: u64,
    pub scanned_bytes: u64,
    pub current_path: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanCounters {
    pub total_directories: u64,
    pub visited_directories: u64,
    pub excluded_directories: u64,
    pub scanned_files: u64,
    pub scanned_bytes: u64,
    pub skipped_entries: u64,
}

/// Raw output of [`scan_volumes`]: unclassified records plus what went wrong.
#[derive(Debug, Default)]
pub struct VolumeScan {
    pub records: Vec<FileRecord>,
    pub scanned_roots: Vec<PathBuf>,
    pub root_failures: Vec<RootFailure>,
    pub audit: AuditStatus,
    pub counters: ScanCounters,
    pub warnings: Vec<String>,
    pub cancelled: bool,
}

pub struct ScanRunOutput {
    pub report: ScanReport,
    pub events: Vec<ScanProgressEvent>,
}

/// Walks `roots` and stats every file in directories the filter keeps.
///
/// Directories are counted in a first pass so progress can be reported as a
/// fraction after each directory of the second pass; the last reported value
/// is always exactly 1.0 unless the scan was cancelled. Unreadable files are
/// skipped and unusable roots are recorded in `root_failures`; neither stops
/// the walk. Audit sink failures are tallied in `audit`.
///
/// Roots nested under another root are dropped, and a directory reached twice
/// under different paths (bind mounts) is only walked the first time, so each
/// file is recorded at most once.
pub fn scan_volumes(
    roots: &[PathBuf],
    filter: &PathFilter,
    cancel: Option<&AtomicBool>,
    on_progress: &mut dyn FnMut(WalkProgress),
    audit: &mut dyn AuditSink,
) -> Result<VolumeScan, ScanError> {
    if roots.is_empty() {
        return Err(ScanError::NoRoots);
    }

    let mut output = VolumeScan::default();
    let mut walkable = Vec::new();
    for root in roots {
        if let Err(err) = check_root(root) {
            warn!("skipping scan root: {err}");
            output.root_failures.push(err.to_root_failure(root));
            continue;
        }
        if filter.is_excluded(root) {
            output.warnings.push(format!(
                "scan root {} is excluded by the system folder filter",
                root.display()
            ));
            continue;
        }
        walkable.push(root.as_path());
    }
    let walkable = collapse_nested_roots(walkable, &mut output.warnings);

    let mut counted = VisitedDirectories::default();
    output.counters.total_directories = walkable
        .iter()
        .map(|root| count_directories(root, filter, &mut counted))
        .sum();
    debug!(
        "counted {} directories across {} root(s)",
        output.counters.total_directories,
        walkable.len()
    );

    let mut state = WalkState {
        tracker: ProgressTracker::new(output.counters.total_directories),
        visited: VisitedDirectories::default(),
    };
    let mut recorder = AuditRecorder::new(audit);
    for root in walkable {
        if is_cancelled(cancel) {
            output.cancelled = true;
            break;
        }
        walk_root(
            root,
            filter,
            cancel,
            &mut state,
            &mut recorder,
            &mut output,
            on_progress,
        );
        output.scanned_roots.push(root.to_path_buf());
        debug!(
            "root {} walked: {} file(s) so far",
            root.display(),
            output.counters.scanned_files
        );
        if output.cancelled {
            break;
        }
    }
    output.audit = recorder.finish();
    let tracker = state.tracker;
    output.counters.visited_directories = tracker.visited;

    if output.cancelled {
        output.warnings.push(
            "scan canceled by caller; results contain partial data".to_string(),
        );
    } else {
        on_progress(WalkProgress {
            fraction: 1.0,
            visited_directories: tracker.visited,
            total_directories: tracker.total,
            scanned_files: output.counters.scanned_files,
            scanned_bytes: output.counters.scanned_bytes,
            current_path: None,
        });
    }

    Ok(output)
}

pub fn run_scan(options: &ScanOptions) -> Result<ScanReport> {
    run_scan_with_callback(options, &mut NullAudit, |_| {})
}

pub fn run_scan_with_events(
    options: &ScanOptions,
    audit: &mut dyn AuditSink,
) -> Result<ScanRunOutput> {
    let mut events = Vec::new();
    let report = run_scan_with_callback(options, audit, |event| events.push(event))?;
    Ok(ScanRunOutput { report, events })
}

/// Full pipeline: resolve roots, walk, classify, derive the report.
pub fn run_scan_with_callback<F>(
    options: &ScanOptions,
    audit: &mut dyn AuditSink,
    on_event: F,
) -> Result<ScanReport>
where
    F: FnMut(ScanProgressEvent),
{
    validate_scan_options(options)?;
    let started = Instant::now();
    let scan_id = options
        .scan_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut events = EventEmitter::new(options.emit_progress_events, scan_id.clone(), on_event);

    let mut warnings = Vec::new();
    let roots = resolve_roots(options, &mut warnings)?;
    let rules = options.rules.compile();
    let filter = PathFilter::new(
        rules.system_roots.clone(),
        options.exclude_system,
        &options.excludes,
        &mut warnings,
    );
    let primary_volume = options
        .primary_volume
        .clone()
        .or_else(detect_primary_volume);
    let mount_points = options
        .mount_points
        .clone()
        .unwrap_or_else(detect_mount_points);

    info!(
        "scan {} starting over {} root(s), exclude_system={}",
        scan_id,
        roots.len(),
        options.exclude_system
    );
    events.emit(ScanPhase::CountingDirectories, &WalkProgress::default());

    let cancel = options.cancel_flag.as_deref();
    let mut last_progress = WalkProgress::default();
    let walk = {
        let mut throttle =
            ProgressThrottle::new(Duration::from_millis(options.progress_interval_ms));
        let mut progress_hook = |progress: WalkProgress| {
            if throttle.is_due(progress.fraction) {
                if options.progress {
                    info!(
                        "scan progress: {:.1}% ({}/{} directories, {} files)",
                        progress.fraction * 100.0,
                        progress.visited_directories,
                        progress.total_directories,
                        progress.scanned_files
                    );
                }
                events.emit(ScanPhase::WalkingFiles, &progress);
            }
            last_progress = progress;
        };
        scan_volumes(&roots, &filter, cancel, &mut progress_hook, audit)?
    };
    warnings.extend(walk.warnings);

    events.emit(ScanPhase::Classifying, &last_progress);
    let files = classify_all(walk.records, &rules);

    events.emit(ScanPhase::Advising, &last_progress);
    let summary = build_report(
        &files,
        &ReportOptions {
            top_files_limit: options.top_files_limit,
            primary_volume: primary_volume.clone(),
            mount_points: mount_points.clone(),
            severity: options.rules.severity_rules(),
        },
    );

    let scan = ScanMetadata {
        roots: roots
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect(),
        exclude_system: options.exclude_system,
        excludes: options.excludes.clone(),
        system_roots: rules.system_roots.entries().to_vec(),
        temp_roots: rules.temp_roots.entries().to_vec(),
        primary_volume: primary_volume.map(|path| path.to_string_lossy().to_string()),
        mount_points: mount_points
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect(),
        top_files_limit: options.top_files_limit,
    };

    let counters = walk.counters;
    let report = ScanReport {
        report_version: REPORT_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        scan_id: scan_id.clone(),
        scan,
        scan_metrics: ScanMetrics {
            elapsed_ms: started.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
            scanned_roots: walk.scanned_roots.len() as u64,
            failed_roots: walk.root_failures.len() as u64,
            total_directories: counters.total_directories,
            visited_directories: counters.visited_directories,
            excluded_directories: counters.excluded_directories,
            scanned_files: counters.scanned_files,
            scanned_bytes: counters.scanned_bytes,
            skipped_entries: counters.skipped_entries,
        },
        root_failures: walk.root_failures,
        audit: walk.audit,
        cancelled: walk.cancelled,
        warnings,
        files,
        summary,
    };

    events.emit(ScanPhase::Done, &last_progress);
    info!(
        "scan {} finished: {} file(s), {} root failure(s), {} ms",
        scan_id,
        report.scan_metrics.scanned_files,
        report.root_failures.len(),
        report.scan_metrics.elapsed_ms
    );

    Ok(report)
}

struct EventEmitter<F> {
    enabled: bool,
    scan_id: String,
    seq: u64,
    on_event: F,
}

impl<F> EventEmitter<F>
where
    F: FnMut(ScanProgressEvent),
{
    fn new(enabled: bool, scan_id: String, on_event: F) -> Self {
        Self {
            enabled,
            scan_id,
            seq: 0,
            on_event,
        }
    }

    fn emit(&mut self, phase: ScanPhase, progress: &WalkProgress) {
        self.seq = self.seq.saturating_add(1);
        if !self.enabled {
            return;
        }
        (self.on_event)(ScanProgressEvent {
            seq: self.seq,
            scan_id: self.scan_id.clone(),
            phase,
            fraction: progress.fraction,
            visited_directories: progress.visited_directories,
            total_directories: progress.total_directories,
            scanned_files: progress.scanned_files,
            scanned_bytes: progress.scanned_bytes,
            current_path: progress.current_path.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
    }
}

/// Rate limit for walk progress: the first update, anything at 1.0, and then
/// at most one per interval.
struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn is_due(&mut self, fraction: f64) -> bool {
        let due = fraction >= 1.0
            || self
                .last
                .map_or(true, |last| last.elapsed() >= self.interval);
        if due {
            self.last = Some(Instant::now());
        }
        due
    }
}

struct WalkState {
    tracker: ProgressTracker,
    visited: VisitedDirectories,
}

/// Directory identities entered during one pass over all roots.
#[derive(Debug, Default)]
struct VisitedDirectories {
    #[cfg(unix)]
    seen: HashSet<(u64, u64)>,
}

impl VisitedDirectories {
    /// False when the same directory was already entered through another path.
    #[cfg(unix)]
    fn first_visit(&mut self, entry: &DirEntry) -> bool {
        use std::os::unix::fs::MetadataExt;

        match entry.metadata() {
            Ok(metadata) => self.seen.insert((metadata.dev(), metadata.ino())),
            Err(_) => true,
        }
    }

    #[cfg(not(unix))]
    fn first_visit(&mut self, _entry: &DirEntry) -> bool {
        true
    }
}

struct ProgressTracker {
    total: u64,
    visited: u64,
}

impl ProgressTracker {
    fn new(total: u64) -> Self {
        Self { total, visited: 0 }
    }

    /// Marks one directory done; `None` while the total is unknown (zero).
    fn complete_directory(&mut self) -> Option<f64> {
        self.visited = self.visited.saturating_add(1);
        if self.total == 0 {
            return None;
        }
        Some((self.visited as f64 / self.total as f64).clamp(0.0, 1.0))
    }
}

fn check_root(root: &Path) -> Result<(), ScanError> {
    let metadata = fs::metadata(root).map_err(|source| ScanError::RootInaccessible {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(ScanError::RootNotDirectory(root.to_path_buf()));
    }
    fs::read_dir(root).map_err(|source| ScanError::RootInaccessible {
        path: root.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn walker(root: &Path) -> WalkDir {
    WalkDir::new(root).follow_links(false)
}

fn keep_entry(entry: &DirEntry, filter: &PathFilter) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    if entry.file_type().is_dir() {
        !filter.is_excluded(entry.path())
    } else {
        !filter.is_file_excluded(entry.path())
    }
}

/// Drops roots equal to or nested under another root. Of two equal roots the
/// first one is kept.
fn collapse_nested_roots<'a>(roots: Vec<&'a Path>, warnings: &mut Vec<String>) -> Vec<&'a Path> {
    let mut kept = Vec::new();
    for (index, root) in roots.iter().enumerate() {
        let own = PrefixSet::new([root]);
        let covering = roots.iter().enumerate().find(|(other_index, other)| {
            let other_set = PrefixSet::new([other]);
            *other_index != index
                && other_set.contains(root)
                && (other_set != own || *other_index < index)
        });
        match covering {
            Some((_, other)) => warnings.push(format!(
                "scan root {} is already covered by {}",
                root.display(),
                other.display()
            )),
            None => kept.push(*root),
        }
    }
    kept
}

/// First pass: directories the second pass will visit, root included.
fn count_directories(root: &Path, filter: &PathFilter, visited: &mut VisitedDirectories) -> u64 {
    walker(root)
        .into_iter()
        .filter_entry(|entry| {
            keep_entry(entry, filter)
                && (!entry.file_type().is_dir() || visited.first_visit(entry))
        })
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_dir())
        .count() as u64
}

fn walk_root(
    root: &Path,
    filter: &PathFilter,
    cancel: Option<&AtomicBool>,
    state: &mut WalkState,
    recorder: &mut AuditRecorder<'_>,
    output: &mut VolumeScan,
    on_progress: &mut dyn FnMut(WalkProgress),
) {
    let WalkState { tracker, visited } = state;
    let mut excluded_directories = 0_u64;
    // Files sort ahead of subdirectories, so a directory is complete as soon as
    // the next directory entry shows up.
    let iter = walker(root)
        .sort_by(|a, b| a.file_type().is_dir().cmp(&b.file_type().is_dir()))
        .into_iter()
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_dir();
            if !keep_entry(entry, filter) {
                if is_dir {
                    excluded_directories += 1;
                }
                return false;
            }
            !is_dir || visited.first_visit(entry)
        });

    let mut open_directory: Option<PathBuf> = None;
    for item in iter {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                debug!("walk error under {}: {}", root.display(), err);
                output.counters.skipped_entries += 1;
                continue;
            }
        };

        if entry.file_type().is_dir() {
            if let Some(done) = open_directory.take() {
                finish_directory(&done, tracker, output, on_progress);
            }
            if is_cancelled(cancel) {
                output.cancelled = true;
                break;
            }
            open_directory = Some(entry.into_path());
            continue;
        }

        match stat_file(&entry) {
            Ok(Some(record)) => {
                recorder.record(&record.path, record.size_bytes);
                output.counters.scanned_files += 1;
                output.counters.scanned_bytes =
                    output.counters.scanned_bytes.saturating_add(record.size_bytes);
                output.records.push(record);
            }
            Ok(None) => {}
            Err(err) => {
                debug!("stat failed for {}: {}", entry.path().display(), err);
                output.counters.skipped_entries += 1;
            }
        }
    }

    if !output.cancelled {
        if let Some(done) = open_directory {
            finish_directory(&done, tracker, output, on_progress);
        }
    }
    output.counters.excluded_directories += excluded_directories;
}

fn finish_directory(
    dir: &Path,
    tracker: &mut ProgressTracker,
    output: &VolumeScan,
    on_progress: &mut dyn FnMut(WalkProgress),
) {
    if let Some(fraction) = tracker.complete_directory() {
        on_progress(WalkProgress {
            fraction,
            visited_directories: tracker.visited,
            total_directories: tracker.total,
            scanned_files: output.counters.scanned_files,
            scanned_bytes: output.counters.scanned_bytes,
            current_path: Some(dir.to_string_lossy().to_string()),
        });
    }
}

/// Symlinks are resolved like a plain stat; anything that is not a regular
/// file afterwards yields `Ok(None)`.
fn stat_file(entry: &DirEntry) -> io::Result<Option<FileRecord>> {
    let metadata = if entry.file_type().is_symlink() {
        fs::metadata(entry.path())?
    } else {
        entry.metadata().map_err(io::Error::from)?
    };
    if !metadata.is_file() {
        return Ok(None);
    }

    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
    Ok(Some(FileRecord::new(
        entry.path().to_path_buf(),
        metadata.len(),
        modified,
    )))
}

fn resolve_roots(options: &ScanOptions, warnings: &mut Vec<String>) -> Result<Vec<PathBuf>> {
    let auto = options.paths.is_empty();
    let raw_roots = if auto {
        detect_volumes()
            .into_iter()
            .map(|volume| PathBuf::from(volume.mount_point))
            .collect::<Vec<_>>()
    } else {
        options.paths.clone()
    };

    let current_dir = env::current_dir().ok();
    let mut roots = Vec::new();
    let mut seen = HashSet::new();
    for root in raw_roots {
        let root = match (&current_dir, root.is_relative()) {
            (Some(base), true) => base.join(root),
            _ => root,
        };
        let key = root.to_string_lossy().to_lowercase();
        if !seen.insert(key) {
            continue;
        }
        if auto && should_skip_auto_root(&root) {
            warnings.push(format!(
                "auto-root skipped by pseudo/system mount filter: {}",
                root.display()
            ));
            continue;
        }
        roots.push(root);
    }

    if roots.is_empty() {
        return Err(anyhow!(
            "no scan roots were resolved. Provide --paths or ensure volumes are mounted."
        ));
    }
    Ok(roots)
}

fn validate_scan_options(options: &ScanOptions) -> Result<()> {
    if options.progress_interval_ms == 0 {
        return Err(anyhow!("progress_interval_ms must be greater than zero"));
    }
    if options
        .paths
        .iter()
        .any(|path| path.as_os_str().is_empty())
    {
        return Err(anyhow!("scan paths must not be empty strings"));
    }
    Ok(())
}

fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::{
        collapse_nested_roots, validate_scan_options, ProgressThrottle, ProgressTracker,
        ScanOptions,
    };

    #[test]
    fn progress_is_suppressed_without_directories() {
        let mut tracker = ProgressTracker::new(0);
        assert_eq!(tracker.complete_directory(), None);
        assert_eq!(tracker.visited, 1);
    }

    #[test]
    fn progress_clamps_when_more_directories_appear() {
        let mut tracker = ProgressTracker::new(2);
        assert_eq!(tracker.complete_directory(), Some(0.5));
        assert_eq!(tracker.complete_directory(), Some(1.0));
        assert_eq!(tracker.complete_directory(), Some(1.0));
    }

    #[test]
    fn nested_and_repeated_roots_collapse_to_the_outermost() {
        let mut warnings = Vec::new();
        let roots = collapse_nested_roots(
            vec![
                Path::new("/data/photos"),
                Path::new("/data"),
                Path::new("/media/usb"),
                Path::new("/data/"),
                Path::new("/database"),
            ],
            &mut warnings,
        );
        assert_eq!(
            roots,
            vec![Path::new("/data"), Path::new("/media/usb"), Path::new("/database")]
        );
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn throttle_lets_first_and_final_updates_through() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(3600));
        assert!(throttle.is_due(0.1));
        assert!(!throttle.is_due(0.2));
        assert!(!throttle.is_due(0.9));
        assert!(throttle.is_due(1.0));
    }

    #[test]
    fn rejects_zero_progress_interval() {
        let options = ScanOptions {
            paths: vec![PathBuf::from("/data")],
            progress_interval_ms: 0,
            ..ScanOptions::default()
        };
        assert!(validate_scan_options(&options).is_err());
    }

    #[test]
    fn rejects_empty_path_strings() {
        let options = ScanOptions {
            paths: vec![PathBuf::new()],
            ..ScanOptions::default()
        };
        assert!(validate_scan_options(&options).is_err());
    }
}
