use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;

use anyhow::{anyhow, Context, Result};
use bytebouncer_core::{
    collect_doctor_info, open_audit_log, plan_action, run_scan_with_callback, ActionBatch,
    AuditSink, DoctorInfo, NullAudit, RuleSet, ScanOptions, ScanPhase, ScanProgressEvent,
    ScanReport, DEFAULT_TOP_FILES,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub scan_id: Option<String>,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Truncated and rewritten by each scan; no audit log when unset. A log
    /// that cannot be opened is reported in the report's audit status.
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    #[serde(default = "default_exclude_system")]
    pub exclude_system: bool,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub rules: Option<RuleSet>,
    #[serde(default)]
    pub primary_volume: Option<PathBuf>,
    #[serde(default = "default_top_files_limit")]
    pub top_files_limit: usize,
    #[serde(default)]
    pub progress: bool,
    #[serde(default = "default_emit_progress_events")]
    pub emit_progress_events: bool,
    #[serde(default = "default_progress_interval")]
    pub progress_interval_ms: u64,
}

fn default_exclude_system() -> bool {
    true
}

fn default_top_files_limit() -> usize {
    DEFAULT_TOP_FILES
}

fn default_emit_progress_events() -> bool {
    true
}

fn default_progress_interval() -> u64 {
    250
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            scan_id: None,
            paths: Vec::new(),
            output: None,
            audit_log: None,
            exclude_system: default_exclude_system(),
            excludes: Vec::new(),
            rules: None,
            primary_volume: None,
            top_files_limit: default_top_files_limit(),
            progress: false,
            emit_progress_events: default_emit_progress_events(),
            progress_interval_ms: default_progress_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanSessionStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl ScanSessionStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, ScanSessionStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSessionSnapshot {
    pub scan_id: String,
    pub status: ScanSessionStatus,
    pub report_path: Option<PathBuf>,
    pub error: Option<String>,
    /// Events emitted so far, including walk updates no longer retained.
    pub total_events: u64,
    pub latest_fraction: f64,
    pub has_report: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelScanResponse {
    pub scan_id: String,
    pub status: ScanSessionStatus,
}

#[derive(Debug, Clone)]
struct ScanSession {
    status: ScanSessionStatus,
    report_path: Option<PathBuf>,
    report: Option<ScanReport>,
    error: Option<String>,
    /// Phase changes plus only the most recent walk update.
    events: Vec<ScanProgressEvent>,
    total_events: u64,
    cancel_flag: Arc<AtomicBool>,
}

impl ScanSession {
    fn push_event(&mut self, event: ScanProgressEvent) {
        self.total_events += 1;
        let replaces_walk_update = event.phase == ScanPhase::WalkingFiles
            && self
                .events
                .last()
                .is_some_and(|last| last.phase == ScanPhase::WalkingFiles);
        if replaces_walk_update {
            self.events.pop();
        }
        self.events.push(event);
    }
}

static SESSIONS: Lazy<Mutex<HashMap<String, ScanSession>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Starts a scan on a background thread and returns its session id.
pub fn start_scan(request: ScanRequest) -> Result<String> {
    let scan_id = request
        .scan_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let cancel_flag = Arc::new(AtomicBool::new(false));

    {
        let mut sessions = lock_sessions()?;
        if sessions
            .get(&scan_id)
            .is_some_and(|session| !session.status.is_finished())
        {
            return Err(anyhow!("scan session already running: {scan_id}"));
        }
        sessions.insert(
            scan_id.clone(),
            ScanSession {
                status: ScanSessionStatus::Running,
                report_path: request.output.clone(),
                report: None,
                error: None,
                events: Vec::new(),
                total_events: 0,
                cancel_flag: Arc::clone(&cancel_flag),
            },
        );
    }

    let mut audit: Box<dyn AuditSink + Send> = match &request.audit_log {
        Some(path) => open_audit_log(path),
        None => Box::new(NullAudit),
    };

    let thread_scan_id = scan_id.clone();
    thread::spawn(move || {
        let options = ScanOptions {
            paths: request.paths,
            exclude_system: request.exclude_system,
            excludes: request.excludes,
            rules: request.rules.unwrap_or_else(RuleSet::detect),
            primary_volume: request.primary_volume,
            mount_points: None,
            top_files_limit: request.top_files_limit,
            progress: request.progress,
            scan_id: Some(thread_scan_id.clone()),
            emit_progress_events: request.emit_progress_events,
            progress_interval_ms: request.progress_interval_ms,
            cancel_flag: Some(Arc::clone(&cancel_flag)),
        };

        let run_result = run_scan_with_callback(&options, audit.as_mut(), |event| {
            if let Ok(mut sessions) = lock_sessions() {
                if let Some(session) = sessions.get_mut(&thread_scan_id) {
                    session.push_event(event);
                }
            }
        });
        drop(audit);

        let outcome = run_result.and_then(|report| {
            if let Some(path) = &request.output {
                write_report(&report, path)?;
            }
            Ok(report)
        });

        let Ok(mut sessions) = lock_sessions() else {
            return;
        };
        let Some(session) = sessions.get_mut(&thread_scan_id) else {
            return;
        };
        match outcome {
            Ok(report) => {
                session.status = if report.cancelled || cancel_flag.load(Ordering::Relaxed) {
                    ScanSessionStatus::Cancelled
                } else {
                    ScanSessionStatus::Completed
                };
                session.report = Some(report);
                session.error = None;
            }
            Err(err) => {
                session.status = ScanSessionStatus::Failed;
                session.error = Some(format!("{err:#}"));
            }
        }
    });

    Ok(scan_id)
}

pub fn poll_scan_events(scan_id: &str, from_seq: u64) -> Result<Vec<ScanProgressEvent>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(scan_id)
        .ok_or_else(|| anyhow!("scan session not found: {scan_id}"))?;

    Ok(session
        .events
        .iter()
        .filter(|event| event.seq > from_seq)
        .cloned()
        .collect())
}

/// Requests cancellation. The walk stops at the next directory boundary and the
/// session keeps whatever partial report the scan returns.
pub fn cancel_scan(scan_id: &str) -> Result<CancelScanResponse> {
    let mut sessions = lock_sessions()?;
    let session = sessions
        .get_mut(scan_id)
        .ok_or_else(|| anyhow!("scan session not found: {scan_id}"))?;

    session.cancel_flag.store(true, Ordering::Relaxed);
    if session.status == ScanSessionStatus::Running {
        session.status = ScanSessionStatus::Cancelled;
    }

    Ok(CancelScanResponse {
        scan_id: scan_id.to_string(),
        status: session.status.clone(),
    })
}

pub fn get_scan_session(scan_id: &str) -> Result<ScanSessionSnapshot> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(scan_id)
        .ok_or_else(|| anyhow!("scan session not found: {scan_id}"))?;

    Ok(ScanSessionSnapshot {
        scan_id: scan_id.to_string(),
        status: session.status.clone(),
        report_path: session.report_path.clone(),
        error: session.error.clone(),
        total_events: session.total_events,
        latest_fraction: session
            .events
            .last()
            .map(|event| event.fraction)
            .unwrap_or(0.0),
        has_report: session.report.is_some(),
    })
}

/// The finished report, or `None` while the session is still running.
pub fn get_scan_report(scan_id: &str) -> Result<Option<ScanReport>> {
    let sessions = lock_sessions()?;
    let session = sessions
        .get(scan_id)
        .ok_or_else(|| anyhow!("scan session not found: {scan_id}"))?;
    Ok(session.report.clone())
}

/// Validates a selection against a finished session's files before it is
/// handed to whatever performs the delete, archive or upload.
pub fn plan_session_action(scan_id: &str, selected: &[PathBuf]) -> Result<ActionBatch> {
    let report = get_scan_report(scan_id)?
        .ok_or_else(|| anyhow!("scan session has no report yet: {scan_id}"))?;
    Ok(plan_action(selected, &report.files))
}

pub fn load_report(path: impl AsRef<Path>) -> Result<ScanReport> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read report {}", path.display()))?;
    let report: ScanReport = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(report)
}

pub fn doctor() -> DoctorInfo {
    collect_doctor_info()
}

fn write_report(report: &ScanReport, path: &Path) -> Result<()> {
    let payload =
        serde_json::to_string_pretty(report).context("failed to serialize report payload")?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write report to {}", path.display()))
}

fn lock_sessions() -> Result<std::sync::MutexGuard<'static, HashMap<String, ScanSession>>> {
    SESSIONS
        .lock()
        .map_err(|_| anyhow!("scan session registry lock poisoned"))
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::path::Path;
    use std::time::{Duration, Instant};

    use bytebouncer_core::{Category, RuleSet, ScanPhase, MIB};

    use super::{
        cancel_scan, doctor, get_scan_report, get_scan_session, load_report,
        plan_session_action, poll_scan_events, start_scan, ScanRequest, ScanSessionSnapshot,
        ScanSessionStatus,
    };

    fn sized_file(path: &Path, size_bytes: u64) {
        File::create(path)
            .and_then(|file| file.set_len(size_bytes))
            .expect("sized file");
    }

    fn isolated_rules() -> RuleSet {
        RuleSet {
            temp_roots: Vec::new(),
            ..RuleSet::platform_defaults()
        }
    }

    fn wait_for_finish(scan_id: &str) -> ScanSessionSnapshot {
        let started = Instant::now();
        loop {
            let snapshot = get_scan_session(scan_id).expect("session exists");
            if snapshot.status.is_finished() && (snapshot.has_report || snapshot.error.is_some())
            {
                return snapshot;
            }
            assert!(started.elapsed() < Duration::from_secs(30));
            std::thread::sleep(Duration::from_millis(25));
        }
    }

    #[test]
    fn start_scan_creates_session_and_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        sized_file(&dir.path().join("a.tmp"), 60 * MIB);
        sized_file(&dir.path().join("notes.txt"), 12);
        let out_dir = tempfile::tempdir().expect("tempdir");
        let output = out_dir.path().join("report.json");
        let audit_log = out_dir.path().join("scan_log.txt");

        let scan_id = start_scan(ScanRequest {
            paths: vec![dir.path().to_path_buf()],
            output: Some(output.clone()),
            audit_log: Some(audit_log.clone()),
            rules: Some(isolated_rules()),
            primary_volume: Some(dir.path().to_path_buf()),
            ..ScanRequest::default()
        })
        .expect("scan starts");

        let snapshot = wait_for_finish(&scan_id);
        assert_eq!(snapshot.status, ScanSessionStatus::Completed);
        assert!(snapshot.total_events >= 1);
        assert_eq!(snapshot.latest_fraction, 1.0);

        let events = poll_scan_events(&scan_id, 0).expect("events");
        assert!(events.iter().any(|event| event.phase == ScanPhase::Done));
        let later = poll_scan_events(&scan_id, events[0].seq).expect("events");
        assert_eq!(later.len(), events.len() - 1);

        let report = get_scan_report(&scan_id)
            .expect("session exists")
            .expect("report ready");
        assert_eq!(report.scan_id, scan_id);
        assert_eq!(report.summary.count_for(Category::TemporaryJunk), 1);
        assert_eq!(report.summary.junk.files.len(), 1);

        let saved = load_report(&output).expect("saved report");
        assert_eq!(saved.files.len(), report.files.len());
        let log = fs::read_to_string(&audit_log).expect("audit log");
        assert_eq!(log.lines().count(), 2);
    }

    #[test]
    fn action_plans_are_checked_against_session_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        sized_file(&dir.path().join("old.bak"), 100);
        let scan_id = start_scan(ScanRequest {
            paths: vec![dir.path().to_path_buf()],
            rules: Some(isolated_rules()),
            ..ScanRequest::default()
        })
        .expect("scan starts");
        wait_for_finish(&scan_id);

        let batch = plan_session_action(
            &scan_id,
            &[dir.path().join("old.bak"), dir.path().join("missing.bak")],
        )
        .expect("plan");
        assert_eq!(batch.paths, vec![dir.path().join("old.bak")]);
        assert_eq!(batch.total_bytes, 100);
        assert_eq!(batch.unknown_paths, vec![dir.path().join("missing.bak")]);
    }

    #[test]
    fn cancel_marks_session_cancelled() {
        let dir = tempfile::tempdir().expect("tempdir");
        for index in 0..50 {
            let nested = dir.path().join(format!("d{index}"));
            fs::create_dir_all(&nested).expect("dir");
            sized_file(&nested.join("f.txt"), 1);
        }
        let scan_id = start_scan(ScanRequest {
            paths: vec![dir.path().to_path_buf()],
            rules: Some(isolated_rules()),
            ..ScanRequest::default()
        })
        .expect("scan starts");

        let response = cancel_scan(&scan_id).expect("cancel response");
        assert_eq!(response.scan_id, scan_id);
        let snapshot = wait_for_finish(&scan_id);
        assert!(matches!(
            snapshot.status,
            ScanSessionStatus::Cancelled | ScanSessionStatus::Completed
        ));
        if response.status == ScanSessionStatus::Cancelled {
            assert_eq!(snapshot.status, ScanSessionStatus::Cancelled);
        }
    }

    #[test]
    fn unknown_sessions_and_bad_roots_are_errors() {
        assert!(get_scan_session("no-such-scan").is_err());
        assert!(cancel_scan("no-such-scan").is_err());

        let scan_id = start_scan(ScanRequest {
            paths: vec!["".into()],
            rules: Some(isolated_rules()),
            ..ScanRequest::default()
        })
        .expect("scan starts");
        let snapshot = wait_for_finish(&scan_id);
        assert_eq!(snapshot.status, ScanSessionStatus::Failed);
        assert!(snapshot.error.is_some());
    }

    #[test]
    fn sessions_keep_only_the_latest_walk_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        for index in 0..300 {
            let nested = dir.path().join(format!("d{index:03}"));
            fs::create_dir_all(&nested).expect("dir");
            sized_file(&nested.join("f.txt"), 1);
        }
        let scan_id = start_scan(ScanRequest {
            paths: vec![dir.path().to_path_buf()],
            rules: Some(isolated_rules()),
            progress_interval_ms: 1,
            ..ScanRequest::default()
        })
        .expect("scan starts");
        let snapshot = wait_for_finish(&scan_id);

        let events = poll_scan_events(&scan_id, 0).expect("events");
        let walking = events
            .iter()
            .filter(|event| event.phase == ScanPhase::WalkingFiles)
            .count();
        assert_eq!(walking, 1);
        assert_eq!(events.len(), 5);
        assert!(snapshot.total_events >= events.len() as u64);
        assert!(events.windows(2).all(|pair| pair[0].seq < pair[1].seq));
    }

    #[test]
    fn unopenable_audit_log_still_completes_the_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        sized_file(&dir.path().join("notes.txt"), 12);
        let scan_id = start_scan(ScanRequest {
            paths: vec![dir.path().to_path_buf()],
            audit_log: Some(dir.path().join("missing").join("scan_log.txt")),
            rules: Some(isolated_rules()),
            ..ScanRequest::default()
        })
        .expect("scan starts");

        let snapshot = wait_for_finish(&scan_id);
        assert_eq!(snapshot.status, ScanSessionStatus::Completed);
        let report = get_scan_report(&scan_id)
            .expect("session exists")
            .expect("report ready");
        assert_eq!(report.files.len(), 1);
        assert!(!report.audit.is_complete());
        assert!(report
            .audit
            .first_error
            .as_deref()
            .is_some_and(|error| error.contains("could not be opened")));
    }

    #[test]
    fn doctor_returns_runtime_snapshot() {
        let info = doctor();
        assert!(!info.system_roots.is_empty());
        assert!(!info.notes.is_empty());
    }
}
