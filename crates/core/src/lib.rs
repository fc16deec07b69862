pub mod advise;
pub mod audit;
pub mod classify;
pub mod doctor;
pub mod error;
pub mod filter;
pub mod model;
pub mod report;
pub mod rules;
pub mod scan;
pub mod volume;

pub use advise::{
    is_move_candidate, junk_severity, plan_action, score_junk, select_move_suggestions,
    SeverityRules, HIGH_SEVERITY_MIN_BYTES, MEDIUM_SEVERITY_MIN_BYTES, MOVE_THRESHOLD_BYTES,
};
pub use audit::{
    open_audit_log, AuditEntry, AuditSink, NullAudit, TsvAuditLog, UnavailableAudit,
    DEFAULT_AUDIT_LOG,
};
pub use classify::{classify, classify_all, classify_record};
pub use doctor::{collect_doctor_info, collect_doctor_info_with, DoctorInfo};
pub use error::ScanError;
pub use filter::{is_excluded, PathFilter};
pub use model::{
    extension_of, ActionBatch, AuditStatus, Category, CategoryCount, ClassifiedFile, FileRecord,
    JunkList, MoveSuggestions, Report, RootFailure, ScanMetadata, ScanMetrics, ScanPhase,
    ScanProgressEvent, ScanReport, Severity, SeverityCount, MIB, REPORT_VERSION,
};
pub use report::{build_report, category_counts, top_files, ReportOptions, DEFAULT_TOP_FILES};
pub use rules::{temp_roots_from_env, CompiledRules, PrefixSet, RuleSet};
pub use scan::{
    run_scan, run_scan_with_callback, run_scan_with_events, scan_volumes, ScanCounters,
    ScanOptions, ScanRunOutput, VolumeScan, WalkProgress,
};
pub use volume::{
    detect_mount_points, detect_primary_volume, detect_volumes, should_skip_auto_root,
    PrimaryVolume, VolumeInfo,
};
