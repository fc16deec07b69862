use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const REPORT_VERSION: &str = "1.0.0";

pub const MIB: u64 = 1024 * 1024;

/// Metadata for one file that was successfully stat-ed during a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Lower-cased suffix including the leading dot, or empty when the name has none.
    pub extension: String,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn new(path: PathBuf, size_bytes: u64, modified: Option<DateTime<Utc>>) -> Self {
        let extension = extension_of(&path);
        Self {
            path,
            size_bytes,
            extension,
            modified,
        }
    }
}

pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default()
}

/// A record after classification. `severity` is only set on junk-list copies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedFile {
    #[serde(flatten)]
    pub record: FileRecord,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl ClassifiedFile {
    pub fn path(&self) -> &Path {
        &self.record.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.record.size_bytes
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SystemCritical,
    TemporaryJunk,
    LargeMediaArchive,
    UserGenerated,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::SystemCritical,
        Category::TemporaryJunk,
        Category::LargeMediaArchive,
        Category::UserGenerated,
        Category::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::SystemCritical => "System-critical",
            Category::TemporaryJunk => "Temporary/Junk",
            Category::LargeMediaArchive => "Large Media/Archive",
            Category::UserGenerated => "User-generated",
            Category::Other => "Other",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Category::SystemCritical => "🛑",
            Category::TemporaryJunk => "🗑️",
            Category::LargeMediaArchive => "🗄️",
            Category::UserGenerated => "📄",
            Category::Other => "❓",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootFailure {
    pub root: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AuditStatus {
    #[serde(default)]
    pub entries_written: u64,
    #[serde(default)]
    pub failures: u64,
    #[serde(default)]
    pub first_error: Option<String>,
}

impl AuditStatus {
    pub fn is_complete(&self) -> bool {
        self.failures == 0
    }
}

/// Saved output of one scan invocation: the classified records plus everything
/// derived from them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    pub report_version: String,
    pub generated_at: String,
    #[serde(default = "default_scan_id")]
    pub scan_id: String,
    pub scan: ScanMetadata,
    #[serde(default)]
    pub scan_metrics: ScanMetrics,
    #[serde(default)]
    pub root_failures: Vec<RootFailure>,
    #[serde(default)]
    pub audit: AuditStatus,
    #[serde(default)]
    pub cancelled: bool,
    pub warnings: Vec<String>,
    pub files: Vec<ClassifiedFile>,
    pub summary: Report,
}

fn default_scan_id() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanMetadata {
    pub roots: Vec<String>,
    pub exclude_system: bool,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub system_roots: Vec<String>,
    #[serde(default)]
    pub temp_roots: Vec<String>,
    #[serde(default)]
    pub primary_volume: Option<String>,
    /// Volume mount points known at scan time.
    #[serde(default)]
    pub mount_points: Vec<String>,
    #[serde(default = "default_top_files_limit")]
    pub top_files_limit: usize,
}

fn default_top_files_limit() -> usize {
    crate::report::DEFAULT_TOP_FILES
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScanMetrics {
    #[serde(default)]
    pub elapsed_ms: u64,
    #[serde(default)]
    pub scanned_roots: u64,
    #[serde(default)]
    pub failed_roots: u64,
    #[serde(default)]
    pub total_directories: u64,
    #[serde(default)]
    pub visited_directories: u64,
    #[serde(default)]
    pub excluded_directories: u64,
    #[serde(default)]
    pub scanned_files: u64,
    #[serde(default)]
    pub scanned_bytes: u64,
    #[serde(default)]
    pub skipped_entries: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanProgressEvent {
    pub seq: u64,
    pub scan_id: String,
    pub phase: ScanPhase,
    /// Completed share of the directory walk, always within `[0.0, 1.0]`.
    pub fraction: f64,
    pub visited_directories: u64,
    pub total_directories: u64,
    pub scanned_files: u64,
    pub scanned_bytes: u64,
    pub current_path: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    CountingDirectories,
    WalkingFiles,
    Classifying,
    Advising,
    Done,
}

/// Read-only aggregate view over a classified record set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Report {
    pub total_files: u64,
    pub total_bytes: u64,
    pub category_counts: Vec<CategoryCount>,
    pub top_files: Vec<ClassifiedFile>,
    pub move_suggestions: MoveSuggestions,
    pub junk: JunkList,
}

impl Report {
    pub fn count_for(&self, category: Category) -> u64 {
        self.category_counts
            .iter()
            .find(|item| item.category == category)
            .map(|item| item.files)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: Category,
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MoveSuggestions {
    pub primary_volume: Option<String>,
    pub files: Vec<ClassifiedFile>,
    /// Estimated reclaimable space on the primary volume.
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct JunkList {
    pub files: Vec<ClassifiedFile>,
    pub total_bytes: u64,
    pub by_severity: Vec<SeverityCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityCount {
    pub severity: Severity,
    pub files: u64,
    pub bytes: u64,
}

/// Paths handed to an external delete/archive/upload collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ActionBatch {
    pub paths: Vec<PathBuf>,
    pub total_bytes: u64,
    /// Selected paths that are not part of the scanned record set.
    #[serde(default)]
    pub unknown_paths: Vec<PathBuf>,
}
