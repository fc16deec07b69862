use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::advise::SeverityRules;

const TEMP_ENV_VARS: &[&str] = &["TEMP", "TMP", "TMPDIR"];

#[cfg(windows)]
const DEFAULT_SYSTEM_ROOTS: &[&str] = &[
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
];

#[cfg(not(windows))]
const DEFAULT_SYSTEM_ROOTS: &[&str] = &[
    "/bin", "/boot", "/dev", "/etc", "/lib", "/proc", "/sbin", "/sys", "/usr", "/System",
];

const DEFAULT_JUNK_EXTENSIONS: &[&str] = &[".tmp", ".log", ".bak"];

const DEFAULT_HIGH_SEVERITY_EXTENSIONS: &[&str] = &[".tmp"];

const DEFAULT_MEDIUM_SEVERITY_EXTENSIONS: &[&str] = &[".log", ".bak"];

const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &[
    ".mp4", ".mp3", ".avi", ".mov", ".mkv", ".zip", ".rar", ".7z", ".tar", ".gz",
];

const DEFAULT_USER_EXTENSIONS: &[&str] = &[
    ".docx", ".psd", ".jpg", ".png", ".pdf", ".xlsx", ".pptx", ".txt",
];

/// Classification tables. Loaded from JSON or built from platform defaults;
/// fields missing from a file fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuleSet {
    pub system_roots: Vec<PathBuf>,
    #[serde(default = "temp_roots_from_env")]
    pub temp_roots: Vec<PathBuf>,
    pub junk_extensions: Vec<String>,
    /// Junk extensions that can score High once past the size threshold.
    pub high_severity_extensions: Vec<String>,
    /// Junk extensions that can score Medium once past the size threshold.
    pub medium_severity_extensions: Vec<String>,
    pub media_extensions: Vec<String>,
    pub user_extensions: Vec<String>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::platform_defaults()
    }
}

impl RuleSet {
    /// Fixed tables only; no temp roots, no environment access.
    pub fn platform_defaults() -> Self {
        Self {
            system_roots: DEFAULT_SYSTEM_ROOTS.iter().map(PathBuf::from).collect(),
            temp_roots: Vec::new(),
            junk_extensions: to_strings(DEFAULT_JUNK_EXTENSIONS),
            high_severity_extensions: to_strings(DEFAULT_HIGH_SEVERITY_EXTENSIONS),
            medium_severity_extensions: to_strings(DEFAULT_MEDIUM_SEVERITY_EXTENSIONS),
            media_extensions: to_strings(DEFAULT_MEDIA_EXTENSIONS),
            user_extensions: to_strings(DEFAULT_USER_EXTENSIONS),
        }
    }

    /// Platform defaults plus temp roots resolved from the environment.
    pub fn detect() -> Self {
        Self {
            temp_roots: temp_roots_from_env(),
            ..Self::platform_defaults()
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read rules file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse rules file {}", path.display()))
    }

    pub fn compile(&self) -> CompiledRules {
        CompiledRules {
            system_roots: PrefixSet::new(&self.system_roots),
            temp_roots: PrefixSet::new(&self.temp_roots),
            junk_extensions: extension_set(&self.junk_extensions),
            media_extensions: extension_set(&self.media_extensions),
            user_extensions: extension_set(&self.user_extensions),
        }
    }

    pub fn severity_rules(&self) -> SeverityRules {
        SeverityRules::new(
            &self.high_severity_extensions,
            &self.medium_severity_extensions,
        )
    }
}

/// Lookup-ready form of a [`RuleSet`].
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    pub system_roots: PrefixSet,
    pub temp_roots: PrefixSet,
    pub junk_extensions: HashSet<String>,
    pub media_extensions: HashSet<String>,
    pub user_extensions: HashSet<String>,
}

pub fn temp_roots_from_env() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for key in TEMP_ENV_VARS {
        let Some(value) = env::var_os(key) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        let path = PathBuf::from(value);
        if !roots.contains(&path) {
            roots.push(path);
        }
    }
    roots
}

/// Set of directory prefixes matched component-wise: a path matches when it is
/// equal to or nested under an entry. Empty entries are dropped and never match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixSet {
    prefixes: Vec<String>,
}

impl PrefixSet {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut prefixes = Vec::new();
        for path in paths {
            let normalized = normalize_path(path.as_ref());
            if normalized.is_empty() || prefixes.contains(&normalized) {
                continue;
            }
            prefixes.push(normalized);
        }
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        if self.prefixes.is_empty() {
            return false;
        }
        let candidate = normalize_path(path);
        self.prefixes
            .iter()
            .any(|prefix| is_nested_under(&candidate, prefix))
    }

    pub fn entries(&self) -> &[String] {
        &self.prefixes
    }
}

fn is_nested_under(candidate: &str, prefix: &str) -> bool {
    if !candidate.starts_with(prefix) {
        return false;
    }
    let rest = &candidate[prefix.len()..];
    rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/')
}

pub(crate) fn normalize_path(path: &Path) -> String {
    let mut normalized = path.to_string_lossy().trim().replace('\\', "/");
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    if cfg!(windows) {
        normalized = normalized.to_lowercase();
    }
    normalized
}

pub(crate) fn extension_set(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|value| value.trim().trim_start_matches('.').to_lowercase())
        .filter(|value| !value.is_empty())
        .map(|value| format!(".{value}"))
        .collect()
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{extension_set, PrefixSet, RuleSet};
    use crate::model::{Severity, MIB};

    #[test]
    fn prefix_set_matches_equal_and_nested_paths_only() {
        let set = PrefixSet::new(["/data/Windows"]);
        assert!(set.contains(Path::new("/data/Windows")));
        assert!(set.contains(Path::new("/data/Windows/System32/x.dll")));
        assert!(!set.contains(Path::new("/data/WindowsApps/x.dll")));
        assert!(!set.contains(Path::new("/data")));
    }

    #[test]
    fn empty_prefixes_never_match() {
        let set = PrefixSet::new(["", "   "]);
        assert!(set.is_empty());
        assert!(!set.contains(Path::new("/anything/at/all")));
        assert!(!set.contains(Path::new("")));
    }

    #[test]
    fn filesystem_root_prefix_covers_everything() {
        let set = PrefixSet::new(["/"]);
        assert!(set.contains(Path::new("/home/user/a.txt")));
    }

    #[test]
    fn backslashes_and_trailing_separators_are_normalized() {
        let set = PrefixSet::new(["C:\\Program Files\\"]);
        assert!(set.contains(Path::new("C:/Program Files/app/bin.exe")));
        assert!(!set.contains(Path::new("C:/Program Files (x86)/app/bin.exe")));
    }

    #[test]
    fn extension_tables_accept_any_spelling() {
        let set = extension_set(&[".MP4".to_string(), "mkv".to_string(), "".to_string()]);
        assert!(set.contains(".mp4"));
        assert!(set.contains(".mkv"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn partial_rules_file_keeps_default_tables() {
        let rules: RuleSet =
            serde_json::from_str(r#"{"junk_extensions": [".tmp", ".old"], "temp_roots": []}"#)
                .expect("rules parse");
        assert_eq!(rules.junk_extensions, vec![".tmp", ".old"]);
        assert_eq!(
            rules.media_extensions,
            RuleSet::platform_defaults().media_extensions
        );
        assert!(rules.temp_roots.is_empty());
    }

    #[test]
    fn platform_defaults_have_no_temp_roots() {
        let rules = RuleSet::platform_defaults();
        assert!(rules.temp_roots.is_empty());
        assert!(rules.compile().temp_roots.is_empty());
    }

    #[test]
    fn rules_file_can_extend_severity_tables() {
        let rules: RuleSet = serde_json::from_str(
            r#"{"junk_extensions": [".tmp", ".dmp"], "high_severity_extensions": ["dmp"], "temp_roots": []}"#,
        )
        .expect("rules parse");
        let severity = rules.severity_rules();
        assert_eq!(severity.severity_for(".dmp", 60 * MIB), Severity::High);
        assert_eq!(severity.severity_for(".tmp", 60 * MIB), Severity::Low);
        assert_eq!(severity.severity_for(".log", 11 * MIB), Severity::Medium);
    }
}
