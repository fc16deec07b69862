use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::model::{
    ActionBatch, Category, ClassifiedFile, JunkList, MoveSuggestions, Severity, SeverityCount,
    MIB,
};
use crate::rules::{extension_set, RuleSet};
use crate::volume::PrimaryVolume;

/// Files strictly larger than this on the primary volume are suggested for relocation.
pub const MOVE_THRESHOLD_BYTES: u64 = 50 * MIB;

pub const HIGH_SEVERITY_MIN_BYTES: u64 = 50 * MIB;

pub const MEDIUM_SEVERITY_MIN_BYTES: u64 = 10 * MIB;

/// Extension tables behind junk severity; sizes use the thresholds above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeverityRules {
    high_extensions: HashSet<String>,
    medium_extensions: HashSet<String>,
}

impl Default for SeverityRules {
    fn default() -> Self {
        RuleSet::platform_defaults().severity_rules()
    }
}

impl SeverityRules {
    pub fn new(high_extensions: &[String], medium_extensions: &[String]) -> Self {
        Self {
            high_extensions: extension_set(high_extensions),
            medium_extensions: extension_set(medium_extensions),
        }
    }

    /// Severity by extension and size; thresholds are exclusive.
    pub fn severity_for(&self, extension: &str, size_bytes: u64) -> Severity {
        let extension = extension.to_lowercase();
        if self.high_extensions.contains(&extension) && size_bytes > HIGH_SEVERITY_MIN_BYTES {
            return Severity::High;
        }
        if self.medium_extensions.contains(&extension) && size_bytes > MEDIUM_SEVERITY_MIN_BYTES
        {
            return Severity::Medium;
        }
        Severity::Low
    }
}

pub fn is_move_candidate(file: &ClassifiedFile, primary_volume: &PrimaryVolume) -> bool {
    matches!(
        file.category,
        Category::UserGenerated | Category::LargeMediaArchive
    ) && file.size_bytes() > MOVE_THRESHOLD_BYTES
        && primary_volume.contains(file.path())
}

/// Advisory only: nothing is moved. Without a primary volume nothing qualifies.
/// `mount_points` lists every known volume so files on mounts nested under the
/// primary one are left out.
pub fn select_move_suggestions(
    files: &[ClassifiedFile],
    primary_volume: Option<&Path>,
    mount_points: &[PathBuf],
) -> MoveSuggestions {
    let Some(primary_volume) = primary_volume else {
        return MoveSuggestions::default();
    };
    let primary = PrimaryVolume::new(primary_volume, mount_points);

    let mut selected = files
        .iter()
        .filter(|file| is_move_candidate(file, &primary))
        .cloned()
        .collect::<Vec<_>>();
    selected.sort_by(|a, b| {
        b.size_bytes()
            .cmp(&a.size_bytes())
            .then_with(|| a.path().cmp(b.path()))
    });
    let total_bytes = selected.iter().map(ClassifiedFile::size_bytes).sum();

    MoveSuggestions {
        primary_volume: Some(primary_volume.to_string_lossy().to_string()),
        files: selected,
        total_bytes,
    }
}

/// `None` for anything that is not Temporary/Junk.
pub fn junk_severity(file: &ClassifiedFile, rules: &SeverityRules) -> Option<Severity> {
    (file.category == Category::TemporaryJunk)
        .then(|| rules.severity_for(&file.record.extension, file.size_bytes()))
}

/// Builds the ranked junk list from copies of the junk records; `files` is left
/// untouched. Highest severity first, then largest, then by path.
pub fn score_junk(files: &[ClassifiedFile], rules: &SeverityRules) -> JunkList {
    let mut scored = files
        .iter()
        .filter_map(|file| {
            junk_severity(file, rules).map(|severity| ClassifiedFile {
                severity: Some(severity),
                ..file.clone()
            })
        })
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.size_bytes().cmp(&a.size_bytes()))
            .then_with(|| a.path().cmp(b.path()))
    });

    let mut by_severity: HashMap<Severity, (u64, u64)> = HashMap::new();
    for file in &scored {
        if let Some(severity) = file.severity {
            let entry = by_severity.entry(severity).or_insert((0, 0));
            entry.0 += 1;
            entry.1 = entry.1.saturating_add(file.size_bytes());
        }
    }

    let total_bytes = scored.iter().map(ClassifiedFile::size_bytes).sum();
    JunkList {
        files: scored,
        total_bytes,
        by_severity: [Severity::High, Severity::Medium, Severity::Low]
            .into_iter()
            .map(|severity| {
                let (files, bytes) = by_severity.get(&severity).copied().unwrap_or((0, 0));
                SeverityCount {
                    severity,
                    files,
                    bytes,
                }
            })
            .collect(),
    }
}

/// Turns a caller selection into a de-duplicated path list with size totals for
/// confirmation messaging. Paths not present in `files` are reported separately.
pub fn plan_action(selected: &[PathBuf], files: &[ClassifiedFile]) -> ActionBatch {
    let sizes = files
        .iter()
        .map(|file| (file.path(), file.size_bytes()))
        .collect::<HashMap<_, _>>();

    let mut seen = HashSet::new();
    let mut batch = ActionBatch::default();
    for path in selected {
        if !seen.insert(path.as_path()) {
            continue;
        }
        match sizes.get(path.as_path()) {
            Some(size) => {
                batch.paths.push(path.clone());
                batch.total_bytes = batch.total_bytes.saturating_add(*size);
            }
            None => batch.unknown_paths.push(path.clone()),
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{
        junk_severity, plan_action, score_junk, select_move_suggestions, SeverityRules,
        MOVE_THRESHOLD_BYTES,
    };
    use crate::model::{Category, ClassifiedFile, FileRecord, Severity, MIB};

    fn file(path: &str, size_bytes: u64, category: Category) -> ClassifiedFile {
        ClassifiedFile {
            record: FileRecord::new(PathBuf::from(path), size_bytes, None),
            category,
            severity: None,
        }
    }

    #[test]
    fn move_threshold_is_exclusive() {
        let files = vec![
            file("/c/at.docx", MOVE_THRESHOLD_BYTES, Category::UserGenerated),
            file("/c/over.docx", MOVE_THRESHOLD_BYTES + 1, Category::UserGenerated),
        ];
        let suggestions = select_move_suggestions(&files, Some(Path::new("/c")), &[]);
        assert_eq!(suggestions.files.len(), 1);
        assert_eq!(suggestions.files[0].path(), Path::new("/c/over.docx"));
        assert_eq!(suggestions.total_bytes, MOVE_THRESHOLD_BYTES + 1);
    }

    #[test]
    fn move_suggestions_require_primary_volume_and_category() {
        let big = 60 * MIB;
        let files = vec![
            file("/c/movie.mkv", big, Category::LargeMediaArchive),
            file("/d/movie.mkv", big, Category::LargeMediaArchive),
            file("/c/huge.tmp", big, Category::TemporaryJunk),
            file("/c/disk.img", big, Category::Other),
            file("/c/sys.dll", big, Category::SystemCritical),
        ];
        let suggestions = select_move_suggestions(&files, Some(Path::new("/c")), &[]);
        let paths = suggestions
            .files
            .iter()
            .map(|item| item.path().to_path_buf())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec![PathBuf::from("/c/movie.mkv")]);
        assert_eq!(suggestions.primary_volume.as_deref(), Some("/c"));

        assert!(select_move_suggestions(&files, None, &[]).files.is_empty());
    }

    #[test]
    fn files_on_nested_mounts_are_not_moved_off_the_primary_volume() {
        let big = 60 * MIB;
        let files = vec![
            file("/mnt/backup-disk/movie.mkv", big, Category::LargeMediaArchive),
            file("/srv/movie.mkv", big, Category::LargeMediaArchive),
        ];
        let mounts = vec![PathBuf::from("/"), PathBuf::from("/mnt/backup-disk")];
        let suggestions = select_move_suggestions(&files, Some(Path::new("/")), &mounts);
        let paths = suggestions
            .files
            .iter()
            .map(|item| item.path().to_path_buf())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec![PathBuf::from("/srv/movie.mkv")]);
        assert_eq!(suggestions.total_bytes, big);
    }

    #[test]
    fn severity_boundaries_are_exclusive() {
        let rules = SeverityRules::default();
        assert_eq!(rules.severity_for(".tmp", 50 * MIB), Severity::Low);
        assert_eq!(rules.severity_for(".tmp", 50 * MIB + 1), Severity::High);
        assert_eq!(rules.severity_for(".log", 10 * MIB), Severity::Low);
        assert_eq!(rules.severity_for(".log", 10 * MIB + 1), Severity::Medium);
        assert_eq!(rules.severity_for(".bak", 10 * MIB + 1), Severity::Medium);
        assert_eq!(rules.severity_for(".TMP", 50 * MIB + 1), Severity::High);
    }

    #[test]
    fn large_logs_never_reach_high() {
        let rules = SeverityRules::default();
        assert_eq!(rules.severity_for(".log", 500 * MIB), Severity::Medium);
        assert_eq!(rules.severity_for(".tmp", 20 * MIB), Severity::Low);
        assert_eq!(rules.severity_for(".jpg", 500 * MIB), Severity::Low);
    }

    #[test]
    fn only_junk_records_are_scored() {
        let junk = file("/c/a.tmp", 60 * MIB, Category::TemporaryJunk);
        let media = file("/c/a.mp4", 60 * MIB, Category::LargeMediaArchive);
        let rules = SeverityRules::default();
        assert_eq!(junk_severity(&junk, &rules), Some(Severity::High));
        assert_eq!(junk_severity(&media, &rules), None);
    }

    #[test]
    fn scoring_returns_ranked_copies_and_leaves_input_alone() {
        let files = vec![
            file("/c/small.log", MIB, Category::TemporaryJunk),
            file("/c/big.log", 11 * MIB, Category::TemporaryJunk),
            file("/c/photo.jpg", 60 * MIB, Category::UserGenerated),
            file("/c/huge.tmp", 60 * MIB, Category::TemporaryJunk),
        ];
        let before = files.clone();
        let junk = score_junk(&files, &SeverityRules::default());

        assert_eq!(files, before);
        let ranked = junk
            .files
            .iter()
            .map(|item| (item.path().to_path_buf(), item.severity))
            .collect::<Vec<_>>();
        assert_eq!(
            ranked,
            vec![
                (PathBuf::from("/c/huge.tmp"), Some(Severity::High)),
                (PathBuf::from("/c/big.log"), Some(Severity::Medium)),
                (PathBuf::from("/c/small.log"), Some(Severity::Low)),
            ]
        );
        assert!(junk
            .files
            .iter()
            .all(|item| item.category == Category::TemporaryJunk));
        assert_eq!(junk.total_bytes, 72 * MIB);
        assert_eq!(junk.by_severity.len(), 3);
        assert_eq!(junk.by_severity[0].severity, Severity::High);
        assert_eq!(junk.by_severity[0].files, 1);
    }

    #[test]
    fn action_batches_are_deduplicated_and_validated() {
        let files = vec![
            file("/c/a.tmp", 10, Category::TemporaryJunk),
            file("/c/b.log", 20, Category::TemporaryJunk),
        ];
        let selected = vec![
            PathBuf::from("/c/a.tmp"),
            PathBuf::from("/c/b.log"),
            PathBuf::from("/c/a.tmp"),
            PathBuf::from("/c/gone.tmp"),
        ];
        let batch = plan_action(&selected, &files);
        assert_eq!(
            batch.paths,
            vec![PathBuf::from("/c/a.tmp"), PathBuf::from("/c/b.log")]
        );
        assert_eq!(batch.total_bytes, 30);
        assert_eq!(batch.unknown_paths, vec![PathBuf::from("/c/gone.tmp")]);
    }
}
