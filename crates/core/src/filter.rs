use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::rules::PrefixSet;

/// True when `exclude_system` is on and `path` is equal to or nested under a
/// system root.
pub fn is_excluded(path: &Path, system_roots: &PrefixSet, exclude_system: bool) -> bool {
    exclude_system && system_roots.contains(path)
}

/// Decides which directories the scanner prunes before descending.
#[derive(Debug, Clone)]
pub struct PathFilter {
    exclude_system: bool,
    system_roots: PrefixSet,
    patterns: ExcludeMatcher,
}

impl PathFilter {
    pub fn new(
        system_roots: PrefixSet,
        exclude_system: bool,
        patterns: &[String],
        warnings: &mut Vec<String>,
    ) -> Self {
        Self {
            exclude_system,
            system_roots,
            patterns: ExcludeMatcher::new(patterns, warnings),
        }
    }

    pub fn system_only(system_roots: PrefixSet, exclude_system: bool) -> Self {
        Self {
            exclude_system,
            system_roots,
            patterns: ExcludeMatcher::empty(),
        }
    }

    pub fn exclude_system(&self) -> bool {
        self.exclude_system
    }

    /// Directory check; a true result prunes the whole subtree.
    pub fn is_excluded(&self, dir: &Path) -> bool {
        is_excluded(dir, &self.system_roots, self.exclude_system) || self.patterns.is_excluded(dir)
    }

    /// File check; only the caller-supplied patterns apply to single files.
    pub fn is_file_excluded(&self, file: &Path) -> bool {
        self.patterns.is_excluded(file)
    }
}

#[derive(Debug, Clone)]
struct ExcludeMatcher {
    globset: Option<GlobSet>,
    substrings: Vec<String>,
}

impl ExcludeMatcher {
    fn empty() -> Self {
        Self {
            globset: None,
            substrings: Vec::new(),
        }
    }

    fn new(patterns: &[String], warnings: &mut Vec<String>) -> Self {
        if patterns.is_empty() {
            return Self::empty();
        }

        let mut builder = GlobSetBuilder::new();
        let mut substrings = Vec::new();
        let mut glob_count = 0_usize;
        for pattern in patterns {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }

            if is_plain_substring_pattern(pattern) {
                substrings.push(pattern.to_lowercase());
                continue;
            }

            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                    glob_count += 1;
                }
                Err(err) => {
                    warnings.push(format!(
                        "invalid exclude glob '{pattern}': {err}; using substring fallback."
                    ));
                    substrings.push(pattern.to_lowercase());
                }
            }
        }

        let globset = if glob_count == 0 {
            None
        } else {
            match builder.build() {
                Ok(set) => Some(set),
                Err(err) => {
                    warnings.push(format!(
                        "failed to compile exclude glob set: {err}; glob excludes disabled."
                    ));
                    None
                }
            }
        };

        Self {
            globset,
            substrings,
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if let Some(globset) = &self.globset {
            if globset.is_match(path) {
                return true;
            }
        }

        if self.substrings.is_empty() {
            return false;
        }

        let lowered = path.to_string_lossy().to_lowercase();
        self.substrings
            .iter()
            .any(|pattern| lowered.contains(pattern))
    }
}

fn is_plain_substring_pattern(pattern: &str) -> bool {
    !pattern
        .chars()
        .any(|ch| matches!(ch, '*' | '?' | '[' | ']' | '{' | '}'))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{is_excluded, PathFilter};
    use crate::rules::PrefixSet;

    fn system_roots() -> PrefixSet {
        PrefixSet::new(["/vol/Windows", "/vol/Program Files"])
    }

    #[test]
    fn disabled_filter_never_excludes() {
        let roots = system_roots();
        assert!(!is_excluded(Path::new("/vol/Windows"), &roots, false));
        assert!(!is_excluded(Path::new("/vol/Windows/System32"), &roots, false));
    }

    #[test]
    fn enabled_filter_excludes_system_subtrees() {
        let roots = system_roots();
        assert!(is_excluded(Path::new("/vol/Windows"), &roots, true));
        assert!(is_excluded(Path::new("/vol/Program Files/app"), &roots, true));
        assert!(!is_excluded(Path::new("/vol/Users/me"), &roots, true));
    }

    #[test]
    fn patterns_match_glob_and_substring() {
        let mut warnings = Vec::new();
        let filter = PathFilter::new(
            PrefixSet::default(),
            true,
            &[
                "**/*.iso".to_string(),
                "[".to_string(),
                "node_modules".to_string(),
            ],
            &mut warnings,
        );

        assert!(filter.is_file_excluded(Path::new("/vol/images/disk.iso")));
        assert!(filter.is_excluded(Path::new("/vol/repo/node_modules")));
        assert!(!filter.is_excluded(Path::new("/vol/repo/src")));
        assert!(!warnings.is_empty());
    }

    #[test]
    fn file_checks_ignore_system_roots() {
        let filter = PathFilter::system_only(system_roots(), true);
        assert!(!filter.is_file_excluded(Path::new("/vol/Windows/x.dll")));
        assert!(filter.is_excluded(Path::new("/vol/Windows")));
    }
}
