use std::collections::HashMap;
use std::path::PathBuf;

use crate::advise::{score_junk, select_move_suggestions, SeverityRules};
use crate::model::{Category, CategoryCount, ClassifiedFile, Report};

pub const DEFAULT_TOP_FILES: usize = 10;

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub top_files_limit: usize,
    pub primary_volume: Option<PathBuf>,
    /// Every known volume mount; files on mounts nested under the primary
    /// volume are not move candidates.
    pub mount_points: Vec<PathBuf>,
    pub severity: SeverityRules,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            top_files_limit: DEFAULT_TOP_FILES,
            primary_volume: None,
            mount_points: Vec::new(),
            severity: SeverityRules::default(),
        }
    }
}

pub fn build_report(files: &[ClassifiedFile], options: &ReportOptions) -> Report {
    Report {
        total_files: files.len() as u64,
        total_bytes: files
            .iter()
            .fold(0_u64, |acc, file| acc.saturating_add(file.size_bytes())),
        category_counts: category_counts(files),
        top_files: top_files(files, options.top_files_limit),
        move_suggestions: select_move_suggestions(
            files,
            options.primary_volume.as_deref(),
            &options.mount_points,
        ),
        junk: score_junk(files, &options.severity),
    }
}

/// One entry per category, in declaration order, zero counts included.
pub fn category_counts(files: &[ClassifiedFile]) -> Vec<CategoryCount> {
    let mut totals: HashMap<Category, (u64, u64)> = HashMap::new();
    for file in files {
        let entry = totals.entry(file.category).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = entry.1.saturating_add(file.size_bytes());
    }

    Category::ALL
        .into_iter()
        .map(|category| {
            let (files, bytes) = totals.get(&category).copied().unwrap_or((0, 0));
            CategoryCount {
                category,
                files,
                bytes,
            }
        })
        .collect()
}

/// Largest files first; equal sizes are ordered by path.
pub fn top_files(files: &[ClassifiedFile], limit: usize) -> Vec<ClassifiedFile> {
    if limit == 0 {
        return Vec::new();
    }
    let mut ranked = files.iter().collect::<Vec<_>>();
    ranked.sort_by(|a, b| {
        b.size_bytes()
            .cmp(&a.size_bytes())
            .then_with(|| a.path().cmp(b.path()))
    });
    ranked.into_iter().take(limit).cloned().collect()
}
