use crate::model::{Category, ClassifiedFile, FileRecord};
use crate::rules::CompiledRules;

/// Assigns exactly one category. Rules are tried in a fixed order and the first
/// match wins: system root, junk extension or temp root, media/archive
/// extension, user document extension, then `Other`.
pub fn classify(record: &FileRecord, rules: &CompiledRules) -> Category {
    if rules.system_roots.contains(&record.path) {
        return Category::SystemCritical;
    }

    let extension = record.extension.to_lowercase();
    if rules.junk_extensions.contains(&extension) || rules.temp_roots.contains(&record.path) {
        return Category::TemporaryJunk;
    }
    if rules.media_extensions.contains(&extension) {
        return Category::LargeMediaArchive;
    }
    if rules.user_extensions.contains(&extension) {
        return Category::UserGenerated;
    }
    Category::Other
}

pub fn classify_record(record: FileRecord, rules: &CompiledRules) -> ClassifiedFile {
    let category = classify(&record, rules);
    ClassifiedFile {
        record,
        category,
        severity: None,
    }
}

pub fn classify_all(records: Vec<FileRecord>, rules: &CompiledRules) -> Vec<ClassifiedFile> {
    records
        .into_iter()
        .map(|record| classify_record(record, rules))
        .collect()
}
