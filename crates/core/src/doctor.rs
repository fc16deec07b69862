use std::env;

use serde::{Deserialize, Serialize};

use crate::rules::RuleSet;
use crate::volume::{detect_primary_volume, detect_volumes, VolumeInfo};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorInfo {
    pub os: String,
    pub arch: String,
    pub current_dir: Option<String>,
    pub primary_volume: Option<String>,
    pub system_roots: Vec<String>,
    pub temp_roots: Vec<String>,
    pub volumes: Vec<VolumeInfo>,
    pub notes: Vec<String>,
}

pub fn collect_doctor_info() -> DoctorInfo {
    collect_doctor_info_with(&RuleSet::detect())
}

pub fn collect_doctor_info_with(rules: &RuleSet) -> DoctorInfo {
    let current_dir = env::current_dir()
        .ok()
        .map(|path| path.to_string_lossy().to_string());
    let primary_volume =
        detect_primary_volume().map(|path| path.to_string_lossy().to_string());
    let volumes = detect_volumes();

    let mut notes = vec![
        "Scans are read-only; suggestions are advisory and nothing is moved or deleted."
            .to_string(),
    ];
    if rules.temp_roots.is_empty() {
        notes.push(
            "No temp directory found in TEMP/TMP/TMPDIR; junk detection uses extensions only."
                .to_string(),
        );
    }
    if volumes.is_empty() {
        notes.push("No volumes detected by sysinfo; pass explicit --paths to scan.".to_string());
    }
    if primary_volume.is_none() {
        notes.push("Primary volume unknown; move suggestions need --primary-volume.".to_string());
    }

    DoctorInfo {
        os: env::consts::OS.to_string(),
        arch: env::consts::ARCH.to_string(),
        current_dir,
        primary_volume,
        system_roots: display_paths(&rules.system_roots),
        temp_roots: display_paths(&rules.temp_roots),
        volumes,
        notes,
    }
}

fn display_paths(paths: &[std::path::PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|path| path.to_string_lossy().to_string())
        .collect()
}
