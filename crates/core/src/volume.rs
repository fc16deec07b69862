#[cfg(windows)]
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sysinfo::Disks;

use crate::rules::PrefixSet;

const PSEUDO_AUTO_ROOTS: &[&str] = &[
    "/dev", "/proc", "/sys", "/run", "/snap", "/boot", "/System",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeInfo {
    pub name: String,
    pub mount_point: String,
    pub total_space_bytes: u64,
    pub free_space_bytes: u64,
    pub file_system: Option<String>,
    #[serde(default)]
    pub is_removable: bool,
    #[serde(default)]
    pub is_primary: bool,
}

/// The OS volume: `%SystemDrive%` on Windows, `/` elsewhere.
pub fn detect_primary_volume() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        env::var("SystemDrive")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(|value| PathBuf::from(normalize_windows_mount(&value)))
    }
    #[cfg(not(windows))]
    {
        Some(PathBuf::from("/"))
    }
}

pub fn detect_volumes() -> Vec<VolumeInfo> {
    let primary = detect_primary_volume();
    let disks = Disks::new_with_refreshed_list();
    let mut volumes = disks
        .list()
        .iter()
        .map(|disk| {
            let mount_point = disk.mount_point().to_string_lossy().to_string();
            VolumeInfo {
                name: disk.name().to_string_lossy().to_string(),
                is_primary: is_primary_mount(primary.as_deref(), &mount_point),
                mount_point,
                total_space_bytes: disk.total_space(),
                free_space_bytes: disk.available_space(),
                file_system: Some(disk.file_system().to_string_lossy().to_string())
                    .filter(|value| !value.is_empty()),
                is_removable: disk.is_removable(),
            }
        })
        .collect::<Vec<_>>();
    volumes.sort_by(|a, b| a.mount_point.cmp(&b.mount_point));
    volumes.dedup_by(|a, b| a.mount_point == b.mount_point);
    volumes
}

/// Mount points of every detected volume, for [`PrimaryVolume`] membership.
pub fn detect_mount_points() -> Vec<PathBuf> {
    detect_volumes()
        .into_iter()
        .map(|volume| PathBuf::from(volume.mount_point))
        .collect()
}

/// Decides whether a path lives on the primary volume.
///
/// A path belongs to the volume whose mount point is its longest matching
/// prefix, so `/mnt/backup/x` is not on a primary volume mounted at `/` when
/// `/mnt/backup` is a mount of its own.
#[derive(Debug, Clone)]
pub struct PrimaryVolume {
    mount: PrefixSet,
    nested_mounts: PrefixSet,
}

impl PrimaryVolume {
    pub fn new(mount: &Path, mount_points: &[PathBuf]) -> Self {
        let primary = PrefixSet::new([mount]);
        let nested = mount_points
            .iter()
            .filter(|candidate| primary.contains(candidate))
            .filter(|candidate| PrefixSet::new([candidate]) != primary)
            .collect::<Vec<_>>();
        Self {
            mount: primary,
            nested_mounts: PrefixSet::new(nested),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.mount.contains(path) && !self.nested_mounts.contains(path)
    }
}

/// Pseudo and system mounts that are never picked as automatic scan roots.
pub fn should_skip_auto_root(path: &Path) -> bool {
    let normalized = path.to_string_lossy().replace('\\', "/");
    PSEUDO_AUTO_ROOTS
        .iter()
        .any(|prefix| normalized == *prefix || normalized.starts_with(&format!("{prefix}/")))
}

fn is_primary_mount(primary: Option<&Path>, mount_point: &str) -> bool {
    let Some(primary) = primary else {
        return false;
    };
    let primary = primary.to_string_lossy();

    #[cfg(windows)]
    {
        normalize_windows_mount(&primary).eq_ignore_ascii_case(&normalize_windows_mount(mount_point))
    }

    #[cfg(not(windows))]
    {
        normalize_unix_mount(&primary) == normalize_unix_mount(mount_point)
    }
}

#[cfg(windows)]
fn normalize_windows_mount(value: &str) -> String {
    let mut normalized = value.trim().replace('/', "\\");
    if normalized.len() == 2 && normalized.ends_with(':') {
        normalized.push('\\');
    }
    if normalized.len() >= 2 && normalized.as_bytes()[1] == b':' {
        let drive = normalized[..1].to_ascii_uppercase();
        normalized.replace_range(..1, &drive);
    }
    normalized
}

#[cfg(not(windows))]
fn normalize_unix_mount(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed == "/" {
        "/".to_string()
    } else {
        trimmed.trim_end_matches('/').to_string()
    }
}
