use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::RootFailure;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no scan roots were provided")]
    NoRoots,

    #[error("scan root {path} is not accessible: {source}")]
    RootInaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("scan root {0} is not a directory")]
    RootNotDirectory(PathBuf),

    #[error("audit log write failed for {path}: {source}")]
    Audit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScanError {
    pub(crate) fn to_root_failure(&self, root: &std::path::Path) -> RootFailure {
        RootFailure {
            root: root.to_string_lossy().to_string(),
            reason: self.to_string(),
        }
    }
}
