use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::ScanError;
use crate::model::AuditStatus;

pub const DEFAULT_AUDIT_LOG: &str = "scan_log.txt";

/// Receives one entry per successfully stat-ed file. Failures are reported back
/// to the scanner, which keeps walking and surfaces them in [`AuditStatus`].
pub trait AuditSink {
    fn record(&mut self, path: &Path, size_bytes: u64) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Discards every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudit;

impl AuditSink for NullAudit {
    fn record(&mut self, _path: &Path, _size_bytes: u64) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl AuditSink for Vec<AuditEntry> {
    fn record(&mut self, path: &Path, size_bytes: u64) -> io::Result<()> {
        self.push(AuditEntry {
            path: path.to_path_buf(),
            size_bytes,
        });
        Ok(())
    }
}

/// Append-only `<path>\t<size>\n` log.
pub struct TsvAuditLog<W: Write> {
    writer: BufWriter<W>,
}

impl TsvAuditLog<File> {
    /// Opens `path` truncated, so each scan starts a fresh log.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> TsvAuditLog<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn into_inner(self) -> io::Result<W> {
        self.writer
            .into_inner()
            .map_err(|err| err.into_error())
    }
}

impl<W: Write> AuditSink for TsvAuditLog<W> {
    fn record(&mut self, path: &Path, size_bytes: u64) -> io::Result<()> {
        writeln!(self.writer, "{}\t{}", path.display(), size_bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Opens the TSV log at `path`. When the file cannot be created the scan still
/// runs: the returned sink fails every write, so the problem lands in
/// [`AuditStatus`] next to the scan results.
pub fn open_audit_log(path: &Path) -> Box<dyn AuditSink + Send> {
    match TsvAuditLog::create(path) {
        Ok(log) => Box::new(log),
        Err(err) => {
            warn!("cannot open audit log {}: {err}", path.display());
            Box::new(UnavailableAudit {
                path: path.to_path_buf(),
                kind: err.kind(),
                reason: err.to_string(),
            })
        }
    }
}

/// Stands in for an audit log that could not be opened.
#[derive(Debug, Clone)]
pub struct UnavailableAudit {
    path: PathBuf,
    kind: io::ErrorKind,
    reason: String,
}

impl UnavailableAudit {
    fn error(&self) -> io::Error {
        io::Error::new(
            self.kind,
            format!(
                "audit log {} could not be opened: {}",
                self.path.display(),
                self.reason
            ),
        )
    }
}

impl AuditSink for UnavailableAudit {
    fn record(&mut self, _path: &Path, _size_bytes: u64) -> io::Result<()> {
        Err(self.error())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(self.error())
    }
}

/// Wraps a sink for the duration of one scan and tallies its failures.
pub(crate) struct AuditRecorder<'a> {
    sink: &'a mut dyn AuditSink,
    status: AuditStatus,
}

impl<'a> AuditRecorder<'a> {
    pub(crate) fn new(sink: &'a mut dyn AuditSink) -> Self {
        Self {
            sink,
            status: AuditStatus::default(),
        }
    }

    pub(crate) fn record(&mut self, path: &Path, size_bytes: u64) {
        match self.sink.record(path, size_bytes) {
            Ok(()) => self.status.entries_written += 1,
            Err(source) => self.fail(ScanError::Audit {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub(crate) fn finish(mut self) -> AuditStatus {
        if let Err(source) = self.sink.flush() {
            self.fail(ScanError::Audit {
                path: PathBuf::from("<flush>"),
                source,
            });
        }
        self.status
    }

    fn fail(&mut self, err: ScanError) {
        if self.status.failures == 0 {
            warn!("{err}; scan continues without a complete audit log");
            self.status.first_error = Some(err.to_string());
        }
        self.status.failures += 1;
    }
}
