use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytebouncer_core::{
    build_report, collect_doctor_info, open_audit_log, run_scan_with_callback, Category, Report,
    ReportOptions, RuleSet, ScanOptions, ScanReport, DEFAULT_AUDIT_LOG, DEFAULT_TOP_FILES,
};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "bytebouncer",
    version,
    about = "Scan volumes, classify files and suggest what to clean up or move. Read-only."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan paths/volumes and emit a JSON report.
    Scan(ScanArgs),
    /// Re-derive the summary and advice from an existing report.
    Summarize(SummarizeArgs),
    /// Show environment, volumes and the rule tables in effect.
    Doctor,
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// One or more root paths to scan. If omitted, all detected volumes are used.
    #[arg(long = "paths", value_name = "PATH", num_args = 1.., action = ArgAction::Append)]
    paths: Vec<PathBuf>,

    /// Output report path.
    #[arg(long, default_value = "bytebouncer-report.json", value_name = "FILE")]
    output: PathBuf,

    /// Audit log path; truncated at the start of each scan.
    #[arg(long, default_value = DEFAULT_AUDIT_LOG, value_name = "FILE")]
    audit_log: PathBuf,

    /// Descend into system folders instead of skipping them.
    #[arg(long)]
    include_system: bool,

    /// Exclude glob patterns (repeatable).
    #[arg(long = "exclude", value_name = "GLOB", num_args = 1.., action = ArgAction::Append)]
    exclude: Vec<String>,

    /// JSON file overriding the classification tables.
    #[arg(long, value_name = "FILE")]
    rules: Option<PathBuf>,

    /// Volume checked for move suggestions (defaults to the OS volume).
    #[arg(long, value_name = "PATH")]
    primary_volume: Option<PathBuf>,

    /// Number of largest files listed in the summary.
    #[arg(long, default_value_t = DEFAULT_TOP_FILES)]
    top: usize,

    /// Emit progress log events while scanning.
    #[arg(long)]
    progress: bool,

    /// Minimum milliseconds between progress updates.
    #[arg(long, default_value_t = 250)]
    progress_interval_ms: u64,
}

#[derive(Debug, Args)]
struct SummarizeArgs {
    /// Input report file.
    #[arg(long, value_name = "FILE")]
    report: PathBuf,

    /// Number of largest files listed.
    #[arg(long, default_value_t = DEFAULT_TOP_FILES)]
    top: usize,

    /// Overrides the primary volume recorded in the report.
    #[arg(long, value_name = "PATH")]
    primary_volume: Option<PathBuf>,

    /// JSON rules file supplying the junk severity tables.
    #[arg(long, value_name = "FILE")]
    rules: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => run_scan_command(args),
        Commands::Summarize(args) => run_summarize_command(args),
        Commands::Doctor => {
            run_doctor_command();
            Ok(())
        }
    }
}

fn run_scan_command(args: ScanArgs) -> Result<()> {
    let ScanArgs {
        paths,
        output,
        audit_log,
        include_system,
        exclude,
        rules,
        primary_volume,
        top,
        progress,
        progress_interval_ms,
    } = args;

    let rules = match rules {
        Some(path) => RuleSet::from_json_file(&path)?,
        None => RuleSet::detect(),
    };
    let options = ScanOptions {
        paths,
        exclude_system: !include_system,
        excludes: exclude,
        rules,
        primary_volume,
        top_files_limit: top,
        progress,
        progress_interval_ms,
        ..ScanOptions::default()
    };

    let mut audit = open_audit_log(&audit_log);
    let report = run_scan_with_callback(&options, audit.as_mut(), |_| {})?;
    drop(audit);
    let payload = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    fs::write(&output, payload)
        .with_context(|| format!("failed to write report to {}", output.display()))?;

    println!("Report written to {}", output.display());
    println!(
        "Scanned {} root(s), {} file(s), {} in {} ms.",
        report.scan_metrics.scanned_roots,
        report.scan_metrics.scanned_files,
        human_bytes(report.scan_metrics.scanned_bytes),
        report.scan_metrics.elapsed_ms
    );
    for failure in &report.root_failures {
        println!("Root failed: {} ({})", failure.root, failure.reason);
    }
    if report.audit.is_complete() {
        println!(
            "Audit log: {} entries in {}",
            report.audit.entries_written,
            audit_log.display()
        );
    } else {
        warn!(
            "audit log {} is incomplete: {} write(s) failed ({})",
            audit_log.display(),
            report.audit.failures,
            report.audit.first_error.as_deref().unwrap_or("unknown error")
        );
    }
    if report.cancelled {
        println!("Scan was cancelled; results are partial.");
    }
    print_summary(&report.summary);
    for warning in &report.warnings {
        println!("Warning: {warning}");
    }
    println!("Read-only: nothing was moved or deleted.");

    Ok(())
}

fn run_summarize_command(args: SummarizeArgs) -> Result<()> {
    let data = fs::read_to_string(&args.report)
        .with_context(|| format!("failed to read {}", args.report.display()))?;
    let report: ScanReport = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse {}", args.report.display()))?;

    let rules = match &args.rules {
        Some(path) => RuleSet::from_json_file(path)?,
        None => RuleSet::platform_defaults(),
    };
    let primary_volume = args
        .primary_volume
        .or_else(|| report.scan.primary_volume.as_ref().map(PathBuf::from));
    let summary = build_report(
        &report.files,
        &ReportOptions {
            top_files_limit: args.top,
            primary_volume,
            mount_points: report.scan.mount_points.iter().map(PathBuf::from).collect(),
            severity: rules.severity_rules(),
        },
    );

    println!(
        "Summary of scan {} ({}) from {}:",
        report.scan_id,
        report.generated_at,
        args.report.display()
    );
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &Report) {
    println!(
        "Classified {} file(s), {}:",
        summary.total_files,
        human_bytes(summary.total_bytes)
    );
    for entry in &summary.category_counts {
        println!(
            "  {} {:<20} {:>8} file(s) {:>10}",
            entry.category.symbol(),
            entry.category.label(),
            entry.files,
            human_bytes(entry.bytes)
        );
    }

    if !summary.top_files.is_empty() {
        println!("Largest files:");
        for file in &summary.top_files {
            println!(
                "  {:>10}  {}  [{}]",
                human_bytes(file.size_bytes()),
                file.path().display(),
                file.category.label()
            );
        }
    }

    let moves = &summary.move_suggestions;
    match &moves.primary_volume {
        Some(volume) => println!(
            "Move suggestions: {} file(s) on {} could free {}.",
            moves.files.len(),
            volume,
            human_bytes(moves.total_bytes)
        ),
        None => println!("Move suggestions: no primary volume known."),
    }
    for file in &moves.files {
        println!(
            "  {:>10}  {}",
            human_bytes(file.size_bytes()),
            file.path().display()
        );
    }

    let junk = &summary.junk;
    println!(
        "Junk: {} file(s), {} reclaimable.",
        junk.files.len(),
        human_bytes(junk.total_bytes)
    );
    for bucket in &junk.by_severity {
        println!(
            "  {:<6} {:>8} file(s) {:>10}",
            bucket.severity.label(),
            bucket.files,
            human_bytes(bucket.bytes)
        );
    }
    if summary.count_for(Category::SystemCritical) > 0 {
        println!("System-critical files were scanned; they are never suggested for action.");
    }
}

fn run_doctor_command() {
    let info = collect_doctor_info();
    println!("OS: {} ({})", info.os, info.arch);
    if let Some(current_dir) = info.current_dir {
        println!("Current directory: {}", current_dir);
    }
    if let Some(primary) = info.primary_volume {
        println!("Primary volume: {}", primary);
    }
    println!("System roots: {}", info.system_roots.join(", "));
    if info.temp_roots.is_empty() {
        println!("Temp roots: none");
    } else {
        println!("Temp roots: {}", info.temp_roots.join(", "));
    }
    println!("Detected volumes: {}", info.volumes.len());
    for volume in info.volumes {
        println!(
            "- {} [{}] total={} free={} fs={} removable={} primary={}",
            volume.name,
            volume.mount_point,
            human_bytes(volume.total_space_bytes),
            human_bytes(volume.free_space_bytes),
            volume.file_system.as_deref().unwrap_or("unknown"),
            volume.is_removable,
            volume.is_primary
        );
    }
    for note in info.notes {
        println!("Note: {}", note);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0 B".to_string();
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{human_bytes, Cli, Commands};

    #[test]
    fn human_bytes_scales_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(512), "512.0 B");
        assert_eq!(human_bytes(60 * 1024 * 1024), "60.0 MB");
    }

    #[test]
    fn scan_defaults_exclude_system_folders() {
        let cli = Cli::parse_from(["bytebouncer", "scan", "--paths", "/data", "/media"]);
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(args.paths.len(), 2);
        assert!(!args.include_system);
        assert_eq!(args.top, 10);
        assert_eq!(args.audit_log.to_string_lossy(), "scan_log.txt");
        assert_eq!(args.progress_interval_ms, 250);
    }

    #[test]
    fn summarize_accepts_rules_file() {
        let cli = Cli::parse_from([
            "bytebouncer",
            "summarize",
            "--report",
            "report.json",
            "--rules",
            "rules.json",
        ]);
        let Commands::Summarize(args) = cli.command else {
            panic!("expected summarize command");
        };
        assert_eq!(args.rules.as_deref(), Some(std::path::Path::new("rules.json")));
    }
}
