use anyhow::{bail, Context};
use colored::*;
use console::style;
use photo_organizer::executor::EntryFailure;
use photo_organizer::{
    AnalysisReport, AppConfig, CancellationToken, ExecutionReport, OrganizeOptions, Organizer,
};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::progress::CliSink;
use super::{
    AnalyzeArgs, CacheStatsArgs, DupesArgs, JournalsArgs, OrganizeArgs, RollbackArgs, SourceArgs,
};

fn analyze_sources(
    organizer: &Organizer,
    source: &SourceArgs,
    config: &AppConfig,
    cancel: &CancellationToken,
    sink: &CliSink,
) -> anyhow::Result<AnalysisReport> {
    let roots: Vec<PathBuf> = if source.paths.is_empty() {
        config.root_paths.iter().map(PathBuf::from).collect()
    } else {
        source.paths.clone()
    };
    if roots.is_empty() {
        bail!("No directories given and no root_paths configured");
    }
    let recursive = config.organize.recursive && !source.no_recursive;
    let kinds = if source.kinds.is_empty() {
        config.organize.include_kinds.clone()
    } else {
        source.kinds.clone()
    };

    let report = organizer.analyze_paths(&roots, recursive, &kinds, cancel, sink)?;
    for (path, err) in &report.scan_failures {
        warn!("Could not scan {}: {}", path.display(), err);
    }
    Ok(report)
}

fn print_stats(report: &AnalysisReport) {
    let stats = &report.stats;
    println!();
    println!("{}", style("Collection").bold().underlined());
    println!(
        "  {:<22}{} ({} bytes)",
        "Files",
        style(stats.total_files).cyan(),
        stats.total_bytes
    );
    for (kind, count) in &stats.by_kind {
        println!("    {:<20}{}", kind, count);
    }
    println!(
        "  {:<22}{} ({} from file names)",
        "With capture time",
        style(stats.with_capture_time).green(),
        stats.dated_from_filename
    );
    println!("  {:<22}{}", "With device", style(stats.with_device).green());
    println!("  {:<22}{}", "With GPS", style(stats.with_location).green());
    if let (Some(earliest), Some(latest)) = (stats.earliest, stats.latest) {
        println!("  {:<22}{} .. {}", "Date range", earliest, latest);
    }
    for (year, count) in &stats.by_year {
        println!("    {:<20}{}", year, count);
    }
    if !stats.devices.is_empty() {
        println!("  {}", style("Devices").bold());
        let mut devices: Vec<_> = stats.devices.iter().collect();
        devices.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (device, count) in devices.into_iter().take(10) {
            println!("    {:<20}{}", device, count);
        }
    }
    if stats.failed > 0 {
        println!("  {:<22}{}", "Unreadable", style(stats.failed).red());
    }
    println!(
        "  {:<22}{} hits, {} misses",
        "Metadata cache", stats.cache_hits, stats.cache_misses
    );
}

#[derive(Serialize)]
struct AnalysisRow<'a> {
    path: &'a Path,
    kind: String,
    size: u64,
    capture_time: Option<String>,
    time_source: Option<String>,
    make: Option<&'a str>,
    model: Option<&'a str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    error: Option<String>,
}

fn write_analysis_csv(report: &AnalysisReport, path: &Path) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for file in &report.files {
        let record = file.record();
        let device = record.and_then(|r| r.device.as_ref());
        let capture = record.and_then(|r| r.capture_time.as_ref());
        wtr.serialize(AnalysisRow {
            path: &file.identity.path,
            kind: file.kind.to_string(),
            size: file.identity.size,
            capture_time: capture.map(|c| c.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            time_source: capture.map(|c| format!("{:?}", c.source)),
            make: device.and_then(|d| d.make.as_deref()),
            model: device.and_then(|d| d.model.as_deref()),
            latitude: record.and_then(|r| r.location).map(|l| l.latitude),
            longitude: record.and_then(|r| r.location).map(|l| l.longitude),
            width: record.and_then(|r| r.dimensions).map(|d| d.width),
            height: record.and_then(|r| r.dimensions).map(|d| d.height),
            error: file.result.as_ref().err().map(|e| e.to_string()),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_failures_csv(failures: &[EntryFailure], path: &Path) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for failure in failures {
        wtr.serialize(failure)?;
    }
    wtr.flush()?;
    Ok(())
}

fn print_execution(report: &ExecutionReport, plan_len: usize) {
    println!();
    println!(
        "{} batch {} finished as {:?}",
        style("✓").green(),
        style(&report.batch_id).bold(),
        report.state
    );
    println!("  {:<22}{}", "Completed", style(report.completed).green());
    if !report.failed.is_empty() {
        println!("  {:<22}{}", "Failed", style(report.failed.len()).red());
        for failure in &report.failed {
            println!(
                "    {} -> {}: {}",
                failure.source.display(),
                failure.destination.display(),
                failure.reason
            );
        }
    }
    let skipped = report.not_attempted(plan_len);
    if skipped > 0 {
        println!("  {:<22}{}", "Not attempted", style(skipped).yellow());
    }
    if let Some(reason) = &report.fatal {
        println!("  {:<22}{}", "Stopped", style(reason).red());
    }
    if let Some(journal) = report.journal.path() {
        println!(
            "  Undo with: photo-organizer rollback {}",
            style(journal.display()).cyan()
        );
    }
    info!(
        "Execution took {}",
        format!("{:.2?}", report.duration).green()
    );
}

pub fn run_analyze(
    config: &AppConfig,
    args: &AnalyzeArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let organizer = Organizer::new(config.clone())?;
    let sink = CliSink::new();
    let report = analyze_sources(&organizer, &args.source, config, cancel, &sink)?;
    print_stats(&report);

    if let Some(path) = &args.csv {
        write_analysis_csv(&report, path)?;
        info!("Wrote {} rows to {}", report.files.len(), path.display());
    }
    organizer.flush_cache()?;
    Ok(())
}

pub fn run_organize(
    config: &AppConfig,
    args: &OrganizeArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let Some(destination) = args.destination.clone().or_else(|| config.destination_path()) else {
        bail!("No destination given and none configured");
    };

    let mut options: OrganizeOptions = config.organize.clone();
    if !args.criteria.is_empty() {
        options.criteria_order = args.criteria.clone();
    }
    if let Some(mode) = args.mode {
        options.operation_mode = mode;
    }
    if let Some(policy) = args.policy {
        options.overwrite_policy = policy;
    }
    info!(
        "Organizing by [{}], {} with {} on conflict",
        options
            .criteria_order
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        options.operation_mode,
        options.overwrite_policy
    );

    let organizer = Organizer::new(config.clone())?;
    let sink = CliSink::new();
    let report = analyze_sources(&organizer, &args.source, config, cancel, &sink)?;
    organizer.flush_cache()?;
    if report.cancelled {
        println!("Interrupted during analysis, nothing was changed.");
        return Ok(());
    }

    let plan = organizer.plan_report(&report, &options, &destination);
    if plan.is_empty() {
        println!("Nothing to organize.");
        return Ok(());
    }

    if args.dry_run {
        for entry in plan.iter() {
            println!(
                "{} {} -> {}",
                entry.operation(),
                entry.source().path.display(),
                destination.join(entry.destination()).display()
            );
        }
        println!(
            "\n{} files, {} bytes (dry run, nothing changed)",
            style(plan.len()).cyan(),
            plan.total_bytes()
        );
        let needed = plan.copy_bytes();
        if needed > 0 {
            match photo_organizer::executor::available_space(&destination) {
                Some(free) if free < needed => println!(
                    "{} copies need {} bytes, only {} free",
                    style("!").red(),
                    needed,
                    free
                ),
                Some(free) => println!("Copies need {} bytes, {} free", needed, free),
                None => println!("Copies need {} bytes, free space unknown", needed),
            }
        }
        return Ok(());
    }

    if options.operation_mode == photo_organizer::Operation::Move
        && !args.yes
        && !prompt_confirm(
            &format!("Move {} files into {}?", plan.len(), destination.display()),
            Some(false),
        )?
    {
        return Ok(());
    }

    let execution = organizer.execute(&plan, cancel, &sink)?;
    print_execution(&execution, plan.len());
    if let Some(path) = &args.failures_csv {
        write_failures_csv(&execution.failed, path)?;
    }
    Ok(())
}

pub fn run_dupes(
    config: &AppConfig,
    args: &DupesArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let organizer = Organizer::new(config.clone())?;
    let sink = CliSink::new();
    let analysis = analyze_sources(&organizer, &args.source, config, cancel, &sink)?;
    if analysis.cancelled {
        organizer.flush_cache()?;
        println!("Interrupted during analysis, nothing was changed.");
        return Ok(());
    }
    let identities: Vec<_> = analysis.files.iter().map(|f| f.identity.clone()).collect();

    let report = organizer.find_duplicates(&identities, args.kind, &sink);
    organizer.flush_cache()?;

    for group in &report.groups {
        println!();
        println!(
            "{} {} ({} bytes each)",
            style("Group").bold(),
            group.hash,
            group.size
        );
        println!("  {} {}", style("keep").green(), group.primary.path.display());
        for member in group.redundant() {
            println!("  {} {}", style("dupe").red(), member.path.display());
        }
    }
    for (identity, err) in &report.failures {
        println!("  {} {}: {}", style("error").red(), identity.path.display(), err);
    }
    info!(
        "{} duplicate groups, {} redundant files, {} bytes wasted",
        format!("{}", report.groups.len()).red(),
        format!("{}", report.duplicate_files()).red(),
        format!("{}", report.wasted_bytes()).red(),
    );

    let Some(quarantine) = &args.quarantine else {
        return Ok(());
    };
    if report.groups.is_empty() {
        return Ok(());
    }
    let plan = organizer.removal_plan(&report.groups, quarantine, photo_organizer::Operation::Move);
    if !args.yes
        && !prompt_confirm(
            &format!(
                "Move {} duplicates into {}?",
                plan.len(),
                quarantine.display()
            ),
            Some(false),
        )?
    {
        return Ok(());
    }
    let execution = organizer.execute(&plan, cancel, &sink)?;
    print_execution(&execution, plan.len());
    Ok(())
}

pub fn run_rollback(config: &AppConfig, args: &RollbackArgs) -> anyhow::Result<()> {
    let organizer = Organizer::new(config.clone())?;
    let as_path = Path::new(&args.journal);
    let mut journal = if as_path.is_file() {
        organizer.load_journal(as_path)
    } else {
        organizer.find_journal(&args.journal)
    }
    .with_context(|| format!("loading journal {}", args.journal))?;
    info!(
        "Journal {} is {:?} with {} entries",
        journal.batch_id(),
        journal.state(),
        journal.len()
    );

    let report = organizer.rollback(&mut journal, &CliSink::new())?;
    println!();
    println!(
        "{} batch {} is {:?}",
        style("✓").green(),
        style(&report.batch_id).bold(),
        report.state
    );
    println!("  {:<22}{}", "Restored", style(report.restored).green());
    println!("  {:<22}{}", "Already undone", report.skipped);
    if !report.failed.is_empty() {
        println!("  {:<22}{}", "Failed", style(report.failed.len()).red());
        for failure in &report.failed {
            println!("    {}: {}", failure.destination.display(), failure.reason);
        }
        println!("  Fix the problems above and run rollback again.");
    }
    Ok(())
}

pub fn run_journals(config: &AppConfig, args: &JournalsArgs) -> anyhow::Result<()> {
    let organizer = Organizer::new(config.clone())?;

    if let Some(days) = args.prune_older_than {
        let removed = organizer.prune_journals(chrono::Duration::days(i64::from(days)))?;
        for batch_id in &removed {
            println!("{} {}", style("deleted").red(), batch_id);
        }
        println!("{} journals older than {} days removed", removed.len(), days);
        return Ok(());
    }

    if let Some(batch_id) = &args.delete {
        if organizer.delete_journal(batch_id)? {
            println!("{} {}", style("deleted").red(), batch_id);
        } else {
            bail!("No journal for batch {}", batch_id);
        }
        return Ok(());
    }

    if let Some(batch_id) = &args.show {
        let journal = organizer.find_journal(batch_id)?;
        let header = journal.header();
        println!("{} {:?}", style(&header.batch_id).bold(), journal.state());
        println!("  {:<22}{}", "Created", header.created_at);
        println!("  {:<22}{}", "Destination", header.destination_root.display());
        for entry in journal.entries() {
            println!(
                "  {:>4} {} {} -> {}",
                entry.sequence,
                entry.operation,
                entry.source.display(),
                entry.destination.display()
            );
        }
        return Ok(());
    }

    let summaries = organizer.list_journals()?;
    if summaries.is_empty() {
        println!("No batch journals under {}", config.journal_dir);
        return Ok(());
    }
    for summary in &summaries {
        println!(
            "{}  {:<26} {:>6} entries  {:?}  {}",
            style(&summary.batch_id).bold(),
            summary.created_at,
            summary.entries,
            summary.state,
            summary.destination_root.display()
        );
    }
    Ok(())
}

pub fn run_print_config(config: &AppConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn run_cache_stats(config: &AppConfig, args: &CacheStatsArgs) -> anyhow::Result<()> {
    let Some(path) = &config.cache_path else {
        println!("No cache_path configured; the metadata cache only lives for one run.");
        return Ok(());
    };
    let organizer = Organizer::new(config.clone())?;
    let stats = organizer.cache().stats();
    println!("{}", style(path).bold());
    println!("  {:<22}{}", "Entries", style(stats.entries).cyan());
    if stats.corrupt > 0 {
        println!(
            "  {:<22}{}",
            "Unreadable snapshot",
            style("ignored, will be rebuilt").yellow()
        );
    }
    if args.clear {
        organizer.cache().clear();
        organizer.flush_cache()?;
        println!("{}", style("Cache cleared").green());
    }
    Ok(())
}

pub fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
