mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, FindArgs};
use dotenv::dotenv;
use near_duper_core::config::{self, AppConfig};
use near_duper_core::{
    scanner, DuplicateEngine, IndexProvider, MemoryIndex, SearchReport, SearchType, SqliteIndex,
};
use progress::CliReporter;
use tracing::{error, info};

const DEFAULT_INDEX: &str = "near_duper.db";

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Find(find)) => {
            if let Err(err) = run_find(&config, &find) {
                error!("Error: {:#}", err);
                process::exit(1);
            }
        }
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
        }
        Some(Commands::IndexStats { index }) => {
            let path = index_path(index, &config);
            run_index_stats(&path)?;
        }
        Some(Commands::ClearIndex { index }) => {
            let path = index_path(index, &config);
            match prompt_confirm(
                &format!("Are you SURE you want to COMPLETELY CLEAR the index at {}?", path),
                Some(false),
            ) {
                Ok(true) => {
                    SqliteIndex::open(&path)
                        .and_then(|idx| idx.clear())
                        .with_context(|| format!("clearing index {}", path))?;
                    println!("Index cleared");
                }
                _ => process::exit(0),
            }
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn index_path(arg: Option<String>, config: &AppConfig) -> String {
    arg.or_else(|| config.index_path.clone())
        .unwrap_or_else(|| DEFAULT_INDEX.to_string())
}

fn run_find(config: &AppConfig, args: &FindArgs) -> anyhow::Result<()> {
    let roots = if args.paths.is_empty() {
        config.root_paths.clone()
    } else {
        args.paths.clone()
    };
    let roots = config::non_overlapping_directories(roots);
    if roots.is_empty() {
        bail!("no paths given and no root_paths configured");
    }
    info!("Processing directories: {:?}", roots);

    let root_slices: Vec<&str> = roots.iter().map(|s| s.as_str()).collect();
    let ignore_slices: Vec<&str> = config.ignore_patterns.iter().map(|s| s.as_str()).collect();
    let paths: Vec<PathBuf> = scanner::enumerate(&root_slices, &ignore_slices, &config.filters)?;
    info!("{} files to examine", paths.len());

    let index: Arc<dyn IndexProvider> = match args.index.as_ref().or(config.index_path.as_ref()) {
        Some(path) => {
            Arc::new(SqliteIndex::open(path).with_context(|| format!("opening index {}", path))?)
        }
        None => Arc::new(MemoryIndex::new()),
    };

    let search: SearchType = args.search.into();
    let engine = DuplicateEngine::new(config.engine.clone()).with_index(index);
    let reporter = CliReporter::new();
    let report = engine.find_duplicates(search, &paths, args.algorithm, args.degree, &reporter)?;

    print_report(&report, args.show_errors);
    Ok(())
}

fn print_report(report: &SearchReport, show_errors: bool) {
    println!();
    if report.cancelled {
        println!("{}", "Search cancelled".yellow());
        return;
    }

    for cluster in &report.clusters {
        println!(
            "{} ({} files)",
            format!("Cluster {}", &cluster.key.to_hex()[..12]).cyan(),
            cluster.paths.len()
        );
        for path in &cluster.paths {
            println!("    {}", path.display());
        }
    }

    if show_errors {
        for e in &report.errors {
            println!("{} {}: {}", "skipped".yellow(), e.path.display(), e.reason);
        }
    }

    info!(
        "Signatures: {}, Linking: {}",
        format!("{:.2}s", report.signature_duration.as_secs_f64()).green(),
        format!("{:.2}s", report.link_duration.as_secs_f64()).green(),
    );
    info!(
        "{} clusters, {} files with duplicates, {} of {} files skipped",
        format!("{}", report.clusters.len()).red(),
        format!("{}", report.duplicate_files()).red(),
        format!("{}", report.errors.len()).yellow(),
        report.files_processed,
    );
}

fn run_index_stats(path: &str) -> anyhow::Result<()> {
    let index = SqliteIndex::open(path).with_context(|| format!("opening index {}", path))?;
    let stats = index.stats()?;

    println!("{}", format!("Index {}", path).cyan());
    if stats.namespaces.is_empty() {
        println!("    (empty)");
    }
    for ns in &stats.namespaces {
        println!(
            "    {:<12} {} signatures, {} fingerprints, {} links",
            ns.namespace, ns.signatures, ns.fingerprints, ns.links
        );
    }

    println!("{} sessions recorded", stats.sessions);
    for session in index.sessions(10)? {
        println!(
            "    #{} {} {} [{}] {} files, {} clusters",
            session.id,
            session.started_at,
            session.search_type,
            session.status,
            session.files_processed,
            session.clusters
        );
    }
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
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
