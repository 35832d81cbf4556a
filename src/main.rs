//! updeploy - command-line entry point
//!
//! Thin layer over the library: loads configuration and inputs, wires the
//! real OS capabilities into the engine and prints results.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use updeploy::bios::{DiskEncryption, JsonPendingActionStore};
use updeploy::cache::ResultCache;
use updeploy::cli::{CacheCommands, Cli, Commands};
use updeploy::command_runner::{CommandProbe, SystemRunner};
use updeploy::config::DeployConfig;
use updeploy::download::{DownloadItem, DownloadManager, DownloadProgress};
use updeploy::facts::Facts;
use updeploy::history::HistoryStore;
use updeploy::installer::{InstallOutcome, Installer};
use updeploy::logic::dependency::{DependencyEvaluator, UnsupportedPolicy};
use updeploy::logic::resolver;
use updeploy::package::Package;
use updeploy::sanity;

/// Initialize tracing with `RUST_LOG` taking precedence over `--verbose`
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);
    debug!(?cli, "CLI arguments parsed");

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = DeployConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Validate => {
            config.validate()?;
            println!("✓ Configuration is valid: {:?}", cli.config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Evaluate {
            packages,
            facts,
            cache_tag,
        } => {
            config.validate()?;
            let resolved = resolve(&config, &packages, &facts, cache_tag.as_deref())?;
            print_evaluation(&resolved);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Download { packages, force } => {
            config.validate()?;
            let packages = load_packages(&packages)?;
            let ok = download(&config, &packages, force || config.force_download)?;
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::Install {
            packages,
            facts,
            cache_tag,
        } => {
            config.validate()?;
            sanity::run_preflight_checks()?;
            let resolved = resolve(&config, &packages, &facts, cache_tag.as_deref())?;
            let actionable = resolver::filter_actionable(resolved);
            info!(count = actionable.len(), "Packages need action");
            if actionable.is_empty() {
                println!("✓ Nothing to install");
                return Ok(ExitCode::SUCCESS);
            }

            // Batch transfer first; the orchestrator retries anything still missing
            if !download(&config, &actionable, config.force_download)? {
                warn!("Some payloads failed to download");
            }

            let outcomes = install(&config, &actionable)?;
            print_summary(&outcomes);
            let all_installed = outcomes.iter().all(InstallOutcome::is_installed);
            Ok(if all_installed { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Commands::History { id } => {
            let store = HistoryStore::new(&config.history_path);
            let items = match id {
                Some(id) => store.load_item(&id)?.into_iter().collect(),
                None => store.load()?,
            };
            println!("{}", serde_json::to_string_pretty(&items)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Cache {
            action: CacheCommands::Delete { tag },
        } => {
            ResultCache::new(&config.cache_dir).delete(&tag)?;
            println!("✓ Cache entry removed: {}", tag);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Load a JSON package list, recomputing derived install flags
fn load_packages(path: &Path) -> Result<Vec<Package>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read package list from {:?}", path))?;
    let mut packages: Vec<Package> =
        serde_json::from_str(&content).context("Failed to parse package list JSON")?;
    for package in &mut packages {
        package.refresh_unattended();
    }
    Ok(packages)
}

/// Resolve applicability and install state, consulting the cache when tagged
fn resolve(
    config: &DeployConfig,
    packages_path: &Path,
    facts_path: &Path,
    cache_tag: Option<&str>,
) -> Result<Vec<Package>> {
    let history = HistoryStore::new(&config.history_path).load()?;
    let cache = ResultCache::new(&config.cache_dir);

    if let Some(mut cached) = cache_tag.and_then(|tag| cache.get(tag)) {
        info!(tag = ?cache_tag, "Using cached resolution");
        // Install state moves with every run; only applicability is cached
        resolver::stamp_installed(&mut cached, &history);
        return Ok(cached);
    }

    let packages = load_packages(packages_path)?;
    let facts = Facts::load_from_file(facts_path)?;
    let probe = CommandProbe::new(SystemRunner);
    let evaluator = DependencyEvaluator::new(
        &facts,
        UnsupportedPolicy::from_strict(config.strict_dependencies),
        &probe,
    );
    let resolved = resolver::resolve(packages, &evaluator, &history)
        .context("Package resolution failed")?;

    if let Some(tag) = cache_tag {
        if let Err(e) = cache.put(tag, &resolved) {
            warn!(tag, error = %e, "Could not write result cache");
        }
    }
    Ok(resolved)
}

/// Fetch payloads for `packages`; returns false when any transfer failed
fn download(config: &DeployConfig, packages: &[Package], force: bool) -> Result<bool> {
    let manager = DownloadManager::new(&config.download_dir, config.proxy.as_deref())?
        .with_poll_interval(config.progress_interval());

    let mut items = Vec::with_capacity(packages.len());
    for package in packages {
        match DownloadItem::from_package(package) {
            Ok(item) => items.push(item),
            Err(e) => warn!(package = %package.id, error = %e, "Cannot derive payload URL"),
        }
    }

    let observer = |progress: DownloadProgress| {
        info!(
            finished = progress.finished,
            total = progress.total,
            bytes = progress.bytes_received,
            "Download progress"
        );
    };
    let report = manager.fetch_all_blocking(&items, force, Some(&observer))?;

    println!(
        "Downloads: {} fetched, {} already present, {} failed",
        report.succeeded.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        println!("  ✗ {}: {}", failure.url, failure.reason);
    }
    Ok(report.is_success() && items.len() == packages.len())
}

fn install(config: &DeployConfig, packages: &[Package]) -> Result<Vec<InstallOutcome>> {
    let runner = SystemRunner;
    let fetcher = DownloadManager::new(&config.download_dir, config.proxy.as_deref())?;
    let encryption = disk_encryption(config);
    let pending = JsonPendingActionStore::new(&config.pending_action_path);
    let history = HistoryStore::new(&config.history_path);

    let installer = Installer::new(
        &config.download_dir,
        &fetcher,
        &runner,
        encryption.as_ref(),
        &pending,
        &history,
    );
    Ok(installer.install_all(packages))
}

#[cfg(windows)]
fn disk_encryption(config: &DeployConfig) -> Box<dyn DiskEncryption> {
    Box::new(updeploy::bios::ManageBde::new(SystemRunner, &config.os_volume))
}

#[cfg(not(windows))]
fn disk_encryption(config: &DeployConfig) -> Box<dyn DiskEncryption> {
    debug!(volume = %config.os_volume, "No disk encryption support on this host");
    Box::new(updeploy::bios::NoDiskEncryption)
}

fn print_evaluation(packages: &[Package]) {
    for p in packages {
        let state = match (p.is_applicable, p.is_installed) {
            (false, _) => "not applicable",
            (true, true) => "installed",
            (true, false) if p.install.unattended => "needs install",
            (true, false) => "needs install (interactive, skipped)",
        };
        let detected = p
            .detected_version
            .map(|v| format!(" (detected {})", v))
            .unwrap_or_default();
        println!(
            "{:<12} {:<40} {:<14}{} {}",
            p.id,
            p.title,
            p.version.to_string(),
            detected,
            state
        );
    }
}

fn print_summary(outcomes: &[InstallOutcome]) {
    let installed = outcomes.iter().filter(|o| o.is_installed()).count();
    println!();
    println!("Install summary: {} installed, {} failed", installed, outcomes.len() - installed);
    for outcome in outcomes {
        if outcome.is_installed() {
            println!("  ✓ {}", outcome.package_id);
        } else {
            println!("  ✗ {}: {}", outcome.package_id, outcome.message);
        }
        if let Some(bios) = &outcome.bios {
            println!("    firmware follow-up: {}", bios.action_needed);
        }
    }
}
